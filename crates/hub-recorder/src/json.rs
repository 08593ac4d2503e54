//! JSON-document store
//!
//! Persists all state rows into one versioned JSON file. Writes go to a
//! temp file first and are renamed into place, so a crash mid-write never
//! corrupts the document.

use hub_core::StateRow;
use hub_state_tree::{StatePersistence, StoreResult};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::debug;

const DOCUMENT_VERSION: u32 = 1;

#[derive(Debug, Serialize, Deserialize)]
struct Document {
    version: u32,
    states: Vec<StateRow>,
}

/// File-backed store holding all rows in a single JSON document
pub struct JsonStore {
    path: PathBuf,
    rows: Mutex<BTreeMap<i64, StateRow>>,
}

impl JsonStore {
    /// Open a store at the given path, reading the document if it exists
    pub fn open(path: impl AsRef<Path>) -> StoreResult<Self> {
        let path = path.as_ref().to_path_buf();
        let mut rows = BTreeMap::new();

        if path.exists() {
            let content = fs::read_to_string(&path)?;
            let document: Document = serde_json::from_str(&content)?;
            debug!(
                path = %path.display(),
                version = document.version,
                states = document.states.len(),
                "Loaded state document"
            );
            for row in document.states {
                rows.insert(row.id.as_i64(), row);
            }
        }

        Ok(Self {
            path,
            rows: Mutex::new(rows),
        })
    }

    fn flush(&self, rows: &BTreeMap<i64, StateRow>) -> StoreResult<()> {
        let document = Document {
            version: DOCUMENT_VERSION,
            states: rows.values().cloned().collect(),
        };
        let content = serde_json::to_string_pretty(&document)?;

        // Write to a temp file first, then rename atomically
        let temp_path = self.path.with_extension("tmp");
        fs::write(&temp_path, content)?;
        fs::rename(&temp_path, &self.path)?;
        Ok(())
    }
}

impl StatePersistence for JsonStore {
    fn load_all(&self) -> StoreResult<Vec<StateRow>> {
        Ok(self.rows.lock().unwrap().values().cloned().collect())
    }

    fn persist_add(&self, row: &StateRow) -> StoreResult<()> {
        let mut rows = self.rows.lock().unwrap();
        rows.insert(row.id.as_i64(), row.clone());
        self.flush(&rows)
    }

    fn persist_set(&self, row: &StateRow) -> StoreResult<()> {
        let mut rows = self.rows.lock().unwrap();
        rows.insert(row.id.as_i64(), row.clone());
        self.flush(&rows)
    }

    fn persist_delete(&self, row: &StateRow) -> StoreResult<()> {
        let mut rows = self.rows.lock().unwrap();
        rows.remove(&row.id.as_i64());
        self.flush(&rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hub_core::{NodeId, StateType};
    use serde_json::json;
    use tempfile::TempDir;

    fn row(id: i64, path: &str) -> StateRow {
        StateRow {
            id: NodeId(id),
            parent_id: None,
            name: path.trim_start_matches('/').to_string(),
            path: path.to_string(),
            kind: StateType::float(),
            quantity: None,
            unit: None,
            value: Some(json!(1.0)),
            config: serde_json::Map::new(),
        }
    }

    #[test]
    fn test_persist_and_reopen() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("states.json");

        let store = JsonStore::open(&path).unwrap();
        store.persist_add(&row(1, "/a")).unwrap();
        store.persist_add(&row(2, "/b")).unwrap();

        let mut updated = row(1, "/a");
        updated.value = Some(json!(2.5));
        store.persist_set(&updated).unwrap();
        store.persist_delete(&row(2, "/b")).unwrap();

        let reopened = JsonStore::open(&path).unwrap();
        let rows = reopened.load_all().unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].value, Some(json!(2.5)));
    }

    #[test]
    fn test_open_missing_file_is_empty() {
        let dir = TempDir::new().unwrap();
        let store = JsonStore::open(dir.path().join("missing.json")).unwrap();
        assert!(store.load_all().unwrap().is_empty());
    }
}
