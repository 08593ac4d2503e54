//! Persistence port consumed by the state tree
//!
//! Implementations live in `hub-recorder`; the `MemoryStore` here backs
//! tests and ephemeral setups.

use hub_core::StateRow;
use std::collections::BTreeMap;
use std::sync::Mutex;
use thiserror::Error;

/// Errors surfaced by a persistence backend
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("database error: {0}")]
    Database(String),
}

/// Result type for persistence operations
pub type StoreResult<T> = Result<T, StoreError>;

/// Storage backend for state rows
///
/// The state tree calls the persist methods synchronously inside the
/// corresponding mutation, before applying the change in memory; a
/// failure here fails the whole operation.
pub trait StatePersistence: Send + Sync {
    /// Load every persisted row, in any order
    fn load_all(&self) -> StoreResult<Vec<StateRow>>;

    /// Persist a newly created row
    fn persist_add(&self, row: &StateRow) -> StoreResult<()>;

    /// Persist an updated row
    fn persist_set(&self, row: &StateRow) -> StoreResult<()>;

    /// Remove a persisted row
    fn persist_delete(&self, row: &StateRow) -> StoreResult<()>;
}

/// In-memory store, used by tests and ephemeral hubs
#[derive(Default)]
pub struct MemoryStore {
    rows: Mutex<BTreeMap<i64, StateRow>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of persisted rows
    pub fn len(&self) -> usize {
        self.rows.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl StatePersistence for MemoryStore {
    fn load_all(&self) -> StoreResult<Vec<StateRow>> {
        Ok(self.rows.lock().unwrap().values().cloned().collect())
    }

    fn persist_add(&self, row: &StateRow) -> StoreResult<()> {
        self.rows.lock().unwrap().insert(row.id.as_i64(), row.clone());
        Ok(())
    }

    fn persist_set(&self, row: &StateRow) -> StoreResult<()> {
        self.rows.lock().unwrap().insert(row.id.as_i64(), row.clone());
        Ok(())
    }

    fn persist_delete(&self, row: &StateRow) -> StoreResult<()> {
        self.rows.lock().unwrap().remove(&row.id.as_i64());
        Ok(())
    }
}
