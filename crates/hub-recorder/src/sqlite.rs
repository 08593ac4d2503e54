//! SQLite store
//!
//! One `states` table, one row per node. Values and config are stored as
//! JSON text columns.

use hub_core::{NodeId, StateRow, StateType};
use hub_state_tree::{StatePersistence, StoreError, StoreResult};
use rusqlite::{params, Connection};
use std::path::Path;
use std::sync::Mutex;
use tracing::debug;

/// SQLite-backed store
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Open or create a database at the given path
    pub fn open(path: impl AsRef<Path>) -> StoreResult<Self> {
        let conn = Connection::open(path.as_ref()).map_err(db_err)?;
        Self::with_connection(conn)
    }

    /// Open an in-memory database
    pub fn open_in_memory() -> StoreResult<Self> {
        let conn = Connection::open_in_memory().map_err(db_err)?;
        Self::with_connection(conn)
    }

    fn with_connection(conn: Connection) -> StoreResult<Self> {
        conn.execute(
            "CREATE TABLE IF NOT EXISTS states (
                id        INTEGER PRIMARY KEY,
                parent_id INTEGER,
                name      TEXT NOT NULL,
                path      TEXT NOT NULL UNIQUE,
                kind      TEXT NOT NULL,
                quantity  TEXT,
                unit      TEXT,
                value     TEXT,
                config    TEXT NOT NULL DEFAULT '{}'
            )",
            [],
        )
        .map_err(db_err)?;
        debug!("Opened states database");
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }
}

fn db_err(e: rusqlite::Error) -> StoreError {
    StoreError::Database(e.to_string())
}

fn row_from_sql(sql_row: &rusqlite::Row<'_>) -> rusqlite::Result<StateRow> {
    let value: Option<String> = sql_row.get("value")?;
    let config: String = sql_row.get("config")?;
    Ok(StateRow {
        id: NodeId(sql_row.get("id")?),
        parent_id: sql_row.get::<_, Option<i64>>("parent_id")?.map(NodeId),
        name: sql_row.get("name")?,
        path: sql_row.get("path")?,
        kind: StateType::new(sql_row.get::<_, String>("kind")?),
        quantity: sql_row.get("quantity")?,
        unit: sql_row.get("unit")?,
        value: value.and_then(|v| serde_json::from_str(&v).ok()),
        config: serde_json::from_str(&config).unwrap_or_default(),
    })
}

impl StatePersistence for SqliteStore {
    fn load_all(&self) -> StoreResult<Vec<StateRow>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn
            .prepare("SELECT id, parent_id, name, path, kind, quantity, unit, value, config FROM states")
            .map_err(db_err)?;
        let rows = stmt
            .query_map([], row_from_sql)
            .map_err(db_err)?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(db_err)?;
        Ok(rows)
    }

    fn persist_add(&self, row: &StateRow) -> StoreResult<()> {
        let value = row.value.as_ref().map(|v| v.to_string());
        let config = serde_json::Value::Object(row.config.clone()).to_string();
        self.conn
            .lock()
            .unwrap()
            .execute(
                "INSERT INTO states (id, parent_id, name, path, kind, quantity, unit, value, config)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                params![
                    row.id.as_i64(),
                    row.parent_id.map(|p| p.as_i64()),
                    row.name,
                    row.path,
                    row.kind.as_str(),
                    row.quantity,
                    row.unit,
                    value,
                    config,
                ],
            )
            .map_err(db_err)?;
        Ok(())
    }

    fn persist_set(&self, row: &StateRow) -> StoreResult<()> {
        let value = row.value.as_ref().map(|v| v.to_string());
        let config = serde_json::Value::Object(row.config.clone()).to_string();
        self.conn
            .lock()
            .unwrap()
            .execute(
                "UPDATE states SET value = ?2, config = ?3 WHERE id = ?1",
                params![row.id.as_i64(), value, config],
            )
            .map_err(db_err)?;
        Ok(())
    }

    fn persist_delete(&self, row: &StateRow) -> StoreResult<()> {
        self.conn
            .lock()
            .unwrap()
            .execute("DELETE FROM states WHERE id = ?1", params![row.id.as_i64()])
            .map_err(db_err)?;
        Ok(())
    }
}
