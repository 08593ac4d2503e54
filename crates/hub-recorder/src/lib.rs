//! Storage backends for the state tree
//!
//! Two implementations of the `StatePersistence` port: a single JSON
//! document with atomic writes, and a SQLite database.

pub mod json;
pub mod sqlite;

pub use json::JsonStore;
pub use sqlite::SqliteStore;
