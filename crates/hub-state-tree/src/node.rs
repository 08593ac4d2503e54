//! In-memory state node

use hub_core::{NodeId, StateRow, StateType};
use serde::{Deserialize, Serialize};

/// A node in the state tree
///
/// Nodes live in an arena keyed by id; parent and children are id
/// references, never owning pointers. The path is the concatenation of
/// ancestor names and is unique tree-wide. Id, path and kind are
/// immutable after creation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateNode {
    pub id: NodeId,
    pub name: String,
    pub path: String,
    pub parent: Option<NodeId>,
    pub children: Vec<NodeId>,
    pub kind: StateType,
    pub quantity: Option<String>,
    pub unit: Option<String>,
    pub value: Option<serde_json::Value>,
    pub config: serde_json::Map<String, serde_json::Value>,
}

impl StateNode {
    /// Build a node from a persisted row; children are linked separately
    pub fn from_row(row: StateRow) -> Self {
        Self {
            id: row.id,
            name: row.name,
            path: row.path,
            parent: row.parent_id,
            children: Vec::new(),
            kind: row.kind,
            quantity: row.quantity,
            unit: row.unit,
            value: row.value,
            config: row.config,
        }
    }

    /// Persisted form of this node
    pub fn to_row(&self) -> StateRow {
        StateRow {
            id: self.id,
            parent_id: self.parent,
            name: self.name.clone(),
            path: self.path.clone(),
            kind: self.kind.clone(),
            quantity: self.quantity.clone(),
            unit: self.unit.clone(),
            value: self.value.clone(),
            config: self.config.clone(),
        }
    }

    /// The node's value as a float, if it has one
    pub fn value_f64(&self) -> Option<f64> {
        self.value.as_ref().and_then(|v| v.as_f64())
    }

    /// The node's value as a bool; 0/1 integers count as bools
    pub fn value_bool(&self) -> Option<bool> {
        match self.value.as_ref()? {
            serde_json::Value::Bool(b) => Some(*b),
            v => v.as_i64().map(|i| i != 0),
        }
    }

    /// Read a float from the node's config, falling back to a default
    pub fn config_f64(&self, key: &str, default: f64) -> f64 {
        self.config.get(key).and_then(|v| v.as_f64()).unwrap_or(default)
    }
}
