//! Typed payloads for the state-change events fired by the state tree

use serde::{Deserialize, Serialize};

use crate::event::EventData;
use crate::state::NodeId;

/// Event type fired when a node is added to the state tree
pub const STATE_ADDED: &str = "state_added";
/// Event type fired when a node's value changes
pub const STATE_VALUE_CHANGED: &str = "state_value_changed";
/// Event type fired when a node's config changes
pub const STATE_UPDATED: &str = "state_updated";
/// Event type fired when a node is deleted
pub const STATE_DELETED: &str = "state_deleted";

/// Payload of a `state_added` event
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateAddedData {
    pub id: NodeId,
    pub path: String,
}

impl EventData for StateAddedData {
    fn event_type() -> &'static str {
        STATE_ADDED
    }
}

/// Payload of a `state_value_changed` event
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateValueChangedData {
    pub id: NodeId,
    pub path: String,
    /// The value after the change
    pub value: serde_json::Value,
    /// The value before the change, if the node had one
    #[serde(skip_serializing_if = "Option::is_none")]
    pub old_value: Option<serde_json::Value>,
}

impl EventData for StateValueChangedData {
    fn event_type() -> &'static str {
        STATE_VALUE_CHANGED
    }
}

/// Payload of a `state_updated` event
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateUpdatedData {
    pub id: NodeId,
    pub path: String,
}

impl EventData for StateUpdatedData {
    fn event_type() -> &'static str {
        STATE_UPDATED
    }
}

/// Payload of a `state_deleted` event
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateDeletedData {
    pub id: NodeId,
    pub path: String,
}

impl EventData for StateDeletedData {
    fn event_type() -> &'static str {
        STATE_DELETED
    }
}
