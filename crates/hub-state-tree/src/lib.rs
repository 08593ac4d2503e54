//! Hierarchical, typed, persisted state tree with change events
//!
//! This crate provides the StateTree, the single source of truth for all
//! hub state. Nodes form a hierarchy addressed by path, are validated
//! against their declared value type, are persisted through a storage
//! port on every mutation, and fire change events on the event bus
//! tagged with the mutating actor's source id.

pub mod node;
pub mod persist;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use hub_core::events::{StateAddedData, StateDeletedData, StateUpdatedData, StateValueChangedData};
use hub_core::{NodeId, Source, StateType};
use hub_event_bus::EventBus;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, trace};

pub use node::StateNode;
pub use persist::{MemoryStore, StatePersistence, StoreError, StoreResult};

/// Errors returned by state tree operations
#[derive(Debug, Error)]
pub enum StateTreeError {
    /// A sibling with the same name already exists
    #[error("a state already exists at '{path}'")]
    DuplicatePath { path: String },

    /// The value does not satisfy the node's declared type
    #[error("value {value} does not satisfy type '{kind}' of state '{path}'")]
    TypeMismatch {
        path: String,
        kind: StateType,
        value: serde_json::Value,
    },

    /// Lookup by unknown id
    #[error("state not found: {0}")]
    NotFound(NodeId),

    /// The storage backend failed; the tree was left unchanged
    #[error("persistence failed: {0}")]
    Persistence(#[from] StoreError),
}

/// Result type for state tree operations
pub type StateTreeResult<T> = Result<T, StateTreeError>;

/// Options for creating a node
#[derive(Debug, Clone)]
pub struct NodeOptions {
    pub kind: StateType,
    pub quantity: Option<String>,
    pub unit: Option<String>,
    pub value: Option<serde_json::Value>,
    pub config: serde_json::Map<String, serde_json::Value>,
}

impl Default for NodeOptions {
    fn default() -> Self {
        Self {
            kind: StateType::float(),
            quantity: None,
            unit: None,
            value: None,
            config: serde_json::Map::new(),
        }
    }
}

impl NodeOptions {
    pub fn of_kind(kind: impl Into<StateType>) -> Self {
        Self {
            kind: kind.into(),
            ..Self::default()
        }
    }

    pub fn with_value(mut self, value: serde_json::Value) -> Self {
        self.value = Some(value);
        self
    }

    pub fn with_quantity(mut self, quantity: impl Into<String>) -> Self {
        self.quantity = Some(quantity.into());
        self
    }

    pub fn with_unit(mut self, unit: impl Into<String>) -> Self {
        self.unit = Some(unit.into());
        self
    }

    pub fn with_config(mut self, config: serde_json::Map<String, serde_json::Value>) -> Self {
        self.config = config;
        self
    }
}

/// The state tree
///
/// Nodes are stored in an arena keyed by id, with a secondary path index.
/// Mutations of a single node are linearized: validation, persistence and
/// the change event appear atomic to other mutators of the same node.
/// Mutations of different nodes are not ordered relative to each other.
pub struct StateTree {
    /// Arena of all nodes
    nodes: DashMap<NodeId, StateNode>,
    /// Path index into the arena
    paths: DashMap<String, NodeId>,
    /// Next node id to assign
    next_id: AtomicI64,
    /// Event bus for change events
    bus: Arc<EventBus>,
    /// Storage backend
    store: Arc<dyn StatePersistence>,
}

impl StateTree {
    /// Create an empty state tree
    pub fn new(bus: Arc<EventBus>, store: Arc<dyn StatePersistence>) -> Self {
        Self {
            nodes: DashMap::new(),
            paths: DashMap::new(),
            next_id: AtomicI64::new(1),
            bus,
            store,
        }
    }

    /// Create a state tree populated from the storage backend
    ///
    /// Node ids are preserved; no events are fired for loaded nodes.
    pub fn load(bus: Arc<EventBus>, store: Arc<dyn StatePersistence>) -> StateTreeResult<Self> {
        let tree = Self::new(bus, store);

        let mut rows = tree.store.load_all()?;
        rows.sort_by_key(|r| r.id);

        let mut max_id = 0;
        for row in rows {
            max_id = max_id.max(row.id.as_i64());
            let node = StateNode::from_row(row);
            tree.paths.insert(node.path.clone(), node.id);
            tree.nodes.insert(node.id, node);
        }

        // Link children from the parent references
        let ids: Vec<NodeId> = tree.nodes.iter().map(|n| *n.key()).collect();
        for id in ids {
            let parent = tree.nodes.get(&id).and_then(|n| n.parent);
            if let Some(parent_id) = parent {
                if let Some(mut parent_node) = tree.nodes.get_mut(&parent_id) {
                    parent_node.children.push(id);
                }
            }
        }

        tree.next_id.store(max_id + 1, Ordering::SeqCst);
        info!(nodes = tree.nodes.len(), "Loaded state tree");
        Ok(tree)
    }

    /// Add a node under the given parent
    ///
    /// Fails with `DuplicatePath` if a sibling with the same name exists.
    /// The row is persisted before the node becomes visible; a storage
    /// failure leaves the tree unchanged. Fires `state_added`.
    pub fn add(
        &self,
        name: &str,
        parent: Option<NodeId>,
        options: NodeOptions,
        source: &Source,
    ) -> StateTreeResult<StateNode> {
        let parent_path = match parent {
            Some(parent_id) => {
                self.nodes
                    .get(&parent_id)
                    .ok_or(StateTreeError::NotFound(parent_id))?
                    .path
                    .clone()
            }
            None => String::new(),
        };
        let path = format!("{}/{}", parent_path, name);

        if let Some(value) = &options.value {
            if !options.kind.accepts(value) {
                return Err(StateTreeError::TypeMismatch {
                    path,
                    kind: options.kind,
                    value: value.clone(),
                });
            }
        }

        let node = match self.paths.entry(path.clone()) {
            Entry::Occupied(_) => return Err(StateTreeError::DuplicatePath { path }),
            Entry::Vacant(vacant) => {
                let id = NodeId(self.next_id.fetch_add(1, Ordering::SeqCst));
                let node = StateNode {
                    id,
                    name: name.to_string(),
                    path,
                    parent,
                    children: Vec::new(),
                    kind: options.kind,
                    quantity: options.quantity,
                    unit: options.unit,
                    value: options.value,
                    config: options.config,
                };

                // Persist first; an error here must leave no trace in memory
                self.store.persist_add(&node.to_row())?;

                self.nodes.insert(id, node.clone());
                vacant.insert(id);
                node
            }
        };

        if let Some(parent_id) = parent {
            if let Some(mut parent_node) = self.nodes.get_mut(&parent_id) {
                parent_node.children.push(node.id);
            }
        }

        debug!(path = %node.path, id = %node.id, "Added state node");
        self.bus.publish_typed(
            StateAddedData {
                id: node.id,
                path: node.path.clone(),
            },
            source.clone(),
        );

        Ok(node)
    }

    /// Set a node's value
    ///
    /// The value is validated against the node's type, persisted, applied
    /// and announced as `state_value_changed` carrying `source`, all
    /// within the node's mutation scope.
    pub fn set_value(
        &self,
        id: NodeId,
        value: serde_json::Value,
        source: &Source,
    ) -> StateTreeResult<()> {
        let mut node = self.nodes.get_mut(&id).ok_or(StateTreeError::NotFound(id))?;

        if !node.kind.accepts(&value) {
            return Err(StateTreeError::TypeMismatch {
                path: node.path.clone(),
                kind: node.kind.clone(),
                value,
            });
        }

        let mut row = node.to_row();
        row.value = Some(value.clone());
        self.store.persist_set(&row)?;

        let old_value = node.value.replace(value.clone());
        trace!(path = %node.path, %value, %source, "State value changed");

        self.bus.publish_typed(
            StateValueChangedData {
                id,
                path: node.path.clone(),
                value,
                old_value,
            },
            source.clone(),
        );
        Ok(())
    }

    /// Replace a node's config, firing `state_updated`
    pub fn set_config(
        &self,
        id: NodeId,
        config: serde_json::Map<String, serde_json::Value>,
        source: &Source,
    ) -> StateTreeResult<()> {
        let mut node = self.nodes.get_mut(&id).ok_or(StateTreeError::NotFound(id))?;

        let mut row = node.to_row();
        row.config = config.clone();
        self.store.persist_set(&row)?;

        node.config = config;
        self.bus.publish_typed(
            StateUpdatedData {
                id,
                path: node.path.clone(),
            },
            source.clone(),
        );
        Ok(())
    }

    /// Look up a node by id
    pub fn get(&self, id: NodeId) -> Option<StateNode> {
        self.nodes.get(&id).map(|n| n.clone())
    }

    /// Look up a node by path
    pub fn get_path(&self, path: &str) -> Option<StateNode> {
        let id = *self.paths.get(path)?;
        self.get(id)
    }

    /// All nodes, in no particular order
    pub fn all(&self) -> Vec<StateNode> {
        self.nodes.iter().map(|n| n.value().clone()).collect()
    }

    /// Number of nodes in the tree
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Delete a node and, recursively, its children
    ///
    /// Fires `state_deleted` for every removed node, the deleted node's
    /// own event first.
    pub fn delete(&self, id: NodeId, source: &Source) -> StateTreeResult<()> {
        // Detach from the parent before tearing the subtree down
        let parent = self.nodes.get(&id).ok_or(StateTreeError::NotFound(id))?.parent;
        if let Some(parent_id) = parent {
            if let Some(mut parent_node) = self.nodes.get_mut(&parent_id) {
                parent_node.children.retain(|child| *child != id);
            }
        }

        let mut subtree = Vec::new();
        self.collect_subtree(id, &mut subtree);

        for node_id in subtree {
            if let Some((_, node)) = self.nodes.remove(&node_id) {
                self.paths.remove(&node.path);
                self.store.persist_delete(&node.to_row())?;
                debug!(path = %node.path, "Deleted state node");
                self.bus.publish_typed(
                    StateDeletedData {
                        id: node.id,
                        path: node.path,
                    },
                    source.clone(),
                );
            }
        }
        Ok(())
    }

    /// Collect a subtree's ids, parent before children
    fn collect_subtree(&self, id: NodeId, out: &mut Vec<NodeId>) {
        out.push(id);
        let children = self
            .nodes
            .get(&id)
            .map(|n| n.children.clone())
            .unwrap_or_default();
        for child in children {
            self.collect_subtree(child, out);
        }
    }
}

/// Thread-safe wrapper for StateTree
pub type SharedStateTree = Arc<StateTree>;
