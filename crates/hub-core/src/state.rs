//! State row and value-type tags for the state tree

use serde::{Deserialize, Serialize};

/// Unique id of a state node, assigned on creation and immutable after
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default,
)]
pub struct NodeId(pub i64);

impl NodeId {
    pub fn as_i64(&self) -> i64 {
        self.0
    }
}

impl From<i64> for NodeId {
    fn from(id: i64) -> Self {
        Self(id)
    }
}

impl std::fmt::Display for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Value-type tag of a state node
///
/// The scalar tags (`float`, `int`, `bool`, `string`) constrain the values
/// a node accepts. Any other tag (`shading`, `group`, ...) marks a grouping
/// node and accepts any value. A node's type is immutable after creation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StateType(String);

impl StateType {
    pub const FLOAT: &'static str = "float";
    pub const INT: &'static str = "int";
    pub const BOOL: &'static str = "bool";
    pub const STRING: &'static str = "string";

    /// Create a state type from its tag
    pub fn new(tag: impl Into<String>) -> Self {
        Self(tag.into())
    }

    pub fn float() -> Self {
        Self::new(Self::FLOAT)
    }

    pub fn int() -> Self {
        Self::new(Self::INT)
    }

    pub fn bool() -> Self {
        Self::new(Self::BOOL)
    }

    pub fn string() -> Self {
        Self::new(Self::STRING)
    }

    /// Get the tag as a string
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Check whether a value satisfies this type
    ///
    /// `null` is accepted by every type. `bool` also accepts the integers
    /// 0 and 1, which older controllers write for flag states.
    pub fn accepts(&self, value: &serde_json::Value) -> bool {
        if value.is_null() {
            return true;
        }
        match self.0.as_str() {
            Self::FLOAT => value.is_number(),
            Self::INT => value.is_i64() || value.is_u64(),
            Self::BOOL => {
                value.is_boolean() || value.as_i64().map(|i| i == 0 || i == 1).unwrap_or(false)
            }
            Self::STRING => value.is_string(),
            _ => true,
        }
    }
}

impl From<&str> for StateType {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for StateType {
    fn from(s: String) -> Self {
        Self::new(s)
    }
}

impl std::fmt::Display for StateType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Persisted form of a state node
///
/// This is the row shape exchanged with the persistence port. The in-memory
/// tree derives its arena from these rows at startup and writes them back
/// on every mutation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateRow {
    pub id: NodeId,
    pub parent_id: Option<NodeId>,
    pub name: String,
    pub path: String,
    pub kind: StateType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub quantity: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub unit: Option<String>,
    pub value: Option<serde_json::Value>,
    #[serde(default)]
    pub config: serde_json::Map<String, serde_json::Value>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_float_accepts_numbers() {
        let t = StateType::float();
        assert!(t.accepts(&json!(1.5)));
        assert!(t.accepts(&json!(2)));
        assert!(t.accepts(&json!(null)));
        assert!(!t.accepts(&json!("1.5")));
        assert!(!t.accepts(&json!(true)));
    }

    #[test]
    fn test_bool_accepts_zero_one() {
        let t = StateType::bool();
        assert!(t.accepts(&json!(true)));
        assert!(t.accepts(&json!(false)));
        assert!(t.accepts(&json!(0)));
        assert!(t.accepts(&json!(1)));
        assert!(!t.accepts(&json!(2)));
        assert!(!t.accepts(&json!("true")));
    }

    #[test]
    fn test_grouping_types_accept_anything() {
        let t = StateType::new("shading");
        assert!(t.accepts(&json!({"area": 2.0})));
        assert!(t.accepts(&json!(null)));
        assert!(t.accepts(&json!(42)));
    }

    #[test]
    fn test_string_rejects_numbers() {
        let t = StateType::string();
        assert!(t.accepts(&json!("hello")));
        assert!(!t.accepts(&json!(3)));
    }

    #[test]
    fn test_row_roundtrip() {
        let row = StateRow {
            id: NodeId(3),
            parent_id: Some(NodeId(1)),
            name: "blind1".to_string(),
            path: "/roof/blind1".to_string(),
            kind: StateType::new("shading"),
            quantity: None,
            unit: None,
            value: None,
            config: serde_json::Map::new(),
        };
        let text = serde_json::to_string(&row).unwrap();
        let back: StateRow = serde_json::from_str(&text).unwrap();
        assert_eq!(back, row);
    }
}
