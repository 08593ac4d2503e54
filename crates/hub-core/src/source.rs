//! Source type identifying the actor that produced an event or mutation

use serde::{Deserialize, Serialize};

/// Opaque identifier for the component that produced an event or mutation
///
/// Every event and every state mutation carries a Source. Components that
/// both write state and react to state changes compare the event source
/// against their own id to avoid re-triggering themselves after their
/// own writes.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Source(String);

impl Source {
    /// Create a new source id
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Get the source id as a string
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for Source {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for Source {
    fn from(s: String) -> Self {
        Self::new(s)
    }
}

impl std::fmt::Display for Source {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}
