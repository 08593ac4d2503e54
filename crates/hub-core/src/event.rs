//! Event envelope for the hub event bus

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use ulid::Ulid;

use crate::Source;

/// Trait for typed event payloads
///
/// Implement this trait for any data type that should be carried by events.
pub trait EventData: Clone + Send + Sync + 'static {
    /// The event type string for this payload type
    fn event_type() -> &'static str;
}

/// Event type identifier
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EventType(String);

impl EventType {
    /// Create a new event type
    pub fn new(event_type: impl Into<String>) -> Self {
        Self(event_type.into())
    }

    /// Get the event type as a string
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Special event type that matches all events
    pub fn match_all() -> Self {
        Self("*".to_string())
    }

    /// Check if this is the match-all event type
    pub fn is_match_all(&self) -> bool {
        self.0 == "*"
    }

    /// Event type carrying replies to request events
    pub fn reply() -> Self {
        Self("reply".to_string())
    }
}

impl From<&str> for EventType {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for EventType {
    fn from(s: String) -> Self {
        Self::new(s)
    }
}

impl std::fmt::Display for EventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// An event fired on the event bus
///
/// Events are immutable once fired. The `id` doubles as the correlation id
/// for request/reply exchanges: a reply carries the request's id in its
/// `reply_to` field. The `source` identifies the actor that produced the
/// event and is the loop-prevention key for components that react to
/// state changes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event<T = serde_json::Value> {
    /// Unique event id (ULID), used as the correlation id for replies
    pub id: String,

    /// The type of event
    pub event_type: EventType,

    /// The event payload
    pub data: T,

    /// Actor that produced the event
    pub source: Source,

    /// Correlation id of the request this event replies to, if any
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reply_to: Option<String>,

    /// When the event was fired
    pub time_fired: DateTime<Utc>,
}

impl<T> Event<T> {
    /// Create a new event with a fresh id and current timestamp
    pub fn new(event_type: impl Into<EventType>, data: T, source: Source) -> Self {
        Self {
            id: Ulid::new().to_string(),
            event_type: event_type.into(),
            data,
            source,
            reply_to: None,
            time_fired: Utc::now(),
        }
    }

    /// Mark this event as a reply to the given correlation id
    pub fn with_reply_to(mut self, correlation_id: impl Into<String>) -> Self {
        self.reply_to = Some(correlation_id.into());
        self
    }

    /// Check whether this event is a reply to the given request event
    pub fn is_reply_to<U>(&self, request: &Event<U>) -> bool {
        self.reply_to.as_deref() == Some(request.id.as_str())
    }
}

impl<T: EventData> Event<T> {
    /// Create a typed event from an EventData payload
    pub fn typed(data: T, source: Source) -> Self {
        Self::new(T::event_type(), data, source)
    }
}
