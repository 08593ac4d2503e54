//! Event bus with typed pub/sub for the hub control core
//!
//! This crate provides the EventBus, the central message broker of the hub.
//! Components publish events tagged with their own source id and subscribe
//! to the event types they care about. Replies to request events ride the
//! same bus, correlated through the request's event id.

use dashmap::DashMap;
use hub_core::{Event, EventData, EventType, Source};
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::task::AbortHandle;
use tracing::{debug, error, trace, warn};

/// Default channel capacity for event subscriptions
const DEFAULT_CHANNEL_CAPACITY: usize = 1024;

/// Result type returned by registered event handlers
pub type HandlerResult = Result<(), Box<dyn std::error::Error + Send + Sync>>;

/// The event bus for publishing and subscribing to events
///
/// Publishing never blocks beyond enqueueing into the subscribers'
/// channels; delivery happens asynchronously on the subscriber side.
/// Each subscriber receives events of a given type in publish order.
/// Delivery across different subscribers is unordered.
pub struct EventBus {
    /// Map of event types to their broadcast senders
    listeners: DashMap<EventType, broadcast::Sender<Event<serde_json::Value>>>,
    /// Special sender for match-all subscribers
    match_all_sender: broadcast::Sender<Event<serde_json::Value>>,
    /// Channel capacity
    capacity: usize,
}

impl EventBus {
    /// Create a new event bus
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CHANNEL_CAPACITY)
    }

    /// Create a new event bus with specified channel capacity
    pub fn with_capacity(capacity: usize) -> Self {
        let (match_all_sender, _) = broadcast::channel(capacity);
        Self {
            listeners: DashMap::new(),
            match_all_sender,
            capacity,
        }
    }

    /// Subscribe to events of a specific type
    ///
    /// Returns a receiver that will receive all events of the given type.
    pub fn subscribe(
        &self,
        event_type: impl Into<EventType>,
    ) -> broadcast::Receiver<Event<serde_json::Value>> {
        let event_type = event_type.into();
        trace!(event_type = %event_type, "Subscribing to event type");

        if event_type.is_match_all() {
            return self.match_all_sender.subscribe();
        }

        self.listeners
            .entry(event_type)
            .or_insert_with(|| {
                let (tx, _) = broadcast::channel(self.capacity);
                tx
            })
            .subscribe()
    }

    /// Subscribe to events carrying a specific typed payload
    pub fn subscribe_typed<T: EventData + serde::de::DeserializeOwned>(
        &self,
    ) -> TypedEventReceiver<T> {
        let rx = self.subscribe(T::event_type());
        TypedEventReceiver::new(rx)
    }

    /// Subscribe to all events
    pub fn subscribe_all(&self) -> broadcast::Receiver<Event<serde_json::Value>> {
        self.match_all_sender.subscribe()
    }

    /// Register a handler for events of a specific type
    ///
    /// The handler runs on its own task, receiving events in publish order.
    /// A handler returning an error is logged and delivery continues; a
    /// failing handler never affects other subscribers. The `actor` id is
    /// used for logging and lets the handler compare event sources against
    /// its own id. Returns a token that cancels the subscription.
    pub fn subscribe_handler<F>(
        &self,
        actor: Source,
        event_type: impl Into<EventType>,
        handler: F,
    ) -> Subscription
    where
        F: Fn(Event<serde_json::Value>) -> HandlerResult + Send + Sync + 'static,
    {
        let event_type = event_type.into();
        let mut rx = self.subscribe(event_type.clone());
        let task_actor = actor.clone();
        let task_type = event_type.clone();

        let handle = tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(event) => {
                        if let Err(e) = handler(event) {
                            error!(
                                actor = %task_actor,
                                event_type = %task_type,
                                error = %e,
                                "Event handler failed"
                            );
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!(actor = %task_actor, lagged = n, "Event handler lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });

        Subscription {
            actor,
            event_type,
            abort: handle.abort_handle(),
        }
    }

    /// Publish an event to all subscribers of its type
    ///
    /// The event is delivered to all subscribers of the specific event
    /// type and to all match-all subscribers.
    pub fn publish(&self, event: Event<serde_json::Value>) {
        debug!(event_type = %event.event_type, source = %event.source, "Publishing event");

        // Send errors just mean no active receivers
        if let Some(sender) = self.listeners.get(&event.event_type) {
            let _ = sender.send(event.clone());
        }

        let _ = self.match_all_sender.send(event);
    }

    /// Publish a typed event
    pub fn publish_typed<T: EventData + serde::Serialize>(&self, data: T, source: Source) {
        let json_data = serde_json::to_value(&data).unwrap_or_default();
        self.publish(Event::new(T::event_type(), json_data, source));
    }

    /// Publish a reply to a request event
    ///
    /// The reply carries the request's event id in `reply_to`, so the
    /// requester can match it on the same asynchronous bus.
    pub fn reply(&self, request: &Event<serde_json::Value>, data: serde_json::Value, source: Source) {
        let event = Event::new(EventType::reply(), data, source).with_reply_to(request.id.clone());
        self.publish(event);
    }

    /// Get the number of event types with active subscriptions
    pub fn listener_count(&self) -> usize {
        self.listeners.len()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

/// A cancellable handle to a registered event handler
///
/// Dropping the token leaves the handler running; call [`Subscription::cancel`]
/// to stop it.
pub struct Subscription {
    actor: Source,
    event_type: EventType,
    abort: AbortHandle,
}

impl Subscription {
    /// The actor this subscription was registered for
    pub fn actor(&self) -> &Source {
        &self.actor
    }

    /// The event type this subscription listens to
    pub fn event_type(&self) -> &EventType {
        &self.event_type
    }

    /// Stop the handler task
    pub fn cancel(&self) {
        trace!(actor = %self.actor, event_type = %self.event_type, "Cancelling subscription");
        self.abort.abort();
    }
}

/// A receiver for typed events
pub struct TypedEventReceiver<T> {
    rx: broadcast::Receiver<Event<serde_json::Value>>,
    _phantom: std::marker::PhantomData<T>,
}

impl<T: EventData + serde::de::DeserializeOwned> TypedEventReceiver<T> {
    fn new(rx: broadcast::Receiver<Event<serde_json::Value>>) -> Self {
        Self {
            rx,
            _phantom: std::marker::PhantomData,
        }
    }

    /// Receive the next typed event
    ///
    /// Events whose payload fails to deserialize are skipped.
    pub async fn recv(&mut self) -> Result<Event<T>, broadcast::error::RecvError> {
        loop {
            let event = self.rx.recv().await?;
            if let Ok(data) = serde_json::from_value::<T>(event.data.clone()) {
                return Ok(Event {
                    id: event.id,
                    event_type: event.event_type,
                    data,
                    source: event.source,
                    reply_to: event.reply_to,
                    time_fired: event.time_fired,
                });
            }
        }
    }
}

/// Thread-safe wrapper for EventBus
pub type SharedEventBus = Arc<EventBus>;

#[cfg(test)]
mod tests {
    use super::*;
    use hub_core::events::StateValueChangedData;
    use hub_core::NodeId;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn test_subscribe_and_publish() {
        let bus = EventBus::new();
        let mut rx = bus.subscribe("test_event");

        let event = Event::new("test_event", json!({"key": "value"}), Source::new("test"));
        bus.publish(event.clone());

        let received = rx.recv().await.unwrap();
        assert_eq!(received.event_type.as_str(), "test_event");
        assert_eq!(received.data["key"], "value");
        assert_eq!(received.source.as_str(), "test");
    }

    #[tokio::test]
    async fn test_match_all_subscription() {
        let bus = EventBus::new();
        let mut rx = bus.subscribe_all();

        bus.publish(Event::new("event_a", json!({}), Source::new("test")));
        bus.publish(Event::new("event_b", json!({}), Source::new("test")));

        let event1 = rx.recv().await.unwrap();
        let event2 = rx.recv().await.unwrap();

        assert_eq!(event1.event_type.as_str(), "event_a");
        assert_eq!(event2.event_type.as_str(), "event_b");
    }

    #[tokio::test]
    async fn test_typed_subscription() {
        let bus = EventBus::new();
        let mut rx = bus.subscribe_typed::<StateValueChangedData>();

        let data = StateValueChangedData {
            id: NodeId(7),
            path: "/roof/blind1/position".to_string(),
            value: json!(0.4),
            old_value: Some(json!(0.0)),
        };
        bus.publish_typed(data, Source::new("websocket"));

        let received = rx.recv().await.unwrap();
        assert_eq!(received.data.id, NodeId(7));
        assert_eq!(received.data.value, json!(0.4));
        assert_eq!(received.source.as_str(), "websocket");
    }

    #[tokio::test]
    async fn test_fifo_per_subscriber() {
        let bus = EventBus::new();
        let mut rx = bus.subscribe("test_event");

        for n in 0..10 {
            bus.publish(Event::new("test_event", json!({"n": n}), Source::new("test")));
        }

        for n in 0..10 {
            let event = rx.recv().await.unwrap();
            assert_eq!(event.data["n"], n);
        }
    }

    #[tokio::test]
    async fn test_no_cross_event_pollution() {
        let bus = EventBus::new();
        let mut rx_a = bus.subscribe("event_a");
        let mut rx_b = bus.subscribe("event_b");

        bus.publish(Event::new("event_a", json!({"type": "a"}), Source::new("test")));

        let received = rx_a.recv().await.unwrap();
        assert_eq!(received.data["type"], "a");
        assert!(rx_b.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_reply_correlation() {
        let bus = EventBus::new();
        let mut rx = bus.subscribe(EventType::reply());

        let request = Event::new("get_state", json!({"path": "/a"}), Source::new("websocket"));
        bus.reply(&request, json!({"value": 1.0}), Source::new("states"));

        let reply = rx.recv().await.unwrap();
        assert!(reply.is_reply_to(&request));
        assert_eq!(reply.data["value"], 1.0);
        assert_eq!(reply.source.as_str(), "states");
    }

    #[tokio::test]
    async fn test_handler_error_does_not_stop_delivery() {
        let bus = EventBus::new();
        let failing_calls = Arc::new(AtomicUsize::new(0));
        let ok_calls = Arc::new(AtomicUsize::new(0));

        let calls = failing_calls.clone();
        let _sub1 = bus.subscribe_handler(Source::new("failing"), "test_event", move |_| {
            calls.fetch_add(1, Ordering::SeqCst);
            Err("boom".into())
        });
        let calls = ok_calls.clone();
        let _sub2 = bus.subscribe_handler(Source::new("ok"), "test_event", move |_| {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });

        bus.publish(Event::new("test_event", json!({}), Source::new("test")));
        bus.publish(Event::new("test_event", json!({}), Source::new("test")));

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(failing_calls.load(Ordering::SeqCst), 2);
        assert_eq!(ok_calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_subscription_cancel() {
        let bus = EventBus::new();
        let calls = Arc::new(AtomicUsize::new(0));

        let handler_calls = calls.clone();
        let sub = bus.subscribe_handler(Source::new("counter"), "test_event", move |_| {
            handler_calls.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });

        bus.publish(Event::new("test_event", json!({}), Source::new("test")));
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        sub.cancel();
        tokio::time::sleep(Duration::from_millis(10)).await;
        bus.publish(Event::new("test_event", json!({}), Source::new("test")));
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
