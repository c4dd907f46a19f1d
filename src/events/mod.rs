//! In-process pub/sub event bus.
//!
//! Decouples the capability managers (publishers) from the transports
//! (subscribers). Events published before any subscriber exists are queued
//! and drained, in publish order, to the first matching subscriber.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use serde_json::Value;
use tracing::{debug, trace};

// ===== Standard Event Types =====

pub const EVENT_TOOLS_LIST_CHANGED: &str = "notifications/tools/list_changed";
pub const EVENT_RESOURCES_LIST_CHANGED: &str = "notifications/resources/list_changed";
pub const EVENT_RESOURCES_UPDATED: &str = "notifications/resources/updated";
pub const EVENT_PROMPTS_LIST_CHANGED: &str = "notifications/prompts/list_changed";
pub const EVENT_MESSAGE: &str = "notifications/message";
pub const EVENT_PROGRESS: &str = "notifications/progress";
pub const EVENT_CANCELLED: &str = "notifications/cancelled";

/// Every event type a transport forwards to clients. The event-type string
/// doubles as the JSON-RPC notification method name.
pub const STANDARD_EVENTS: [&str; 7] = [
    EVENT_TOOLS_LIST_CHANGED,
    EVENT_RESOURCES_LIST_CHANGED,
    EVENT_RESOURCES_UPDATED,
    EVENT_PROMPTS_LIST_CHANGED,
    EVENT_MESSAGE,
    EVENT_PROGRESS,
    EVENT_CANCELLED,
];

/// Subscriber callback. Invoked with the event type and payload, always with
/// the bus lock released. Callbacks must not block.
pub type EventCallback = Arc<dyn Fn(&str, &Value) + Send + Sync>;

#[derive(Default)]
struct BusInner {
    /// (event type, callback) pairs in subscription order.
    subscribers: Vec<(String, EventCallback)>,
    /// Events published with no matching subscriber, in publish order.
    pending: VecDeque<(String, Value)>,
}

/// Pub/sub bus shared by managers and transports.
///
/// Constructed once at startup and passed by `Arc` through the dependency
/// graph so tests can instantiate a fresh bus per case.
#[derive(Default)]
pub struct EventBus {
    inner: Mutex<BusInner>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a callback for an event type.
    ///
    /// Idempotent for the same (event type, callback) pair, compared by
    /// callback identity. On first registration, all pending events of that
    /// type are drained and delivered to the new callback in publish order.
    pub fn subscribe(&self, event_type: &str, callback: EventCallback) {
        let drained: Vec<(String, Value)> = {
            let mut inner = self.inner.lock().expect("event bus lock poisoned");

            let already = inner
                .subscribers
                .iter()
                .any(|(t, cb)| t == event_type && Arc::ptr_eq(cb, &callback));
            if already {
                return;
            }

            inner
                .subscribers
                .push((event_type.to_string(), callback.clone()));

            let mut drained = Vec::new();
            let mut kept = VecDeque::with_capacity(inner.pending.len());
            for (t, payload) in inner.pending.drain(..) {
                if t == event_type {
                    drained.push((t, payload));
                } else {
                    kept.push_back((t, payload));
                }
            }
            inner.pending = kept;
            drained
        };

        if !drained.is_empty() {
            debug!(
                "Draining {} pending event(s) for {}",
                drained.len(),
                event_type
            );
        }
        for (t, payload) in drained {
            callback(&t, &payload);
        }
    }

    /// Remove a previously registered (event type, callback) pair.
    /// No-op when absent.
    pub fn unsubscribe(&self, event_type: &str, callback: &EventCallback) {
        let mut inner = self.inner.lock().expect("event bus lock poisoned");
        inner
            .subscribers
            .retain(|(t, cb)| !(t == event_type && Arc::ptr_eq(cb, callback)));
    }

    /// Remove every subscriber for an event type.
    pub fn unsubscribe_all(&self, event_type: &str) {
        let mut inner = self.inner.lock().expect("event bus lock poisoned");
        inner.subscribers.retain(|(t, _)| t != event_type);
    }

    /// Publish an event.
    ///
    /// With no matching subscriber, the event is queued. Otherwise the
    /// subscriber list is snapshotted under the lock and each callback is
    /// invoked with the lock released.
    pub fn publish(&self, event_type: &str, payload: Value) {
        let callbacks: Vec<EventCallback> = {
            let mut inner = self.inner.lock().expect("event bus lock poisoned");
            let matching: Vec<EventCallback> = inner
                .subscribers
                .iter()
                .filter(|(t, _)| t == event_type)
                .map(|(_, cb)| cb.clone())
                .collect();

            if matching.is_empty() {
                trace!("No subscriber for {event_type}, queueing");
                inner.pending.push_back((event_type.to_string(), payload));
                return;
            }
            matching
        };

        for cb in callbacks {
            cb(event_type, &payload);
        }
    }

    /// Whether any subscriber is registered for the event type.
    pub fn has_subscribers(&self, event_type: &str) -> bool {
        let inner = self.inner.lock().expect("event bus lock poisoned");
        inner.subscribers.iter().any(|(t, _)| t == event_type)
    }

    /// Number of queued events for the event type.
    pub fn pending_count(&self, event_type: &str) -> usize {
        let inner = self.inner.lock().expect("event bus lock poisoned");
        inner.pending.iter().filter(|(t, _)| t == event_type).count()
    }

    /// Drop queued events for the event type.
    pub fn clear_pending(&self, event_type: &str) {
        let mut inner = self.inner.lock().expect("event bus lock poisoned");
        inner.pending.retain(|(t, _)| t != event_type);
    }

    /// Drop every queued event.
    pub fn clear_all_pending(&self) {
        let mut inner = self.inner.lock().expect("event bus lock poisoned");
        inner.pending.clear();
    }

    /// Total subscriber count across all event types.
    pub fn subscriber_count(&self) -> usize {
        let inner = self.inner.lock().expect("event bus lock poisoned");
        inner.subscribers.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn counting_callback(counter: Arc<AtomicUsize>) -> EventCallback {
        Arc::new(move |_, _| {
            counter.fetch_add(1, Ordering::SeqCst);
        })
    }

    #[test]
    fn test_publish_delivers_to_subscriber() {
        let bus = EventBus::new();
        let count = Arc::new(AtomicUsize::new(0));
        bus.subscribe(EVENT_MESSAGE, counting_callback(count.clone()));

        bus.publish(EVENT_MESSAGE, json!({"level": "info"}));
        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert_eq!(bus.pending_count(EVENT_MESSAGE), 0);
    }

    #[test]
    fn test_publish_without_subscriber_queues() {
        let bus = EventBus::new();
        bus.publish(EVENT_PROGRESS, json!({"progress": 1}));
        bus.publish(EVENT_PROGRESS, json!({"progress": 2}));

        assert_eq!(bus.pending_count(EVENT_PROGRESS), 2);
        assert!(!bus.has_subscribers(EVENT_PROGRESS));
    }

    #[test]
    fn test_subscribe_drains_pending_in_order() {
        let bus = EventBus::new();
        bus.publish(EVENT_PROGRESS, json!({"n": 1}));
        bus.publish(EVENT_MESSAGE, json!({"n": 99}));
        bus.publish(EVENT_PROGRESS, json!({"n": 2}));

        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen_cb = seen.clone();
        bus.subscribe(
            EVENT_PROGRESS,
            Arc::new(move |_, payload| {
                seen_cb.lock().unwrap().push(payload["n"].as_i64().unwrap());
            }),
        );

        assert_eq!(*seen.lock().unwrap(), vec![1, 2]);
        assert_eq!(bus.pending_count(EVENT_PROGRESS), 0);
        // Unrelated pending events survive the drain.
        assert_eq!(bus.pending_count(EVENT_MESSAGE), 1);
    }

    #[test]
    fn test_pending_delivered_only_once() {
        let bus = EventBus::new();
        bus.publish(EVENT_CANCELLED, json!({}));

        let first = Arc::new(AtomicUsize::new(0));
        let second = Arc::new(AtomicUsize::new(0));
        bus.subscribe(EVENT_CANCELLED, counting_callback(first.clone()));
        bus.subscribe(EVENT_CANCELLED, counting_callback(second.clone()));

        assert_eq!(first.load(Ordering::SeqCst), 1);
        assert_eq!(second.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_subscribe_idempotent_for_same_callback() {
        let bus = EventBus::new();
        let count = Arc::new(AtomicUsize::new(0));
        let cb = counting_callback(count.clone());

        bus.subscribe(EVENT_MESSAGE, cb.clone());
        bus.subscribe(EVENT_MESSAGE, cb.clone());
        assert_eq!(bus.subscriber_count(), 1);

        bus.publish(EVENT_MESSAGE, json!({}));
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_unsubscribe() {
        let bus = EventBus::new();
        let count = Arc::new(AtomicUsize::new(0));
        let cb = counting_callback(count.clone());

        bus.subscribe(EVENT_MESSAGE, cb.clone());
        bus.unsubscribe(EVENT_MESSAGE, &cb);
        assert_eq!(bus.subscriber_count(), 0);

        // Publish after unsubscribe queues again.
        bus.publish(EVENT_MESSAGE, json!({}));
        assert_eq!(count.load(Ordering::SeqCst), 0);
        assert_eq!(bus.pending_count(EVENT_MESSAGE), 1);

        // Unsubscribing an unknown callback is a no-op.
        bus.unsubscribe(EVENT_MESSAGE, &counting_callback(count.clone()));
    }

    #[test]
    fn test_unsubscribe_all_and_clear_pending() {
        let bus = EventBus::new();
        let count = Arc::new(AtomicUsize::new(0));
        bus.subscribe(EVENT_MESSAGE, counting_callback(count.clone()));
        bus.subscribe(EVENT_MESSAGE, counting_callback(count.clone()));
        assert_eq!(bus.subscriber_count(), 2);

        bus.unsubscribe_all(EVENT_MESSAGE);
        assert_eq!(bus.subscriber_count(), 0);

        bus.publish(EVENT_MESSAGE, json!({}));
        bus.publish(EVENT_PROGRESS, json!({}));
        bus.clear_pending(EVENT_MESSAGE);
        assert_eq!(bus.pending_count(EVENT_MESSAGE), 0);
        assert_eq!(bus.pending_count(EVENT_PROGRESS), 1);

        bus.clear_all_pending();
        assert_eq!(bus.pending_count(EVENT_PROGRESS), 0);
    }

    #[test]
    fn test_publish_from_multiple_threads() {
        let bus = Arc::new(EventBus::new());
        let count = Arc::new(AtomicUsize::new(0));
        bus.subscribe(EVENT_PROGRESS, counting_callback(count.clone()));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let bus = bus.clone();
                std::thread::spawn(move || {
                    for i in 0..50 {
                        bus.publish(EVENT_PROGRESS, json!({ "i": i }));
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }

        assert_eq!(count.load(Ordering::SeqCst), 400);
    }
}
