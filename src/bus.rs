//! Named-topic event bus.
//!
//! Dispatch is synchronous and runs in subscription order over a snapshot of
//! the topic's handler list, so a handler unsubscribing mid-dispatch does
//! not stop the remaining handlers for that event.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::types::Event;

/// Topics published by the connection engine.
pub mod topic {
    pub const OPEN: &str = "open";
    pub const CLOSE: &str = "close";
    pub const WS_CLOSE: &str = "ws-close";
    pub const PHONE_CHANGE: &str = "connection-phone-change";

    /// Topic for replies whose tag had no registered waiter.
    pub fn tagged(tag: &str) -> String {
        format!("TAG:{tag}")
    }
}

type Handler = Arc<dyn Fn(&Event) + Send + Sync>;

/// Handle returned by `subscribe`, used to unsubscribe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscriptionId {
    topic: String,
    id: u64,
}

#[derive(Default)]
struct Registry {
    next_id: u64,
    topics: HashMap<String, Vec<(u64, Handler)>>,
}

/// Topic-keyed pub/sub registry.
#[derive(Default)]
pub struct EventBus {
    inner: Mutex<Registry>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler for `topic`.
    pub fn subscribe<F>(&self, topic: impl Into<String>, handler: F) -> SubscriptionId
    where
        F: Fn(&Event) + Send + Sync + 'static,
    {
        let topic = topic.into();
        let mut registry = self.inner.lock().unwrap();
        registry.next_id += 1;
        let id = registry.next_id;
        registry
            .topics
            .entry(topic.clone())
            .or_default()
            .push((id, Arc::new(handler)));
        SubscriptionId { topic, id }
    }

    /// Remove a handler. Unknown ids are ignored.
    pub fn unsubscribe(&self, sub: &SubscriptionId) {
        let mut registry = self.inner.lock().unwrap();
        if let Some(handlers) = registry.topics.get_mut(&sub.topic) {
            handlers.retain(|(id, _)| *id != sub.id);
            if handlers.is_empty() {
                registry.topics.remove(&sub.topic);
            }
        }
    }

    /// Deliver `event` to every handler subscribed to `topic`.
    pub fn publish(&self, topic: &str, event: &Event) {
        let snapshot: Vec<Handler> = {
            let registry = self.inner.lock().unwrap();
            match registry.topics.get(topic) {
                Some(handlers) => handlers.iter().map(|(_, h)| h.clone()).collect(),
                None => return,
            }
        };
        for handler in snapshot {
            handler(event);
        }
    }

    /// Number of handlers currently subscribed to `topic`.
    pub fn subscriber_count(&self, topic: &str) -> usize {
        self.inner
            .lock()
            .unwrap()
            .topics
            .get(topic)
            .map_or(0, Vec::len)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_dispatch_in_subscription_order() {
        let bus = EventBus::new();
        let order = Arc::new(Mutex::new(Vec::new()));

        for n in 0..3 {
            let order = order.clone();
            bus.subscribe("open", move |_| order.lock().unwrap().push(n));
        }

        bus.publish("open", &Event::Open);
        assert_eq!(*order.lock().unwrap(), vec![0, 1, 2]);
    }

    #[test]
    fn test_unsubscribe_stops_delivery() {
        let bus = EventBus::new();
        let hits = Arc::new(AtomicUsize::new(0));

        let hits_clone = hits.clone();
        let sub = bus.subscribe("open", move |_| {
            hits_clone.fetch_add(1, Ordering::SeqCst);
        });

        bus.publish("open", &Event::Open);
        bus.unsubscribe(&sub);
        bus.publish("open", &Event::Open);

        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert_eq!(bus.subscriber_count("open"), 0);
    }

    #[test]
    fn test_unsubscribe_during_dispatch_keeps_remaining_handlers() {
        let bus = Arc::new(EventBus::new());
        let hits = Arc::new(AtomicUsize::new(0));

        let sub_slot: Arc<Mutex<Option<SubscriptionId>>> = Arc::new(Mutex::new(None));
        let bus_clone = bus.clone();
        let slot_clone = sub_slot.clone();
        let sub = bus.subscribe("close", move |_| {
            if let Some(sub) = slot_clone.lock().unwrap().take() {
                bus_clone.unsubscribe(&sub);
            }
        });
        *sub_slot.lock().unwrap() = Some(sub);

        let hits_clone = hits.clone();
        bus.subscribe("close", move |_| {
            hits_clone.fetch_add(1, Ordering::SeqCst);
        });

        bus.publish(
            "close",
            &Event::Close {
                reason: crate::types::DisconnectReason::Intentional,
                is_reconnecting: false,
            },
        );

        // the first handler removed itself, the second still ran
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert_eq!(bus.subscriber_count("close"), 1);
    }

    #[test]
    fn test_tag_topic_name() {
        assert_eq!(topic::tagged("123.--4"), "TAG:123.--4");
    }
}
