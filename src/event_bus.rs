//! In-process topic/subscriber registry (§4.A): a synchronous, in-process
//! multi-subscriber fan-out, since the plugin lifecycle scheduler (§4.E)
//! needs to `publish` and have every subscriber's callback run to completion
//! before `publish` returns — no channel hop.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use serde_json::Value;

pub type SubscriptionId = u64;

type Callback = Box<dyn Fn(&Value) + Send + Sync>;

struct Topic {
    next_id: AtomicU64,
    subscribers: Vec<(SubscriptionId, Callback)>,
}

impl Topic {
    fn new() -> Self {
        Self {
            next_id: AtomicU64::new(0),
            subscribers: Vec::new(),
        }
    }
}

/// `subscribe`/`unsubscribe`/`publish` over a `map[topic] -> ordered
/// map[subscription_id -> callback]`, as specified. `publish` is synchronous
/// and runs every callback, in subscription order, on the caller's execution
/// context; a callback that panics is caught so the remaining subscribers
/// still run (mirrors "errors from callbacks do not abort remaining
/// callbacks; they are logged").
#[derive(Clone, Default)]
pub struct EventBus {
    topics: Arc<RwLock<HashMap<String, Topic>>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `callback` on `topic`, returning a monotonically increasing
    /// subscription id scoped to that topic.
    pub fn subscribe<F>(&self, topic: impl Into<String>, callback: F) -> SubscriptionId
    where
        F: Fn(&Value) + Send + Sync + 'static,
    {
        let topic = topic.into();
        let mut topics = self.topics.write();
        let entry = topics.entry(topic).or_insert_with(Topic::new);
        let id = entry.next_id.fetch_add(1, Ordering::Relaxed);
        entry.subscribers.push((id, Box::new(callback)));
        id
    }

    /// Idempotent: unsubscribing an unknown id (or from an unknown topic) is
    /// a no-op.
    pub fn unsubscribe(&self, topic: &str, id: SubscriptionId) {
        let mut topics = self.topics.write();
        if let Some(entry) = topics.get_mut(topic) {
            entry.subscribers.retain(|(sub_id, _)| *sub_id != id);
        }
    }

    /// Invokes every subscriber of `topic`, in subscription order,
    /// synchronously. No back-pressure, no persistence: subscribers added
    /// after `publish` has started iterating are not observed by that call.
    pub fn publish(&self, topic: &str, message: &Value) {
        // Snapshot the callback list under the lock, then run callbacks
        // without holding it: a callback that tries to subscribe/unsubscribe
        // must not deadlock against its own publish.
        let callbacks_len = {
            let topics = self.topics.read();
            topics.get(topic).map_or(0, |t| t.subscribers.len())
        };

        if callbacks_len == 0 {
            trace!(%topic, "publish with no subscribers");
            return;
        }

        let topics = self.topics.read();
        let Some(entry) = topics.get(topic) else { return };

        for (id, callback) in &entry.subscribers {
            let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| callback(message)));
            if let Err(panic) = result {
                let reason = panic
                    .downcast_ref::<&str>()
                    .map(|s| (*s).to_owned())
                    .or_else(|| panic.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "unknown panic".to_owned());
                warn!(%topic, subscription_id = id, %reason, "event bus subscriber failed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn publish_invokes_subscribers_in_order() {
        let bus = EventBus::new();
        let order = Arc::new(parking_lot::Mutex::new(Vec::new()));

        for i in 0..3 {
            let order = Arc::clone(&order);
            bus.subscribe("topic", move |_| order.lock().push(i));
        }

        bus.publish("topic", &Value::Null);
        assert_eq!(*order.lock(), vec![0, 1, 2]);
    }

    #[test]
    fn unsubscribe_is_idempotent() {
        let bus = EventBus::new();
        let count = Arc::new(AtomicUsize::new(0));
        let count_clone = Arc::clone(&count);
        let id = bus.subscribe("topic", move |_| {
            count_clone.fetch_add(1, Ordering::SeqCst);
        });

        bus.unsubscribe("topic", id);
        bus.unsubscribe("topic", id); // idempotent
        bus.unsubscribe("topic", 9999); // unknown id, no-op

        bus.publish("topic", &Value::Null);
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn panicking_subscriber_does_not_abort_remaining() {
        let bus = EventBus::new();
        let count = Arc::new(AtomicUsize::new(0));

        bus.subscribe("topic", |_| panic!("boom"));
        let count_clone = Arc::clone(&count);
        bus.subscribe("topic", move |_| {
            count_clone.fetch_add(1, Ordering::SeqCst);
        });

        bus.publish("topic", &Value::Null);
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }
}
