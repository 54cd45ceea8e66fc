use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use super::types::{Event, EventKind};

type Callback = Arc<dyn Fn(&Event) + Send + Sync>;

struct Subscription {
    id: u64,
    kind: EventKind,
    callback: Callback,
}

/// Token returned by [`EventBus::subscribe`], used to unsubscribe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubscriptionId(u64);

/// Synchronous fan-out dispatcher for [`Event`]s.
///
/// `publish` delivers in subscription order to every callback whose
/// registered kind matches the event. Delivery happens on the publisher's
/// thread; a panicking callback is caught and logged so it cannot prevent
/// delivery to the remaining subscribers or poison the publisher.
///
/// The subscriber list is protected by a mutex and snapshotted before
/// iteration, so the driver's worker task may publish concurrently with
/// subscribe/unsubscribe from the caller's task, and a callback may itself
/// subscribe without deadlocking.
pub struct EventBus {
    subscribers: Mutex<Vec<Subscription>>,
    next_id: AtomicU64,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    pub fn new() -> Self {
        Self {
            subscribers: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(0),
        }
    }

    /// Register a callback for all events matching `kind`.
    pub fn subscribe<F>(&self, kind: EventKind, callback: F) -> SubscriptionId
    where
        F: Fn(&Event) + Send + Sync + 'static,
    {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let mut subscribers = self.subscribers.lock().unwrap();
        subscribers.push(Subscription {
            id,
            kind,
            callback: Arc::new(callback),
        });
        SubscriptionId(id)
    }

    /// Remove a previously registered callback. Returns whether it existed.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut subscribers = self.subscribers.lock().unwrap();
        let before = subscribers.len();
        subscribers.retain(|s| s.id != id.0);
        subscribers.len() != before
    }

    /// Deliver `event` to every matching subscriber, in subscription order.
    pub fn publish(&self, event: &Event) {
        let matching: Vec<Callback> = {
            let subscribers = self.subscribers.lock().unwrap();
            subscribers
                .iter()
                .filter(|s| s.kind.matches(event))
                .map(|s| Arc::clone(&s.callback))
                .collect()
        };

        for callback in matching {
            if catch_unwind(AssertUnwindSafe(|| callback(event))).is_err() {
                tracing::warn!(kind = %event.kind(), "event subscriber panicked");
            }
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().unwrap().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::types::LifecycleEvent;
    use std::sync::atomic::AtomicUsize;
    use uuid::Uuid;

    fn cancelled_event() -> Event {
        Event::Lifecycle(LifecycleEvent::Cancelled {
            request_id: Uuid::new_v4(),
        })
    }

    #[test]
    fn test_delivery_in_subscription_order() {
        let bus = EventBus::new();
        let seen = Arc::new(Mutex::new(Vec::new()));

        for tag in ["first", "second", "third"] {
            let seen = Arc::clone(&seen);
            bus.subscribe(EventKind::All, move |_| {
                seen.lock().unwrap().push(tag);
            });
        }

        bus.publish(&cancelled_event());
        assert_eq!(*seen.lock().unwrap(), vec!["first", "second", "third"]);
    }

    #[test]
    fn test_kind_filtering() {
        let bus = EventBus::new();
        let lifecycle_hits = Arc::new(AtomicUsize::new(0));
        let tool_hits = Arc::new(AtomicUsize::new(0));

        {
            let hits = Arc::clone(&lifecycle_hits);
            bus.subscribe(EventKind::Lifecycle, move |_| {
                hits.fetch_add(1, Ordering::SeqCst);
            });
        }
        {
            let hits = Arc::clone(&tool_hits);
            bus.subscribe(EventKind::ToolCallStarted, move |_| {
                hits.fetch_add(1, Ordering::SeqCst);
            });
        }

        bus.publish(&cancelled_event());
        assert_eq!(lifecycle_hits.load(Ordering::SeqCst), 1);
        assert_eq!(tool_hits.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_panicking_subscriber_does_not_block_delivery() {
        let bus = EventBus::new();
        let hits = Arc::new(AtomicUsize::new(0));

        bus.subscribe(EventKind::All, |_| panic!("subscriber bug"));
        {
            let hits = Arc::clone(&hits);
            bus.subscribe(EventKind::All, move |_| {
                hits.fetch_add(1, Ordering::SeqCst);
            });
        }

        bus.publish(&cancelled_event());
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_unsubscribe() {
        let bus = EventBus::new();
        let hits = Arc::new(AtomicUsize::new(0));

        let id = {
            let hits = Arc::clone(&hits);
            bus.subscribe(EventKind::All, move |_| {
                hits.fetch_add(1, Ordering::SeqCst);
            })
        };

        bus.publish(&cancelled_event());
        assert!(bus.unsubscribe(id));
        assert!(!bus.unsubscribe(id));
        bus.publish(&cancelled_event());

        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert_eq!(bus.subscriber_count(), 0);
    }

    #[test]
    fn test_subscriber_may_subscribe_during_delivery() {
        let bus = Arc::new(EventBus::new());

        {
            let bus_ref = Arc::clone(&bus);
            bus.subscribe(EventKind::All, move |_| {
                bus_ref.subscribe(EventKind::All, |_| {});
            });
        }

        bus.publish(&cancelled_event());
        assert_eq!(bus.subscriber_count(), 2);
    }

    #[test]
    fn test_concurrent_publish() {
        let bus = Arc::new(EventBus::new());
        let hits = Arc::new(AtomicUsize::new(0));

        {
            let hits = Arc::clone(&hits);
            bus.subscribe(EventKind::All, move |_| {
                hits.fetch_add(1, Ordering::SeqCst);
            });
        }

        let publishers: Vec<_> = (0..4)
            .map(|_| {
                let bus = Arc::clone(&bus);
                std::thread::spawn(move || {
                    for _ in 0..50 {
                        bus.publish(&cancelled_event());
                    }
                })
            })
            .collect();
        for handle in publishers {
            handle.join().unwrap();
        }

        assert_eq!(hits.load(Ordering::SeqCst), 200);
    }
}
