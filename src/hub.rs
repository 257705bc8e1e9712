//! ==============================================================================
//! hub.rs - real-time fan-out of new readings
//! ==============================================================================
//!
//! purpose:
//!     keeps the set of live subscribers (one per websocket connection) and
//!     pushes every freshly stored reading to all of them.
//!
//! delivery model:
//!     - each subscriber owns a bounded queue; publish never blocks on it
//!     - a full queue drops the event for that subscriber only
//!     - a closed queue removes the subscriber
//!     - publishes are serialized under the registry lock, so every
//!       subscriber sees events in the same order
//!     - no replay: a subscriber only sees events published after it joined
//!
//! relationships:
//!     - used by: ingest.rs (publish), routes.rs (websocket subscribers)
//!
//! ==============================================================================

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, Weak};

use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::debug;

use crate::domain::{HubEvent, Reading};

pub type SubscriberId = u64;

type Registry = Mutex<HashMap<SubscriberId, mpsc::Sender<Arc<HubEvent>>>>;

struct HubInner {
    subscribers: Registry,
    next_id: AtomicU64,
    buffer: usize,
}

/// cheap to clone handle to the shared subscriber registry
#[derive(Clone)]
pub struct BroadcastHub {
    inner: Arc<HubInner>,
}

/// outcome of one publish, for logging
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PublishReport {
    pub delivered: usize,
    pub dropped: usize,
    pub pruned: usize,
}

impl BroadcastHub {
    /// `buffer` is the per-subscriber queue depth
    pub fn new(buffer: usize) -> Self {
        Self {
            inner: Arc::new(HubInner {
                subscribers: Mutex::new(HashMap::new()),
                next_id: AtomicU64::new(1),
                buffer: buffer.max(1),
            }),
        }
    }

    pub fn subscribe(&self) -> Subscription {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::channel(self.inner.buffer);
        self.inner
            .subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id, tx);
        debug!(subscriber = id, "subscriber joined");

        Subscription {
            id,
            rx,
            hub: Arc::downgrade(&self.inner),
        }
    }

    /// returns whether the subscriber was still registered
    pub fn unsubscribe(&self, id: SubscriberId) -> bool {
        remove(&self.inner.subscribers, id)
    }

    pub fn subscriber_count(&self) -> usize {
        self.inner
            .subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// best effort delivery to every current subscriber
    pub fn publish(&self, reading: Reading) -> PublishReport {
        let event = Arc::new(HubEvent::sensor_data(reading));
        let mut report = PublishReport::default();

        let mut subscribers = self
            .inner
            .subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner);

        subscribers.retain(|id, tx| match tx.try_send(Arc::clone(&event)) {
            Ok(()) => {
                report.delivered += 1;
                true
            }
            Err(TrySendError::Full(_)) => {
                debug!(subscriber = id, "subscriber queue full, event dropped");
                report.dropped += 1;
                true
            }
            Err(TrySendError::Closed(_)) => {
                debug!(subscriber = id, "subscriber gone, pruning");
                report.pruned += 1;
                false
            }
        });

        report
    }
}

fn remove(registry: &Registry, id: SubscriberId) -> bool {
    let removed = registry
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .remove(&id)
        .is_some();
    if removed {
        debug!(subscriber = id, "subscriber left");
    }
    removed
}

/// a live listener; dropping it unsubscribes
pub struct Subscription {
    id: SubscriberId,
    rx: mpsc::Receiver<Arc<HubEvent>>,
    hub: Weak<HubInner>,
}

impl Subscription {
    pub fn id(&self) -> SubscriberId {
        self.id
    }

    /// next event, or None once the hub is gone
    pub async fn recv(&mut self) -> Option<Arc<HubEvent>> {
        self.rx.recv().await
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(inner) = self.hub.upgrade() {
            remove(&inner.subscribers, self.id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::SensorSubmission;
    use chrono::Utc;
    use serde_json::json;

    fn reading(temp: i64) -> Reading {
        SensorSubmission {
            temperature: Some(json!(temp)),
            ..Default::default()
        }
        .into_reading(Utc::now())
    }

    fn temperature(event: &HubEvent) -> i64 {
        event.data.temperature.as_ref().and_then(|v| v.as_i64()).unwrap()
    }

    #[tokio::test]
    async fn subscribers_see_publish_order() {
        let hub = BroadcastHub::new(8);
        let mut a = hub.subscribe();
        let mut b = hub.subscribe();

        hub.publish(reading(1));
        hub.publish(reading(2));

        for sub in [&mut a, &mut b] {
            assert_eq!(temperature(&sub.recv().await.unwrap()), 1);
            assert_eq!(temperature(&sub.recv().await.unwrap()), 2);
        }
    }

    #[tokio::test]
    async fn late_subscriber_gets_no_backlog() {
        let hub = BroadcastHub::new(8);
        let mut early = hub.subscribe();

        hub.publish(reading(1));
        let mut late = hub.subscribe();
        hub.publish(reading(2));

        assert_eq!(temperature(&early.recv().await.unwrap()), 1);
        assert_eq!(temperature(&early.recv().await.unwrap()), 2);
        assert_eq!(temperature(&late.recv().await.unwrap()), 2);
        assert!(late.rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn full_subscriber_does_not_block_others() {
        let hub = BroadcastHub::new(1);
        let _stalled = hub.subscribe();
        let mut live = hub.subscribe();

        let first = hub.publish(reading(1));
        assert_eq!(first.delivered, 2);
        assert_eq!(temperature(&live.recv().await.unwrap()), 1);

        let second = hub.publish(reading(2));
        assert_eq!(second, PublishReport { delivered: 1, dropped: 1, pruned: 0 });
        assert_eq!(temperature(&live.recv().await.unwrap()), 2);
        assert_eq!(hub.subscriber_count(), 2);
    }

    #[test]
    fn unsubscribe_is_idempotent() {
        let hub = BroadcastHub::new(4);
        let sub = hub.subscribe();
        let id = sub.id();

        assert!(hub.unsubscribe(id));
        assert!(!hub.unsubscribe(id));
        drop(sub);
        assert_eq!(hub.subscriber_count(), 0);
    }

    #[test]
    fn dropping_subscription_unsubscribes() {
        let hub = BroadcastHub::new(4);
        let sub = hub.subscribe();
        assert_eq!(hub.subscriber_count(), 1);
        drop(sub);
        assert_eq!(hub.subscriber_count(), 0);

        let report = hub.publish(reading(1));
        assert_eq!(report, PublishReport::default());
    }

    #[test]
    fn closed_subscriber_is_pruned_on_publish() {
        let hub = BroadcastHub::new(4);
        let mut sub = hub.subscribe();
        sub.rx.close();

        let report = hub.publish(reading(1));
        assert_eq!(report, PublishReport { delivered: 0, dropped: 0, pruned: 1 });
        assert_eq!(hub.subscriber_count(), 0);
    }
}
