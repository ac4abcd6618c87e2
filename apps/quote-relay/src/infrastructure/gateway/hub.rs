//! Subscriber Hub
//!
//! In-process [`ClientRegistry`] backed by one bounded queue per connected
//! subscriber. The gateway's per-connection writer task drains the queue.

use std::collections::{HashMap, HashSet};

use bytes::Bytes;
use parking_lot::RwLock;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

use crate::application::ports::{ClientRegistry, DeliveryError};
use crate::domain::feed::{SubscriberId, SubscriptionKey};
use crate::domain::subscription::{SubscriptionChanges, SubscriptionManager, SubscriptionStats};
use crate::infrastructure::metrics;

/// Registry of live subscriber connections.
///
/// # Example
///
/// ```rust
/// use bytes::Bytes;
/// use quote_relay::application::ports::ClientRegistry;
/// use quote_relay::infrastructure::gateway::SubscriberHub;
///
/// let hub = SubscriberHub::new();
/// let (id, mut rx) = hub.register(16);
///
/// hub.subscribe(id, &["btcusdt".to_string()]).unwrap();
/// assert!(hub.list_subscribers("btcusdt").contains(&id));
///
/// hub.send_to_one(id, Bytes::from_static(b"{}")).unwrap();
/// assert_eq!(rx.try_recv().unwrap(), Bytes::from_static(b"{}"));
/// ```
#[derive(Debug, Default)]
pub struct SubscriberHub {
    queues: RwLock<HashMap<SubscriberId, mpsc::Sender<Bytes>>>,
    subscriptions: SubscriptionManager,
}

impl SubscriberHub {
    /// Create an empty hub.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a subscriber with an outbound queue of `capacity` payloads.
    ///
    /// # Panics
    ///
    /// Panics if `capacity` is zero.
    pub fn register(&self, capacity: usize) -> (SubscriberId, mpsc::Receiver<Bytes>) {
        let (tx, rx) = mpsc::channel(capacity);
        let mut queues = self.queues.write();

        let id = loop {
            let candidate = uuid::Uuid::new_v4().as_u64_pair().0;
            if candidate != 0 && !queues.contains_key(&candidate) {
                break candidate;
            }
        };
        queues.insert(id, tx);
        let count = queues.len();
        drop(queues);

        metrics::set_subscribers(count);
        tracing::debug!(subscriber = id, "Subscriber registered");
        (id, rx)
    }

    /// Remove a subscriber and every key it held.
    ///
    /// Dropping the queue sender ends the subscriber's writer task once the
    /// queue drains.
    pub fn unregister(&self, subscriber: SubscriberId) -> SubscriptionChanges {
        let mut queues = self.queues.write();
        let removed = queues.remove(&subscriber).is_some();
        let count = queues.len();
        drop(queues);

        let changes = self.subscriptions.subscriber_disconnected(subscriber);
        if removed {
            metrics::set_subscribers(count);
            tracing::debug!(subscriber, released = changes.removed.len(), "Subscriber unregistered");
        }
        changes
    }

    /// Add keys for a registered subscriber.
    ///
    /// # Errors
    ///
    /// Returns [`DeliveryError::UnknownSubscriber`] if the id is not registered.
    pub fn subscribe(
        &self,
        subscriber: SubscriberId,
        keys: &[SubscriptionKey],
    ) -> Result<SubscriptionChanges, DeliveryError> {
        let queues = self.queues.read();
        if !queues.contains_key(&subscriber) {
            return Err(DeliveryError::UnknownSubscriber(subscriber));
        }
        // Read lock stays held until the keys are recorded.
        let changes = self.subscriptions.add_subscriptions(subscriber, keys);
        drop(queues);
        Ok(changes)
    }

    /// Drop keys for a registered subscriber.
    ///
    /// # Errors
    ///
    /// Returns [`DeliveryError::UnknownSubscriber`] if the id is not registered.
    pub fn unsubscribe(
        &self,
        subscriber: SubscriberId,
        keys: &[SubscriptionKey],
    ) -> Result<SubscriptionChanges, DeliveryError> {
        if !self.queues.read().contains_key(&subscriber) {
            return Err(DeliveryError::UnknownSubscriber(subscriber));
        }
        Ok(self.subscriptions.remove_subscriptions(subscriber, keys))
    }

    /// Keys held by a subscriber.
    #[must_use]
    pub fn keys_for(&self, subscriber: SubscriberId) -> HashSet<SubscriptionKey> {
        self.subscriptions.keys_for(subscriber)
    }

    /// Number of connected subscribers.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.queues.read().len()
    }

    /// Subscription statistics.
    #[must_use]
    pub fn subscription_stats(&self) -> SubscriptionStats {
        self.subscriptions.stats()
    }

    fn try_deliver(
        subscriber: SubscriberId,
        queue: &mpsc::Sender<Bytes>,
        payload: Bytes,
    ) -> Result<(), DeliveryError> {
        queue.try_send(payload).map_err(|e| match e {
            TrySendError::Full(_) => DeliveryError::QueueFull(subscriber),
            TrySendError::Closed(_) => DeliveryError::Disconnected(subscriber),
        })
    }
}

impl ClientRegistry for SubscriberHub {
    fn send_to_one(&self, subscriber: SubscriberId, payload: Bytes) -> Result<(), DeliveryError> {
        let queues = self.queues.read();
        let queue = queues
            .get(&subscriber)
            .ok_or(DeliveryError::UnknownSubscriber(subscriber))?;
        Self::try_deliver(subscriber, queue, payload)
    }

    fn send_to_all(&self, payload: Bytes) -> Vec<(SubscriberId, Result<(), DeliveryError>)> {
        let queues = self.queues.read();
        queues
            .iter()
            .map(|(id, queue)| (*id, Self::try_deliver(*id, queue, payload.clone())))
            .collect()
    }

    fn list_subscribers(&self, key: &str) -> HashSet<SubscriberId> {
        self.subscriptions.subscribers_for(key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn keys(list: &[&str]) -> Vec<SubscriptionKey> {
        list.iter().map(ToString::to_string).collect()
    }

    #[test]
    fn register_assigns_distinct_ids() {
        let hub = SubscriberHub::new();
        let (a, _rx_a) = hub.register(4);
        let (b, _rx_b) = hub.register(4);

        assert_ne!(a, b);
        assert_eq!(hub.subscriber_count(), 2);
    }

    #[test]
    fn send_to_one_enqueues_payload() {
        let hub = SubscriberHub::new();
        let (id, mut rx) = hub.register(4);

        hub.send_to_one(id, Bytes::from_static(b"one")).unwrap();
        hub.send_to_one(id, Bytes::from_static(b"two")).unwrap();

        assert_eq!(rx.try_recv().unwrap(), Bytes::from_static(b"one"));
        assert_eq!(rx.try_recv().unwrap(), Bytes::from_static(b"two"));
    }

    #[test]
    fn send_to_unknown_subscriber_fails() {
        let hub = SubscriberHub::new();
        assert_eq!(
            hub.send_to_one(42, Bytes::new()),
            Err(DeliveryError::UnknownSubscriber(42))
        );
    }

    #[test]
    fn full_queue_drops_only_that_payload() {
        let hub = SubscriberHub::new();
        let (id, mut rx) = hub.register(1);

        hub.send_to_one(id, Bytes::from_static(b"first")).unwrap();
        assert_eq!(
            hub.send_to_one(id, Bytes::from_static(b"second")),
            Err(DeliveryError::QueueFull(id))
        );

        assert_eq!(rx.try_recv().unwrap(), Bytes::from_static(b"first"));
        hub.send_to_one(id, Bytes::from_static(b"third")).unwrap();
        assert_eq!(rx.try_recv().unwrap(), Bytes::from_static(b"third"));
    }

    #[test]
    fn dropped_receiver_reports_disconnected() {
        let hub = SubscriberHub::new();
        let (id, rx) = hub.register(4);
        drop(rx);

        assert_eq!(
            hub.send_to_one(id, Bytes::new()),
            Err(DeliveryError::Disconnected(id))
        );
    }

    #[test]
    fn send_to_all_isolates_failures() {
        let hub = SubscriberHub::new();
        let (healthy, mut healthy_rx) = hub.register(4);
        let (slow, _slow_rx) = hub.register(1);
        let (gone, gone_rx) = hub.register(4);
        drop(gone_rx);
        hub.send_to_one(slow, Bytes::from_static(b"backlog")).unwrap();

        let outcomes: HashMap<_, _> = hub
            .send_to_all(Bytes::from_static(b"tick"))
            .into_iter()
            .collect();

        assert_eq!(outcomes.len(), 3);
        assert_eq!(outcomes[&healthy], Ok(()));
        assert_eq!(outcomes[&slow], Err(DeliveryError::QueueFull(slow)));
        assert_eq!(outcomes[&gone], Err(DeliveryError::Disconnected(gone)));
        assert_eq!(healthy_rx.try_recv().unwrap(), Bytes::from_static(b"tick"));
    }

    #[test]
    fn subscriptions_follow_subscriber() {
        let hub = SubscriberHub::new();
        let (a, _rx_a) = hub.register(4);
        let (b, _rx_b) = hub.register(4);

        hub.subscribe(a, &keys(&["btcusdt", "ethusdt"])).unwrap();
        hub.subscribe(b, &keys(&["btcusdt"])).unwrap();
        assert_eq!(hub.list_subscribers("btcusdt"), HashSet::from([a, b]));

        hub.unsubscribe(a, &keys(&["btcusdt"])).unwrap();
        assert_eq!(hub.list_subscribers("btcusdt"), HashSet::from([b]));
        assert_eq!(hub.keys_for(a), HashSet::from(["ethusdt".to_string()]));
    }

    #[test]
    fn unregister_removes_queue_and_keys() {
        let hub = SubscriberHub::new();
        let (id, mut rx) = hub.register(4);
        hub.subscribe(id, &keys(&["btcusdt"])).unwrap();

        let changes = hub.unregister(id);

        assert!(changes.removed.contains("btcusdt"));
        assert_eq!(hub.subscriber_count(), 0);
        assert!(hub.list_subscribers("btcusdt").is_empty());
        assert_eq!(hub.subscription_stats(), SubscriptionStats::default());
        // Sender dropped: the receiver sees the end of the stream.
        assert!(matches!(
            rx.try_recv(),
            Err(mpsc::error::TryRecvError::Disconnected)
        ));
    }

    #[test]
    fn subscribe_requires_registration() {
        let hub = SubscriberHub::new();
        assert_eq!(
            hub.subscribe(9, &keys(&["btcusdt"])),
            Err(DeliveryError::UnknownSubscriber(9))
        );
        assert_eq!(
            hub.unsubscribe(9, &keys(&["btcusdt"])),
            Err(DeliveryError::UnknownSubscriber(9))
        );
        assert!(hub.list_subscribers("btcusdt").is_empty());
    }
}
