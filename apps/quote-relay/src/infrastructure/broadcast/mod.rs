//! Fan-out Dispatcher
//!
//! Delivers each decoded update to the subscribers that should see it.
//!
//! # Architecture
//!
//! ```text
//!                          ┌──────────────┐     ┌────────────────┐
//! Upstream ── bounded ───► │   dispatch   │ ──► │ ClientRegistry │ ──► subscriber 1
//! Connector    queue       │  task (one)  │     │  (per-client   │ ──► subscriber 2
//!                          └──────────────┘     │   FIFO queue)  │ ──► subscriber N
//!                                               └────────────────┘
//! ```
//!
//! A single task drains the queue, so updates reach every subscriber in the
//! order the origin sent them. Delivery never waits on a subscriber; a
//! failure is counted against that subscriber alone.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::application::ports::{ClientRegistry, DeliveryError};
use crate::domain::feed::{FeedUpdate, SubscriberId};
use crate::infrastructure::config::RoutingMode;
use crate::infrastructure::metrics;

// =============================================================================
// Dispatch Report
// =============================================================================

/// Outcome of publishing one update.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchReport {
    /// Subscribers that accepted the payload.
    pub delivered: usize,
    /// Subscribers the payload could not be handed to.
    pub failed: usize,
}

impl DispatchReport {
    /// Total subscribers attempted.
    #[must_use]
    pub const fn attempted(&self) -> usize {
        self.delivered + self.failed
    }

    fn record(&mut self, subscriber: SubscriberId, outcome: &Result<(), DeliveryError>) {
        match outcome {
            Ok(()) => {
                self.delivered += 1;
                metrics::record_delivery("delivered");
            }
            Err(e) => {
                self.failed += 1;
                metrics::record_delivery(e.kind());
                tracing::debug!(subscriber, error = %e, "Delivery failed");
            }
        }
    }
}

// =============================================================================
// Fan-out Dispatcher
// =============================================================================

/// Statistics about dispatched updates.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchStats {
    /// Updates published.
    pub updates_published: u64,
    /// Successful deliveries across all subscribers.
    pub deliveries: u64,
    /// Failed deliveries across all subscribers.
    pub delivery_failures: u64,
}

/// Routes updates to subscribers through a [`ClientRegistry`].
///
/// # Example
///
/// ```rust
/// use std::collections::HashSet;
/// use std::sync::Arc;
///
/// use bytes::Bytes;
/// use chrono::Utc;
/// use quote_relay::application::ports::{ClientRegistry, DeliveryError};
/// use quote_relay::domain::feed::{FeedUpdate, SubscriberId};
/// use quote_relay::infrastructure::broadcast::FanoutDispatcher;
/// use quote_relay::RoutingMode;
///
/// struct Nobody;
///
/// impl ClientRegistry for Nobody {
///     fn send_to_one(&self, id: SubscriberId, _: Bytes) -> Result<(), DeliveryError> {
///         Err(DeliveryError::UnknownSubscriber(id))
///     }
///     fn send_to_all(&self, _: Bytes) -> Vec<(SubscriberId, Result<(), DeliveryError>)> {
///         vec![]
///     }
///     fn list_subscribers(&self, _: &str) -> HashSet<SubscriberId> {
///         HashSet::new()
///     }
/// }
///
/// let dispatcher = FanoutDispatcher::new(Arc::new(Nobody), RoutingMode::PerKey);
/// let report = dispatcher.publish(FeedUpdate::new("btcusdt", "{}", Utc::now()));
/// assert_eq!(report.attempted(), 0);
/// ```
pub struct FanoutDispatcher {
    registry: Arc<dyn ClientRegistry>,
    mode: RoutingMode,
    updates_published: AtomicU64,
    deliveries: AtomicU64,
    delivery_failures: AtomicU64,
}

impl FanoutDispatcher {
    /// Create a dispatcher over the given registry.
    #[must_use]
    pub fn new(registry: Arc<dyn ClientRegistry>, mode: RoutingMode) -> Self {
        Self {
            registry,
            mode,
            updates_published: AtomicU64::new(0),
            deliveries: AtomicU64::new(0),
            delivery_failures: AtomicU64::new(0),
        }
    }

    /// Routing mode in effect.
    #[must_use]
    pub const fn mode(&self) -> RoutingMode {
        self.mode
    }

    /// Deliver one update.
    ///
    /// Never fails: per-subscriber errors are counted in the report.
    pub fn publish(&self, update: FeedUpdate) -> DispatchReport {
        let started = Instant::now();
        let payload = update.payload().clone();
        let mut report = DispatchReport::default();

        match self.mode {
            RoutingMode::Broadcast => {
                for (subscriber, outcome) in self.registry.send_to_all(payload) {
                    report.record(subscriber, &outcome);
                }
            }
            RoutingMode::PerKey => {
                for subscriber in self.registry.list_subscribers(update.subscription_key()) {
                    let outcome = self.registry.send_to_one(subscriber, payload.clone());
                    report.record(subscriber, &outcome);
                }
            }
        }

        self.updates_published.fetch_add(1, Ordering::Relaxed);
        self.deliveries
            .fetch_add(report.delivered as u64, Ordering::Relaxed);
        self.delivery_failures
            .fetch_add(report.failed as u64, Ordering::Relaxed);
        metrics::record_dispatch_duration(started.elapsed());

        tracing::trace!(
            key = update.subscription_key(),
            delivered = report.delivered,
            failed = report.failed,
            "Update dispatched"
        );
        report
    }

    /// Drain the update queue until it closes or `cancel` fires.
    pub async fn run(
        self: Arc<Self>,
        mut updates: mpsc::Receiver<FeedUpdate>,
        cancel: CancellationToken,
    ) {
        tracing::info!(mode = self.mode.as_str(), "Dispatcher started");

        loop {
            tokio::select! {
                () = cancel.cancelled() => break,
                update = updates.recv() => match update {
                    Some(update) => {
                        self.publish(update);
                    }
                    None => break,
                },
            }
        }

        tracing::info!("Dispatcher stopped");
    }

    /// Current statistics.
    #[must_use]
    pub fn stats(&self) -> DispatchStats {
        DispatchStats {
            updates_published: self.updates_published.load(Ordering::Relaxed),
            deliveries: self.deliveries.load(Ordering::Relaxed),
            delivery_failures: self.delivery_failures.load(Ordering::Relaxed),
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use bytes::Bytes;
    use chrono::Utc;
    use parking_lot::Mutex;

    use super::*;
    use crate::application::ports::MockClientRegistry;

    fn update(key: &str, payload: &'static str) -> FeedUpdate {
        FeedUpdate::new(key, payload, Utc::now())
    }

    #[test]
    fn broadcast_reaches_everyone_through_send_to_all() {
        let mut registry = MockClientRegistry::new();
        registry
            .expect_send_to_all()
            .times(1)
            .returning(|_| vec![(1, Ok(())), (2, Ok(())), (3, Ok(()))]);
        registry.expect_list_subscribers().times(0);
        registry.expect_send_to_one().times(0);

        let dispatcher = FanoutDispatcher::new(Arc::new(registry), RoutingMode::Broadcast);
        let report = dispatcher.publish(update("btcusdt", "{}"));

        assert_eq!(report, DispatchReport { delivered: 3, failed: 0 });
    }

    #[test]
    fn broadcast_counts_failures_without_stopping() {
        let mut registry = MockClientRegistry::new();
        registry.expect_send_to_all().returning(|_| {
            vec![
                (1, Ok(())),
                (2, Err(DeliveryError::QueueFull(2))),
                (3, Err(DeliveryError::Disconnected(3))),
                (4, Ok(())),
            ]
        });

        let dispatcher = FanoutDispatcher::new(Arc::new(registry), RoutingMode::Broadcast);
        let report = dispatcher.publish(update("btcusdt", "{}"));

        assert_eq!(report.delivered, 2);
        assert_eq!(report.failed, 2);
        assert_eq!(dispatcher.stats().delivery_failures, 2);
    }

    #[test]
    fn per_key_targets_only_registered_subscribers() {
        let mut registry = MockClientRegistry::new();
        registry
            .expect_list_subscribers()
            .withf(|key| key == "btcusdt")
            .times(1)
            .returning(|_| HashSet::from([1, 2, 3]));
        registry
            .expect_send_to_one()
            .times(3)
            .returning(|id, _| {
                if id == 2 {
                    Err(DeliveryError::QueueFull(id))
                } else {
                    Ok(())
                }
            });
        registry.expect_send_to_all().times(0);

        let dispatcher = FanoutDispatcher::new(Arc::new(registry), RoutingMode::PerKey);
        let report = dispatcher.publish(update("btcusdt", r#"{"StockCode":"btcusdt"}"#));

        assert_eq!(report, DispatchReport { delivered: 2, failed: 1 });
    }

    #[test]
    fn per_key_without_subscribers_sends_nothing() {
        let mut registry = MockClientRegistry::new();
        registry
            .expect_list_subscribers()
            .returning(|_| HashSet::new());
        registry.expect_send_to_one().times(0);

        let dispatcher = FanoutDispatcher::new(Arc::new(registry), RoutingMode::PerKey);
        let report = dispatcher.publish(update("ethusdt", "{}"));

        assert_eq!(report.attempted(), 0);
        assert_eq!(dispatcher.stats().updates_published, 1);
    }

    #[test]
    fn payload_is_passed_through_unchanged() {
        let mut registry = MockClientRegistry::new();
        registry
            .expect_send_to_all()
            .withf(|payload| payload.as_ref() == br#"{"StockCode":"btcusdt","Price":1}"#)
            .times(1)
            .returning(|_| vec![(7, Ok(()))]);

        let dispatcher = FanoutDispatcher::new(Arc::new(registry), RoutingMode::Broadcast);
        dispatcher.publish(update("btcusdt", r#"{"StockCode":"btcusdt","Price":1}"#));
    }

    /// Registry that records every payload in arrival order.
    #[derive(Default)]
    struct RecordingRegistry {
        received: Mutex<Vec<Bytes>>,
    }

    impl ClientRegistry for RecordingRegistry {
        fn send_to_one(&self, _: SubscriberId, payload: Bytes) -> Result<(), DeliveryError> {
            self.received.lock().push(payload);
            Ok(())
        }

        fn send_to_all(&self, payload: Bytes) -> Vec<(SubscriberId, Result<(), DeliveryError>)> {
            self.received.lock().push(payload);
            vec![(1, Ok(()))]
        }

        fn list_subscribers(&self, _: &str) -> HashSet<SubscriberId> {
            HashSet::from([1])
        }
    }

    #[tokio::test]
    async fn run_preserves_queue_order() {
        let registry = Arc::new(RecordingRegistry::default());
        let dispatcher = Arc::new(FanoutDispatcher::new(
            registry.clone(),
            RoutingMode::PerKey,
        ));
        let (tx, rx) = mpsc::channel(16);

        for i in 0..10 {
            let payload = format!(r#"{{"seq":{i}}}"#);
            tx.send(FeedUpdate::new("btcusdt", payload, Utc::now()))
                .await
                .unwrap();
        }
        drop(tx);

        dispatcher.clone().run(rx, CancellationToken::new()).await;

        let received = registry.received.lock();
        let expected: Vec<Bytes> = (0..10)
            .map(|i| Bytes::from(format!(r#"{{"seq":{i}}}"#)))
            .collect();
        assert_eq!(*received, expected);
        assert_eq!(dispatcher.stats().updates_published, 10);
    }

    #[tokio::test]
    async fn run_stops_on_cancel() {
        let dispatcher = Arc::new(FanoutDispatcher::new(
            Arc::new(RecordingRegistry::default()),
            RoutingMode::Broadcast,
        ));
        let (_tx, rx) = mpsc::channel(1);
        let cancel = CancellationToken::new();

        let handle = tokio::spawn(dispatcher.run(rx, cancel.clone()));
        cancel.cancel();

        let result = tokio::time::timeout(std::time::Duration::from_millis(100), handle).await;
        assert!(result.is_ok(), "dispatcher should stop on cancellation");
    }
}
