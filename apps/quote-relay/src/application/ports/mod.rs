//! Port Interfaces
//!
//! Defines the contracts infrastructure adapters must implement, following
//! the Hexagonal Architecture pattern.
//!
//! ## Driven Ports (Outbound)
//!
//! - `ClientRegistry`: enumerate subscribers and hand them payloads

use std::collections::HashSet;

use bytes::Bytes;

use crate::domain::feed::SubscriberId;

// =============================================================================
// Delivery Errors
// =============================================================================

/// Failure to hand a payload to a single subscriber.
///
/// Always scoped to one subscriber; never aborts a fan-out.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DeliveryError {
    /// No subscriber with this id is registered.
    #[error("subscriber {0} is not registered")]
    UnknownSubscriber(SubscriberId),

    /// The subscriber's connection has gone away.
    #[error("subscriber {0} disconnected")]
    Disconnected(SubscriberId),

    /// The subscriber's outbound queue is full; the payload was dropped.
    #[error("subscriber {0} outbound queue full")]
    QueueFull(SubscriberId),
}

impl DeliveryError {
    /// Short label for metrics.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::UnknownSubscriber(_) => "unknown_subscriber",
            Self::Disconnected(_) => "disconnected",
            Self::QueueFull(_) => "queue_full",
        }
    }
}

// =============================================================================
// Client Registry Port
// =============================================================================

/// Registry of downstream subscribers.
///
/// Implementations must never block: a delivery either enqueues immediately
/// or fails with a [`DeliveryError`].
#[cfg_attr(test, mockall::automock)]
pub trait ClientRegistry: Send + Sync {
    /// Deliver a payload to one subscriber.
    ///
    /// # Errors
    ///
    /// Returns a [`DeliveryError`] when the subscriber is unknown, gone, or
    /// cannot accept more data right now.
    fn send_to_one(&self, subscriber: SubscriberId, payload: Bytes) -> Result<(), DeliveryError>;

    /// Deliver a payload to every registered subscriber.
    ///
    /// Returns one outcome per subscriber attempted.
    fn send_to_all(&self, payload: Bytes) -> Vec<(SubscriberId, Result<(), DeliveryError>)>;

    /// Subscribers currently registered for `key`.
    fn list_subscribers(&self, key: &str) -> HashSet<SubscriberId>;
}
