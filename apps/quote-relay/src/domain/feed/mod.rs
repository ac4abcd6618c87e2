//! Feed Domain Types
//!
//! The canonical representation of an update received from the origin and
//! the states the upstream connection moves through.

use std::fmt;

use bytes::Bytes;
use chrono::{DateTime, Utc};

// =============================================================================
// Identifiers
// =============================================================================

/// Identifier a subscriber is interested in (e.g. `btcusdt`).
pub type SubscriptionKey = String;

/// Unique identifier for a downstream subscriber connection.
pub type SubscriberId = u64;

// =============================================================================
// Feed Update
// =============================================================================

/// A single decoded update from the origin.
///
/// Created only by the feed decoder and never mutated afterwards. Cloning is
/// cheap: the payload is reference counted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedUpdate {
    subscription_key: SubscriptionKey,
    payload: Bytes,
    received_at: DateTime<Utc>,
}

impl FeedUpdate {
    /// Create a new update.
    #[must_use]
    pub fn new(
        subscription_key: impl Into<SubscriptionKey>,
        payload: impl Into<Bytes>,
        received_at: DateTime<Utc>,
    ) -> Self {
        Self {
            subscription_key: subscription_key.into(),
            payload: payload.into(),
            received_at,
        }
    }

    /// Key the update belongs to.
    #[must_use]
    pub fn subscription_key(&self) -> &str {
        &self.subscription_key
    }

    /// Serialized body delivered to subscribers.
    #[must_use]
    pub const fn payload(&self) -> &Bytes {
        &self.payload
    }

    /// When the frame carrying this update was read off the wire.
    #[must_use]
    pub const fn received_at(&self) -> DateTime<Utc> {
        self.received_at
    }
}

// =============================================================================
// Connection State
// =============================================================================

/// State of the single upstream connection.
///
/// ```text
/// Disconnected ──► Connecting ──► Handshaking ──► Live
///      ▲               │               │            │
///      └───────────────┴───────────────┴────────────┘
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ConnectionState {
    /// No transport; either idle, waiting out a reconnect delay, or stopped.
    #[default]
    Disconnected,
    /// Transport connect in progress.
    Connecting,
    /// Transport up, subscribe message being sent.
    Handshaking,
    /// Subscribed and streaming, heartbeat armed.
    Live,
}

impl ConnectionState {
    /// Whether `next` is a legal transition from `self`.
    ///
    /// Every state may fall back to `Disconnected`; forward moves go one
    /// step at a time.
    #[must_use]
    pub const fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (_, Self::Disconnected)
                | (Self::Disconnected, Self::Connecting)
                | (Self::Connecting, Self::Handshaking)
                | (Self::Handshaking, Self::Live)
        )
    }

    /// Lowercase name used in logs, metrics and the health endpoint.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Handshaking => "handshaking",
            Self::Live => "live",
        }
    }

    /// Numeric code for the connection state gauge.
    #[must_use]
    pub const fn as_gauge(self) -> f64 {
        match self {
            Self::Disconnected => 0.0,
            Self::Connecting => 1.0,
            Self::Handshaking => 2.0,
            Self::Live => 3.0,
        }
    }

    /// Whether the connection is streaming.
    #[must_use]
    pub const fn is_live(self) -> bool {
        matches!(self, Self::Live)
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// Tests
// =============================================================================
