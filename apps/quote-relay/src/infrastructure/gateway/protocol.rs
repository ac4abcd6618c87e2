//! Gateway Protocol
//!
//! JSON control frames exchanged with downstream subscribers. Feed payloads
//! are forwarded verbatim and are not wrapped in these types.

use serde::{Deserialize, Serialize};

use crate::domain::feed::{SubscriberId, SubscriptionKey};

// =============================================================================
// Subscriber → Relay
// =============================================================================

/// Command sent by a subscriber.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum ClientCommand {
    /// Start receiving updates for the given keys.
    Subscribe {
        /// Keys to add.
        keys: Vec<SubscriptionKey>,
    },
    /// Stop receiving updates for the given keys.
    Unsubscribe {
        /// Keys to drop.
        keys: Vec<SubscriptionKey>,
    },
    /// Application-level keepalive.
    Ping,
}

impl ClientCommand {
    /// Parse a command from a text frame.
    ///
    /// # Errors
    ///
    /// Returns an error if the frame is not a known command.
    pub fn parse(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }
}

// =============================================================================
// Relay → Subscriber
// =============================================================================

/// Control frame sent to a subscriber.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerFrame {
    /// First frame on every connection.
    Welcome {
        /// Identifier assigned to this connection.
        subscriber_id: SubscriberId,
    },
    /// Keys now held after a subscribe.
    Subscribed {
        /// Keys accepted.
        keys: Vec<SubscriptionKey>,
    },
    /// Keys released after an unsubscribe.
    Unsubscribed {
        /// Keys released.
        keys: Vec<SubscriptionKey>,
    },
    /// Reply to [`ClientCommand::Ping`].
    Pong,
    /// Rejected command.
    Error {
        /// Human-readable reason.
        message: String,
    },
}

impl ServerFrame {
    /// Serialize to JSON text.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// Trim keys and drop blanks and duplicates, keeping first-seen order.
#[must_use]
pub fn normalize_keys(keys: Vec<SubscriptionKey>) -> Vec<SubscriptionKey> {
    let mut normalized: Vec<SubscriptionKey> = Vec::with_capacity(keys.len());
    for key in keys {
        let key = key.trim();
        if !key.is_empty() && !normalized.iter().any(|k| k == key) {
            normalized.push(key.to_string());
        }
    }
    normalized
}
