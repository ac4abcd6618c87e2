//! Outbound Wire Frames
//!
//! The two JSON text frames the relay ever writes to the origin.

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio_tungstenite::tungstenite::Message;

use crate::domain::feed::SubscriptionKey;

/// Subscribe handshake, sent once per connection: `{"Key":"btcusdt,ethusdt"}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SubscribeFrame {
    /// Comma-separated subscription keys.
    #[serde(rename = "Key")]
    pub key: String,
}

impl SubscribeFrame {
    /// Build the frame for a set of keys.
    #[must_use]
    pub fn new(keys: &[SubscriptionKey]) -> Self {
        Self { key: keys.join(",") }
    }
}

/// Liveness ping: `{"ping":1718000000}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct HeartbeatFrame {
    /// Unix timestamp in seconds.
    pub ping: i64,
}

impl HeartbeatFrame {
    /// Ping stamped with the given time.
    #[must_use]
    pub fn at(now: DateTime<Utc>) -> Self {
        Self {
            ping: now.timestamp(),
        }
    }
}

/// Serialize a frame into a WebSocket text message.
///
/// # Errors
///
/// Returns an error if JSON serialization fails.
pub fn to_text_message<T: Serialize>(frame: &T) -> Result<Message, serde_json::Error> {
    let json = serde_json::to_string(frame)?;
    Ok(Message::Text(json.into()))
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    #[test]
    fn subscribe_frame_joins_keys() {
        let frame = SubscribeFrame::new(&["btcusdt".to_string(), "ethusdt".to_string()]);
        let json = serde_json::to_string(&frame).unwrap();
        assert_eq!(json, r#"{"Key":"btcusdt,ethusdt"}"#);
    }

    #[test]
    fn subscribe_frame_single_key() {
        let frame = SubscribeFrame::new(&["btcusdt".to_string()]);
        assert_eq!(frame.key, "btcusdt");
    }

    #[test]
    fn heartbeat_frame_carries_unix_seconds() {
        let now = Utc.with_ymd_and_hms(2024, 6, 10, 6, 13, 20).unwrap();
        let json = serde_json::to_string(&HeartbeatFrame::at(now)).unwrap();
        assert_eq!(json, r#"{"ping":1718000000}"#);
    }

    #[test]
    fn text_message_wraps_json() {
        let message = to_text_message(&HeartbeatFrame { ping: 42 }).unwrap();
        assert_eq!(message, Message::Text(r#"{"ping":42}"#.into()));
    }
}
