//! Feed Decoder
//!
//! Turns one inbound frame into at most one [`FeedUpdate`].
//!
//! # Frame Format
//!
//! Frames of interest carry the market fields under `body`, either as an
//! object or as a string holding JSON:
//!
//! ```json
//! {"body": {"StockCode": "btcusdt", "Price": "67321.5", ...}}
//! {"body": "{\"StockCode\":\"btcusdt\",\"Price\":\"67321.5\"}"}
//! ```
//!
//! Frames without a body (pong replies, acknowledgements) and frames whose
//! body is empty are ignored. Everything else that cannot be interpreted is a
//! [`DecodeError`] scoped to that frame alone.

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde_json::{Map, Value};

use crate::domain::feed::FeedUpdate;

/// Field of the body naming the subscription key.
pub const KEY_FIELD: &str = "StockCode";

/// Field of the frame carrying the update.
pub const BODY_FIELD: &str = "body";

/// Decode errors. Each one discards a single frame.
#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    /// Binary frame was not valid UTF-8.
    #[error("frame is not valid UTF-8: {0}")]
    NotUtf8(#[from] std::str::Utf8Error),

    /// Frame was not valid JSON.
    #[error("invalid JSON frame: {0}")]
    InvalidJson(#[source] serde_json::Error),

    /// Frame parsed but was not a JSON object.
    #[error("expected JSON object frame, got {0}")]
    NotAnObject(&'static str),

    /// String body did not hold valid JSON.
    #[error("invalid embedded body: {0}")]
    InvalidEmbeddedBody(#[source] serde_json::Error),

    /// Body was present and non-empty but not an object.
    #[error("expected object body, got {0}")]
    BodyNotObject(&'static str),

    /// Body had no usable `StockCode`.
    #[error("body has no `StockCode` string")]
    MissingKey,

    /// Body could not be serialized back into a payload.
    #[error("failed to serialize body: {0}")]
    Serialize(#[source] serde_json::Error),
}

impl DecodeError {
    /// Short label for metrics.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::NotUtf8(_) => "not_utf8",
            Self::InvalidJson(_) => "invalid_json",
            Self::NotAnObject(_) => "not_an_object",
            Self::InvalidEmbeddedBody(_) => "invalid_embedded_body",
            Self::BodyNotObject(_) => "body_not_object",
            Self::MissingKey => "missing_key",
            Self::Serialize(_) => "serialize",
        }
    }
}

/// Stateless decoder for origin frames.
#[derive(Debug, Default, Clone, Copy)]
pub struct FeedDecoder;

impl FeedDecoder {
    /// Create a new decoder.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Decode a text frame received now.
    ///
    /// Returns `Ok(None)` for frames that carry nothing to relay.
    ///
    /// # Errors
    ///
    /// Returns a [`DecodeError`] if the frame cannot be interpreted.
    pub fn decode(&self, frame: &str) -> Result<Option<FeedUpdate>, DecodeError> {
        self.decode_at(frame, Utc::now())
    }

    /// Decode a binary frame holding UTF-8 JSON.
    ///
    /// # Errors
    ///
    /// Returns a [`DecodeError`] if the bytes are not UTF-8 or the frame
    /// cannot be interpreted.
    pub fn decode_bytes(&self, frame: &[u8]) -> Result<Option<FeedUpdate>, DecodeError> {
        self.decode_at(std::str::from_utf8(frame)?, Utc::now())
    }

    /// Decode a text frame with an explicit receive time.
    ///
    /// # Errors
    ///
    /// Returns a [`DecodeError`] if the frame cannot be interpreted.
    pub fn decode_at(
        &self,
        frame: &str,
        received_at: DateTime<Utc>,
    ) -> Result<Option<FeedUpdate>, DecodeError> {
        let value: Value = serde_json::from_str(frame).map_err(DecodeError::InvalidJson)?;
        let Value::Object(mut envelope) = value else {
            return Err(DecodeError::NotAnObject(type_name(&value)));
        };

        let Some(body) = envelope.remove(BODY_FIELD) else {
            return Ok(None);
        };

        let body = match body {
            Value::String(embedded) if !embedded.trim().is_empty() => {
                serde_json::from_str(&embedded).map_err(DecodeError::InvalidEmbeddedBody)?
            }
            other => other,
        };

        if is_empty(&body) {
            return Ok(None);
        }

        let Value::Object(body) = body else {
            return Err(DecodeError::BodyNotObject(type_name(&body)));
        };

        let key = extract_key(&body)?;
        let payload = serde_json::to_vec(&body).map_err(DecodeError::Serialize)?;

        Ok(Some(FeedUpdate::new(key, Bytes::from(payload), received_at)))
    }
}

fn extract_key(body: &Map<String, Value>) -> Result<String, DecodeError> {
    body.get(KEY_FIELD)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|key| !key.is_empty())
        .map(ToString::to_string)
        .ok_or(DecodeError::MissingKey)
}

fn is_empty(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.trim().is_empty(),
        Value::Array(items) => items.is_empty(),
        Value::Object(fields) => fields.is_empty(),
        Value::Bool(_) | Value::Number(_) => false,
    }
}

const fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;
    use test_case::test_case;

    use super::*;

    fn decode(frame: &str) -> Result<Option<FeedUpdate>, DecodeError> {
        FeedDecoder::new().decode(frame)
    }

    fn payload_json(update: &FeedUpdate) -> Value {
        serde_json::from_slice(update.payload()).unwrap()
    }

    #[test]
    fn object_body_becomes_update() {
        let update = decode(r#"{"body":{"StockCode":"btcusdt","Price":"67321.5"}}"#)
            .unwrap()
            .unwrap();

        assert_eq!(update.subscription_key(), "btcusdt");
        assert_eq!(
            payload_json(&update),
            serde_json::json!({"StockCode": "btcusdt", "Price": "67321.5"})
        );
    }

    #[test]
    fn string_body_is_parsed_as_embedded_json() {
        let update = decode(r#"{"body":"{\"StockCode\":\"ethusdt\",\"Price\":3500}"}"#)
            .unwrap()
            .unwrap();

        assert_eq!(update.subscription_key(), "ethusdt");
        assert_eq!(payload_json(&update)["Price"], 3500);
    }

    #[test]
    fn payload_excludes_envelope_fields() {
        let update = decode(r#"{"type":"quote","body":{"StockCode":"btcusdt"}}"#)
            .unwrap()
            .unwrap();

        assert_eq!(payload_json(&update), serde_json::json!({"StockCode": "btcusdt"}));
    }

    #[test]
    fn receive_time_is_preserved() {
        let at = Utc::now();
        let update = FeedDecoder::new()
            .decode_at(r#"{"body":{"StockCode":"btcusdt"}}"#, at)
            .unwrap()
            .unwrap();

        assert_eq!(update.received_at(), at);
    }

    #[test_case(r#"{"pong":1718000000}"# ; "no body")]
    #[test_case(r#"{"body":null}"# ; "null body")]
    #[test_case(r#"{"body":""}"# ; "empty string body")]
    #[test_case(r#"{"body":"   "}"# ; "blank string body")]
    #[test_case(r#"{"body":{}}"# ; "empty object body")]
    #[test_case(r#"{"body":[]}"# ; "empty array body")]
    #[test_case(r#"{"body":"{}"}"# ; "embedded empty object")]
    fn empty_frames_are_ignored(frame: &str) {
        assert!(decode(frame).unwrap().is_none());
    }

    #[test_case("not json", "invalid_json" ; "garbage")]
    #[test_case(r#"{"body":"#, "invalid_json" ; "truncated")]
    #[test_case(r#"[{"body":{}}]"#, "not_an_object" ; "array frame")]
    #[test_case("42", "not_an_object" ; "number frame")]
    #[test_case(r#"{"body":"not json"}"#, "invalid_embedded_body" ; "bad embedded body")]
    #[test_case(r#"{"body":[1,2]}"#, "body_not_object" ; "array body")]
    #[test_case(r#"{"body":7}"#, "body_not_object" ; "number body")]
    #[test_case(r#"{"body":true}"#, "body_not_object" ; "bool body")]
    #[test_case(r#"{"body":"[1]"}"#, "body_not_object" ; "embedded array body")]
    #[test_case(r#"{"body":{"Price":1}}"#, "missing_key" ; "no stock code")]
    #[test_case(r#"{"body":{"StockCode":5}}"#, "missing_key" ; "numeric stock code")]
    #[test_case(r#"{"body":{"StockCode":""}}"#, "missing_key" ; "empty stock code")]
    fn malformed_frames_fail(frame: &str, kind: &str) {
        let err = decode(frame).unwrap_err();
        assert_eq!(err.kind(), kind);
    }

    #[test]
    fn binary_frames_decode_as_utf8() {
        let update = FeedDecoder::new()
            .decode_bytes(br#"{"body":{"StockCode":"btcusdt"}}"#)
            .unwrap()
            .unwrap();
        assert_eq!(update.subscription_key(), "btcusdt");

        let err = FeedDecoder::new().decode_bytes(&[0xff, 0xfe]).unwrap_err();
        assert_eq!(err.kind(), "not_utf8");
    }

    #[test]
    fn failure_does_not_affect_next_frame() {
        let decoder = FeedDecoder::new();

        assert!(decoder.decode("{broken").is_err());
        let next = decoder.decode(r#"{"body":{"StockCode":"btcusdt"}}"#).unwrap();

        assert!(next.is_some());
    }

    proptest! {
        #[test]
        fn decode_never_panics(frame in ".*") {
            let _ = FeedDecoder::new().decode(&frame);
        }

        #[test]
        fn any_stock_code_round_trips(code in "[a-z]{1,8}(usdt)?", price in 0u32..1_000_000) {
            let frame = serde_json::json!({"body": {"StockCode": code, "Price": price}}).to_string();
            let update = FeedDecoder::new().decode(&frame).unwrap().unwrap();
            prop_assert_eq!(update.subscription_key(), code.as_str());
        }
    }
}
