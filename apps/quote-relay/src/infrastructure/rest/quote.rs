//! Quote Client
//!
//! One-shot latest quote. The origin wraps the quote in an envelope:
//!
//! ```json
//! {"code":200,"msg":"ok","data":{"body":{"StockCode":"btcusdt","Price":"67012.5",...}}}
//! ```
//!
//! Any `code` other than 200 is an API failure carrying `msg`.

use std::time::Duration;

use serde_json::Value;

use super::{RestError, build_http_client, get_text, require_code};
use crate::infrastructure::config::RestSettings;

/// Envelope status that marks success.
const SUCCESS_CODE: i64 = 200;

/// HTTP client for the quote endpoint.
#[derive(Debug, Clone)]
pub struct QuoteClient {
    http: reqwest::Client,
    base_url: String,
}

impl QuoteClient {
    /// Create a client for the given endpoint.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, RestError> {
        Ok(Self {
            http: build_http_client(timeout)?,
            base_url: base_url.into(),
        })
    }

    /// Create a client from `RestSettings`.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn from_settings(settings: &RestSettings) -> Result<Self, RestError> {
        Self::new(settings.quote_url.clone(), settings.timeout)
    }

    /// Fetch the latest quote for `code` and return its `body` object.
    ///
    /// # Errors
    ///
    /// Returns [`RestError::Validation`] for a blank code before any request,
    /// [`RestError::Api`] when the envelope reports failure, and
    /// [`RestError::MissingBody`] when `data.body` is absent.
    pub async fn fetch(&self, code: &str) -> Result<Value, RestError> {
        let code = require_code(code)?;
        let body = get_text(&self.http, &self.base_url, &[("code", code)]).await?;
        let quote = parse_quote_response(&body)?;

        tracing::debug!(code, "Quote fetched");
        Ok(quote)
    }
}

/// Unwrap a quote envelope.
///
/// # Errors
///
/// See [`QuoteClient::fetch`].
pub fn parse_quote_response(body: &str) -> Result<Value, RestError> {
    let envelope: Value = serde_json::from_str(body).map_err(RestError::Decode)?;

    let code = envelope.get("code").and_then(|code| match code {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    });
    if code != Some(SUCCESS_CODE) {
        let message = envelope
            .get("msg")
            .and_then(Value::as_str)
            .filter(|msg| !msg.is_empty())
            .unwrap_or("unknown error");
        return Err(RestError::Api(message.to_string()));
    }

    match envelope.get("data").and_then(|data| data.get("body")) {
        Some(Value::Null) | None => Err(RestError::MissingBody),
        Some(body) => Ok(body.clone()),
    }
}
