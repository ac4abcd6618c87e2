//! REST Collaborators
//!
//! Thin HTTP clients for the origin's request/response endpoints:
//!
//! - `kline`: historical candles, `GET <url>?code=..&time=..&rows=..`
//! - `quote`: one-shot latest quote, `GET <url>?code=..`
//!
//! Parameters are validated before any request is made. Both clients ask
//! for gzip and decompress transparently.

pub mod kline;
pub mod quote;

use std::time::Duration;

pub use kline::{KlineBar, KlineClient, KlineRequest, Timeframe};
pub use quote::QuoteClient;

// =============================================================================
// Error Types
// =============================================================================

/// Invalid caller parameters. Always raised before any network call.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    /// Instrument code was empty.
    #[error("instrument code cannot be empty")]
    EmptyCode,

    /// Timeframe is not one of the supported intervals.
    #[error("unsupported timeframe {0:?}, expected one of: 1m, 5m, 15m, 30m, 1h, 1d, 1M")]
    UnsupportedTimeframe(String),

    /// Row count must be positive.
    #[error("row count must be greater than 0")]
    InvalidRows,
}

/// REST client errors.
#[derive(Debug, thiserror::Error)]
pub enum RestError {
    /// Request parameters were rejected.
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// Transport failure, including timeouts.
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// Server answered with a non-200 status.
    #[error("unexpected HTTP status {0}")]
    Status(u16),

    /// Body was not the expected JSON.
    #[error("failed to decode response: {0}")]
    Decode(#[source] serde_json::Error),

    /// A K-line row did not have the expected shape.
    #[error("malformed K-line row {index}: {reason}")]
    MalformedRow {
        /// Zero-based row position.
        index: usize,
        /// What was wrong with it.
        reason: String,
    },

    /// Quote endpoint reported a failure.
    #[error("quote API error: {0}")]
    Api(String),

    /// Quote response had no `data.body`.
    #[error("quote response has no data.body")]
    MissingBody,
}

// =============================================================================
// Shared HTTP Plumbing
// =============================================================================

/// Build the HTTP client both collaborators use.
///
/// # Errors
///
/// Returns an error if the TLS backend cannot be initialized.
pub fn build_http_client(timeout: Duration) -> Result<reqwest::Client, RestError> {
    let client = reqwest::Client::builder()
        .timeout(timeout)
        .gzip(true)
        .build()?;
    Ok(client)
}

/// Send a GET and return the body of a 200 response.
async fn get_text(
    client: &reqwest::Client,
    url: &str,
    query: &[(&str, &str)],
) -> Result<String, RestError> {
    let response = client.get(url).query(query).send().await?;

    let status = response.status();
    if status != reqwest::StatusCode::OK {
        tracing::warn!(url, status = status.as_u16(), "REST request rejected");
        return Err(RestError::Status(status.as_u16()));
    }

    Ok(response.text().await?)
}

fn require_code(code: &str) -> Result<&str, ValidationError> {
    let code = code.trim();
    if code.is_empty() {
        Err(ValidationError::EmptyCode)
    } else {
        Ok(code)
    }
}
