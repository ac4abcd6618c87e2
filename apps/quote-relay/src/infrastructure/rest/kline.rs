//! K-line Client
//!
//! Fetches historical candles. The origin answers with a JSON array of
//! 7-element rows:
//!
//! ```json
//! [[1718000000, "1.2701", "1.2710", "1.2698", "1.2705", "2024-06-10 14:13:20", "1532"], ...]
//! ```
//!
//! Row fields, in order: timestamp, open, high, low, close, datetime, volume.

use std::fmt;
use std::str::FromStr;

use rust_decimal::Decimal;
use serde::Serialize;
use serde_json::Value;

use super::{RestError, ValidationError, build_http_client, get_text, require_code};
use crate::infrastructure::config::RestSettings;

/// Number of fields in every K-line row.
pub const ROW_WIDTH: usize = 7;

// =============================================================================
// Request
// =============================================================================

/// Candle interval.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Timeframe {
    /// One minute.
    OneMinute,
    /// Five minutes.
    FiveMinutes,
    /// Fifteen minutes.
    FifteenMinutes,
    /// Thirty minutes.
    ThirtyMinutes,
    /// One hour.
    OneHour,
    /// One day.
    OneDay,
    /// One month.
    OneMonth,
}

impl Timeframe {
    /// Every supported interval.
    pub const ALL: [Self; 7] = [
        Self::OneMinute,
        Self::FiveMinutes,
        Self::FifteenMinutes,
        Self::ThirtyMinutes,
        Self::OneHour,
        Self::OneDay,
        Self::OneMonth,
    ];

    /// Wire value for the `time` query parameter.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::OneMinute => "1m",
            Self::FiveMinutes => "5m",
            Self::FifteenMinutes => "15m",
            Self::ThirtyMinutes => "30m",
            Self::OneHour => "1h",
            Self::OneDay => "1d",
            Self::OneMonth => "1M",
        }
    }
}

impl FromStr for Timeframe {
    type Err = ValidationError;

    /// Case-sensitive: `1m` is a minute, `1M` a month.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|tf| tf.as_str() == s)
            .ok_or_else(|| ValidationError::UnsupportedTimeframe(s.to_string()))
    }
}

impl fmt::Display for Timeframe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Validated K-line request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KlineRequest {
    code: String,
    timeframe: Timeframe,
    rows: u32,
}

impl KlineRequest {
    /// Validate and build a request.
    ///
    /// # Errors
    ///
    /// Returns a [`ValidationError`] if `code` is blank, `timeframe` is not
    /// supported, or `rows` is zero.
    pub fn new(code: &str, timeframe: &str, rows: u32) -> Result<Self, ValidationError> {
        let code = require_code(code)?.to_string();
        let timeframe = timeframe.parse()?;
        if rows == 0 {
            return Err(ValidationError::InvalidRows);
        }
        Ok(Self {
            code,
            timeframe,
            rows,
        })
    }

    /// Instrument code.
    #[must_use]
    pub fn code(&self) -> &str {
        &self.code
    }

    /// Candle interval.
    #[must_use]
    pub const fn timeframe(&self) -> Timeframe {
        self.timeframe
    }

    /// Maximum rows requested.
    #[must_use]
    pub const fn rows(&self) -> u32 {
        self.rows
    }
}

// =============================================================================
// Response
// =============================================================================

/// One candle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct KlineBar {
    /// Unix timestamp in seconds.
    pub timestamp: i64,
    /// Opening price.
    pub open: Decimal,
    /// Highest price.
    pub high: Decimal,
    /// Lowest price.
    pub low: Decimal,
    /// Closing price.
    pub close: Decimal,
    /// Origin-formatted local time.
    pub datetime: String,
    /// Traded volume.
    pub volume: Decimal,
}

impl KlineBar {
    /// Build a bar from a raw row.
    ///
    /// Numeric fields may be JSON numbers or numeric strings.
    ///
    /// # Errors
    ///
    /// Returns a description of the first field that does not fit.
    pub fn from_row(row: &[Value]) -> Result<Self, String> {
        if row.len() != ROW_WIDTH {
            return Err(format!("expected {ROW_WIDTH} fields, got {}", row.len()));
        }

        Ok(Self {
            timestamp: integer_field(&row[0], "timestamp")?,
            open: decimal_field(&row[1], "open")?,
            high: decimal_field(&row[2], "high")?,
            low: decimal_field(&row[3], "low")?,
            close: decimal_field(&row[4], "close")?,
            datetime: text_field(&row[5]),
            volume: decimal_field(&row[6], "volume")?,
        })
    }
}

fn decimal_field(value: &Value, name: &str) -> Result<Decimal, String> {
    let parsed = match value {
        Value::String(s) => Decimal::from_str(s.trim()).ok(),
        Value::Number(n) => Decimal::from_str(&n.to_string())
            .or_else(|_| Decimal::from_scientific(&n.to_string()))
            .ok(),
        _ => None,
    };
    parsed.ok_or_else(|| format!("{name} is not a number: {value}"))
}

fn integer_field(value: &Value, name: &str) -> Result<i64, String> {
    let parsed = match value {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    };
    parsed.ok_or_else(|| format!("{name} is not an integer: {value}"))
}

fn text_field(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Parse a K-line response body into raw rows.
///
/// # Errors
///
/// Returns [`RestError::Decode`] for malformed JSON and
/// [`RestError::MalformedRow`] for a row that is not a 7-element array.
pub fn parse_kline_rows(body: &str) -> Result<Vec<Vec<Value>>, RestError> {
    let rows: Vec<Value> = serde_json::from_str(body).map_err(RestError::Decode)?;

    rows.into_iter()
        .enumerate()
        .map(|(index, row)| match row {
            Value::Array(fields) if fields.len() == ROW_WIDTH => Ok(fields),
            Value::Array(fields) => Err(RestError::MalformedRow {
                index,
                reason: format!("expected {ROW_WIDTH} fields, got {}", fields.len()),
            }),
            other => Err(RestError::MalformedRow {
                index,
                reason: format!("expected array, got {other}"),
            }),
        })
        .collect()
}

// =============================================================================
// Client
// =============================================================================

/// HTTP client for the K-line endpoint.
#[derive(Debug, Clone)]
pub struct KlineClient {
    http: reqwest::Client,
    base_url: String,
}

impl KlineClient {
    /// Create a client for the given endpoint.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(base_url: impl Into<String>, timeout: std::time::Duration) -> Result<Self, RestError> {
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
        Self::new(settings.kline_url.clone(), settings.timeout)
    }

    /// Fetch raw rows, each exactly 7 fields.
    ///
    /// At most `request.rows()` rows are returned.
    ///
    /// # Errors
    ///
    /// Returns a [`RestError`] on transport failure, non-200 status,
    /// malformed JSON, or a malformed row.
    pub async fn fetch_rows(&self, request: &KlineRequest) -> Result<Vec<Vec<Value>>, RestError> {
        let rows = request.rows.to_string();
        let body = get_text(
            &self.http,
            &self.base_url,
            &[
                ("code", request.code()),
                ("time", request.timeframe().as_str()),
                ("rows", rows.as_str()),
            ],
        )
        .await?;

        let mut parsed = parse_kline_rows(&body)?;
        parsed.truncate(usize::try_from(request.rows).unwrap_or(usize::MAX));

        tracing::debug!(
            code = request.code(),
            timeframe = %request.timeframe(),
            rows = parsed.len(),
            "K-line rows fetched"
        );
        Ok(parsed)
    }

    /// Fetch candles.
    ///
    /// # Errors
    ///
    /// Returns a [`RestError`] as [`fetch_rows`](Self::fetch_rows) does, or
    /// [`RestError::MalformedRow`] if a field is not numeric where expected.
    pub async fn fetch(&self, request: &KlineRequest) -> Result<Vec<KlineBar>, RestError> {
        self.fetch_rows(request)
            .await?
            .iter()
            .enumerate()
            .map(|(index, row)| {
                KlineBar::from_row(row).map_err(|reason| RestError::MalformedRow { index, reason })
            })
            .collect()
    }
}
