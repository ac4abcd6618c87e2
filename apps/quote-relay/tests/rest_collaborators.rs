//! REST Collaborator Tests
//!
//! K-line and quote clients against a mock origin.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::str::FromStr;
use std::time::Duration;

use rust_decimal::Decimal;
use serde_json::json;
use wiremock::matchers::{header_regex, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use quote_relay::{
    KlineClient, KlineRequest, QuoteClient, RestError, RestSettings, Timeframe, ValidationError,
};

const TIMEOUT: Duration = Duration::from_secs(5);

fn kline_rows() -> serde_json::Value {
    json!([
        [1_718_000_000, "1.2701", "1.2710", "1.2698", "1.2705", "2024-06-10 14:13:20", "1532"],
        [1_718_000_060, 1.2705, 1.2712, 1.2700, 1.2709, "2024-06-10 14:14:20", 988]
    ])
}

#[tokio::test]
async fn test_kline_fetch_sends_parameters_and_gzip() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/redis.php"))
        .and(query_param("code", "fx_sgbpusd"))
        .and(query_param("time", "1m"))
        .and(query_param("rows", "40"))
        .and(header_regex("accept-encoding", "gzip"))
        .respond_with(ResponseTemplate::new(200).set_body_json(kline_rows()))
        .expect(1)
        .mount(&server)
        .await;

    let client = KlineClient::new(format!("{}/redis.php", server.uri()), TIMEOUT).unwrap();
    let request = KlineRequest::new("fx_sgbpusd", "1m", 40).unwrap();

    let bars = client.fetch(&request).await.unwrap();

    assert_eq!(bars.len(), 2);
    assert_eq!(bars[0].timestamp, 1_718_000_000);
    assert_eq!(bars[0].open, Decimal::from_str("1.2701").unwrap());
    assert_eq!(bars[0].datetime, "2024-06-10 14:13:20");
    assert_eq!(bars[1].close, Decimal::from_str("1.2709").unwrap());
    assert_eq!(bars[1].volume, Decimal::from(988));
}

#[tokio::test]
async fn test_kline_rows_are_capped_at_request() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_json(kline_rows()))
        .mount(&server)
        .await;

    let client = KlineClient::new(server.uri(), TIMEOUT).unwrap();
    let request = KlineRequest::new("fx_sgbpusd", "5m", 1).unwrap();

    let rows = client.fetch_rows(&request).await.unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].len(), 7);
}

#[tokio::test]
async fn test_kline_non_200_is_status_error() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let client = KlineClient::new(server.uri(), TIMEOUT).unwrap();
    let request = KlineRequest::new("fx_sgbpusd", "1d", 10).unwrap();

    assert!(matches!(
        client.fetch(&request).await,
        Err(RestError::Status(503))
    ));
}

#[tokio::test]
async fn test_kline_malformed_row_is_rejected() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!([[1, "1", "1", "1", "1", "t", "1"], [1, 2]])),
        )
        .mount(&server)
        .await;

    let client = KlineClient::new(server.uri(), TIMEOUT).unwrap();
    let request = KlineRequest::new("fx_sgbpusd", "1h", 10).unwrap();

    assert!(matches!(
        client.fetch(&request).await,
        Err(RestError::MalformedRow { index: 1, .. })
    ));
}

#[tokio::test]
async fn test_kline_invalid_json_is_decode_error() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html>busy</html>"))
        .mount(&server)
        .await;

    let client = KlineClient::new(server.uri(), TIMEOUT).unwrap();
    let request = KlineRequest::new("fx_sgbpusd", "1M", 10).unwrap();

    assert!(matches!(
        client.fetch(&request).await,
        Err(RestError::Decode(_))
    ));
}

#[tokio::test]
async fn test_kline_timeout_is_http_error() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(kline_rows())
                .set_delay(Duration::from_secs(2)),
        )
        .mount(&server)
        .await;

    let client = KlineClient::new(server.uri(), Duration::from_millis(200)).unwrap();
    let request = KlineRequest::new("fx_sgbpusd", "1m", 10).unwrap();

    match client.fetch(&request).await {
        Err(RestError::Http(e)) => assert!(e.is_timeout()),
        other => panic!("expected timeout, got {other:?}"),
    }
}

#[test]
fn test_kline_validation_happens_before_any_request() {
    assert_eq!(
        KlineRequest::new("  ", "1m", 10),
        Err(ValidationError::EmptyCode)
    );
    assert_eq!(
        KlineRequest::new("fx_sgbpusd", "4h", 10),
        Err(ValidationError::UnsupportedTimeframe("4h".to_string()))
    );
    assert_eq!(
        KlineRequest::new("fx_sgbpusd", "1m", 0),
        Err(ValidationError::InvalidRows)
    );
    assert_eq!(Timeframe::ALL.len(), 7);
}

#[tokio::test]
async fn test_quote_fetch_returns_body() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/getQuote.php"))
        .and(query_param("code", "btcusdt"))
        .and(header_regex("accept-encoding", "gzip"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "code": 200,
            "msg": "ok",
            "data": {"body": {"StockCode": "btcusdt", "Price": "67012.5", "DiffRate": "0.42"}}
        })))
        .expect(1)
        .mount(&server)
        .await;

    let settings = RestSettings {
        kline_url: format!("{}/redis.php", server.uri()),
        quote_url: format!("{}/getQuote.php", server.uri()),
        timeout: TIMEOUT,
    };
    let client = QuoteClient::from_settings(&settings).unwrap();

    let quote = client.fetch("btcusdt").await.unwrap();
    assert_eq!(quote["StockCode"], "btcusdt");
    assert_eq!(quote["Price"], "67012.5");
}

#[tokio::test]
async fn test_quote_api_error_carries_message() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({"code": 500, "msg": "code not found"})),
        )
        .mount(&server)
        .await;

    let client = QuoteClient::new(server.uri(), TIMEOUT).unwrap();

    match client.fetch("nosuch").await {
        Err(RestError::Api(message)) => assert_eq!(message, "code not found"),
        other => panic!("expected API error, got {other:?}"),
    }
}

#[tokio::test]
async fn test_quote_missing_body() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"code": 200, "data": {}})))
        .mount(&server)
        .await;

    let client = QuoteClient::new(server.uri(), TIMEOUT).unwrap();

    assert!(matches!(
        client.fetch("btcusdt").await,
        Err(RestError::MissingBody)
    ));
}

#[tokio::test]
async fn test_quote_blank_code_makes_no_request() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let client = QuoteClient::new(server.uri(), TIMEOUT).unwrap();

    assert!(matches!(
        client.fetch("   ").await,
        Err(RestError::Validation(ValidationError::EmptyCode))
    ));
}
