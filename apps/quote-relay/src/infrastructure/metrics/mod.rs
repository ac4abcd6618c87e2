//! Prometheus Metrics Module
//!
//! Exposes relay metrics in Prometheus format.
//!
//! # Metrics Categories
//!
//! - **Upstream**: frames received, decode failures, ignored frames,
//!   reconnects, transport errors, heartbeats, connection state
//! - **Dispatch**: updates dropped at the queue, deliveries by outcome,
//!   dispatch duration
//! - **Subscribers**: connected subscriber count
//!
//! Recording before [`init_metrics`] is a no-op.
//!
//! # Integration
//!
//! Metrics are exposed at `/metrics` on the health server port.

use std::sync::OnceLock;
use std::time::Duration;

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

use crate::domain::feed::ConnectionState;

// =============================================================================
// Global Metrics Handle
// =============================================================================

static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Initialize the Prometheus metrics recorder.
///
/// Repeated calls return the handle installed by the first one.
///
/// # Panics
///
/// Panics if another global recorder was already installed.
#[allow(clippy::expect_used)]
pub fn init_metrics() -> PrometheusHandle {
    PROMETHEUS_HANDLE
        .get_or_init(|| {
            let handle = PrometheusBuilder::new()
                .install_recorder()
                .expect("failed to install Prometheus recorder");

            register_metrics();
            handle
        })
        .clone()
}

/// Get the Prometheus handle for rendering metrics.
///
/// Returns `None` if metrics have not been initialized.
#[must_use]
pub fn get_metrics_handle() -> Option<PrometheusHandle> {
    PROMETHEUS_HANDLE.get().cloned()
}

// =============================================================================
// Metric Names
// =============================================================================

const FRAMES_RECEIVED: &str = "quote_relay_frames_received_total";
const FRAMES_IGNORED: &str = "quote_relay_frames_ignored_total";
const DECODE_FAILURES: &str = "quote_relay_decode_failures_total";
const UPDATES_DROPPED: &str = "quote_relay_updates_dropped_total";
const DELIVERIES: &str = "quote_relay_deliveries_total";
const RECONNECTS: &str = "quote_relay_reconnects_total";
const TRANSPORT_ERRORS: &str = "quote_relay_transport_errors_total";
const HEARTBEATS_SENT: &str = "quote_relay_heartbeats_sent_total";
const CONNECTION_STATE: &str = "quote_relay_connection_state";
const SUBSCRIBERS: &str = "quote_relay_subscribers";
const DISPATCH_DURATION: &str = "quote_relay_dispatch_seconds";

fn register_metrics() {
    // Upstream
    describe_counter!(FRAMES_RECEIVED, "Frames received from the upstream feed");
    describe_counter!(FRAMES_IGNORED, "Upstream frames with nothing to forward");
    describe_counter!(DECODE_FAILURES, "Upstream frames that failed to decode, by kind");
    describe_counter!(RECONNECTS, "Upstream reconnection attempts");
    describe_counter!(TRANSPORT_ERRORS, "Upstream transport errors, by kind");
    describe_counter!(HEARTBEATS_SENT, "Heartbeat frames sent upstream");
    describe_gauge!(
        CONNECTION_STATE,
        "Upstream connection state (0=disconnected, 1=connecting, 2=handshaking, 3=live)"
    );

    // Dispatch
    describe_counter!(UPDATES_DROPPED, "Updates dropped because the dispatch queue was full");
    describe_counter!(DELIVERIES, "Per-subscriber delivery attempts, by outcome");
    describe_histogram!(DISPATCH_DURATION, "Time to fan one update out to subscribers");

    // Subscribers
    describe_gauge!(SUBSCRIBERS, "Connected downstream subscribers");
}

// =============================================================================
// Metric Recording Functions
// =============================================================================

/// Record a frame received from upstream.
pub fn record_frame_received() {
    counter!(FRAMES_RECEIVED).increment(1);
}

/// Record a frame that decoded to nothing.
pub fn record_frame_ignored() {
    counter!(FRAMES_IGNORED).increment(1);
}

/// Record a decode failure.
pub fn record_decode_failure(kind: &'static str) {
    counter!(DECODE_FAILURES, "kind" => kind).increment(1);
}

/// Record an update dropped at the dispatch queue.
pub fn record_update_dropped() {
    counter!(UPDATES_DROPPED).increment(1);
}

/// Record one delivery attempt. `outcome` is `delivered` or a failure kind.
pub fn record_delivery(outcome: &'static str) {
    counter!(DELIVERIES, "outcome" => outcome).increment(1);
}

/// Record a reconnection attempt.
pub fn record_reconnect() {
    counter!(RECONNECTS).increment(1);
}

/// Record a transport error.
pub fn record_transport_error(kind: &'static str) {
    counter!(TRANSPORT_ERRORS, "kind" => kind).increment(1);
}

/// Record a heartbeat sent upstream.
pub fn record_heartbeat_sent() {
    counter!(HEARTBEATS_SENT).increment(1);
}

/// Update the connection state gauge.
pub fn set_connection_state(state: ConnectionState) {
    gauge!(CONNECTION_STATE).set(state.as_gauge());
}

/// Update the subscriber gauge.
#[allow(clippy::cast_precision_loss)]
pub fn set_subscribers(count: usize) {
    gauge!(SUBSCRIBERS).set(count as f64);
}

/// Record how long one fan-out took.
pub fn record_dispatch_duration(duration: Duration) {
    histogram!(DISPATCH_DURATION).record(duration.as_secs_f64());
}

// =============================================================================
// Tests
// =============================================================================
