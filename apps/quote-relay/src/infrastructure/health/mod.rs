//! Health Check and Metrics Endpoint
//!
//! HTTP endpoint for health checks, upstream status reporting, and
//! Prometheus metrics.
//!
//! # Endpoints
//!
//! - `GET /health` - JSON health status
//! - `GET /healthz` - Liveness probe (simple OK)
//! - `GET /readyz` - Readiness probe (ready only while the upstream is live)
//! - `GET /metrics` - Prometheus metrics in text format

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::{Json, Router, extract::State, http::StatusCode, response::IntoResponse, routing::get};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use crate::domain::feed::ConnectionState;
use crate::infrastructure::broadcast::{DispatchStats, FanoutDispatcher};
use crate::infrastructure::gateway::SubscriberHub;
use crate::infrastructure::metrics::get_metrics_handle;
use crate::infrastructure::upstream::{ConnectorStats, UpstreamConnector};

// =============================================================================
// Health Response Types
// =============================================================================

/// Health check response.
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    /// Overall status.
    pub status: HealthStatus,
    /// Relay version.
    pub version: String,
    /// Uptime in seconds.
    pub uptime_secs: u64,
    /// Current time.
    pub current_time: DateTime<Utc>,
    /// Upstream connection status.
    pub upstream: UpstreamStatus,
    /// Fan-out counters.
    pub dispatch: DispatchStatus,
    /// Downstream subscribers.
    pub subscribers: SubscriberStatus,
}

/// Overall health status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    /// Upstream is live.
    Healthy,
    /// Upstream connection is being established.
    Degraded,
    /// Upstream is disconnected.
    Unhealthy,
}

impl HealthStatus {
    /// Map the upstream connection state onto a health status.
    #[must_use]
    pub const fn from_connection_state(state: ConnectionState) -> Self {
        match state {
            ConnectionState::Live => Self::Healthy,
            ConnectionState::Connecting | ConnectionState::Handshaking => Self::Degraded,
            ConnectionState::Disconnected => Self::Unhealthy,
        }
    }
}

/// Upstream connection status.
#[derive(Debug, Clone, Serialize)]
pub struct UpstreamStatus {
    /// Connection state.
    pub state: &'static str,
    /// Whether the heartbeat task is running.
    pub heartbeat_active: bool,
    /// Sessions that reached the live state.
    pub connections_established: u64,
    /// Frames received.
    pub frames_received: u64,
    /// Updates handed to the dispatcher.
    pub updates_forwarded: u64,
    /// Frames that failed to decode.
    pub decode_failures: u64,
    /// Updates dropped at the dispatch queue.
    pub updates_dropped: u64,
    /// Transport failures.
    pub transport_errors: u64,
    /// Heartbeats sent.
    pub heartbeats_sent: u64,
}

impl UpstreamStatus {
    fn new(state: ConnectionState, heartbeat_active: bool, stats: ConnectorStats) -> Self {
        Self {
            state: state.as_str(),
            heartbeat_active,
            connections_established: stats.connections_established,
            frames_received: stats.frames_received,
            updates_forwarded: stats.updates_forwarded,
            decode_failures: stats.decode_failures,
            updates_dropped: stats.updates_dropped,
            transport_errors: stats.transport_errors,
            heartbeats_sent: stats.heartbeats_sent,
        }
    }
}

/// Fan-out counters.
#[derive(Debug, Clone, Serialize)]
pub struct DispatchStatus {
    /// Routing mode.
    pub routing: &'static str,
    /// Updates published.
    pub updates_published: u64,
    /// Successful deliveries.
    pub deliveries: u64,
    /// Failed deliveries.
    pub delivery_failures: u64,
}

/// Downstream subscriber information.
#[derive(Debug, Clone, Serialize)]
pub struct SubscriberStatus {
    /// Connected subscribers.
    pub connected: usize,
    /// Distinct subscription keys held.
    pub keys: usize,
}

// =============================================================================
// Health Server State
// =============================================================================

/// Shared state for the health server.
pub struct HealthServerState {
    version: String,
    started_at: Instant,
    connector: Arc<UpstreamConnector>,
    hub: Arc<SubscriberHub>,
    dispatcher: Arc<FanoutDispatcher>,
}

impl HealthServerState {
    /// Create new health server state.
    #[must_use]
    pub fn new(
        version: String,
        connector: Arc<UpstreamConnector>,
        hub: Arc<SubscriberHub>,
        dispatcher: Arc<FanoutDispatcher>,
    ) -> Self {
        Self {
            version,
            started_at: Instant::now(),
            connector,
            hub,
            dispatcher,
        }
    }
}

// =============================================================================
// Health Server
// =============================================================================

/// Health check HTTP server.
pub struct HealthServer {
    port: u16,
    state: Arc<HealthServerState>,
    cancel: CancellationToken,
}

impl HealthServer {
    /// Create a new health server.
    #[must_use]
    pub const fn new(port: u16, state: Arc<HealthServerState>, cancel: CancellationToken) -> Self {
        Self {
            port,
            state,
            cancel,
        }
    }

    /// Run the health server until cancelled.
    ///
    /// # Errors
    ///
    /// Returns `HealthServerError` if binding fails or the HTTP server
    /// encounters a fatal error while running.
    pub async fn run(self) -> Result<(), HealthServerError> {
        let addr = SocketAddr::from(([0, 0, 0, 0], self.port));
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| HealthServerError::BindFailed(self.port, e.to_string()))?;

        tracing::info!(port = self.port, "Health server listening");

        axum::serve(listener, router(self.state))
            .with_graceful_shutdown(self.cancel.cancelled_owned())
            .await
            .map_err(|e| HealthServerError::ServerFailed(e.to_string()))?;

        tracing::info!("Health server stopped");
        Ok(())
    }
}

/// Build the health routes.
pub fn router(state: Arc<HealthServerState>) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/healthz", get(liveness_handler))
        .route("/readyz", get(readiness_handler))
        .route("/metrics", get(metrics_handler))
        .with_state(state)
}

// =============================================================================
// HTTP Handlers
// =============================================================================

async fn health_handler(State(state): State<Arc<HealthServerState>>) -> impl IntoResponse {
    let response = build_health_response(&state);
    let status_code = match response.status {
        HealthStatus::Healthy | HealthStatus::Degraded => StatusCode::OK,
        HealthStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
    };
    (status_code, Json(response))
}

async fn liveness_handler() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}

async fn readiness_handler(State(state): State<Arc<HealthServerState>>) -> impl IntoResponse {
    if state.connector.state().is_live() {
        (StatusCode::OK, "READY")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "NOT READY")
    }
}

async fn metrics_handler() -> impl IntoResponse {
    get_metrics_handle().map_or_else(
        || {
            (
                StatusCode::SERVICE_UNAVAILABLE,
                [("content-type", "text/plain")],
                "Metrics not initialized".to_string(),
            )
        },
        |handle| {
            (
                StatusCode::OK,
                [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
                handle.render(),
            )
        },
    )
}

fn build_health_response(state: &HealthServerState) -> HealthResponse {
    let connection = state.connector.state();
    let dispatch: DispatchStats = state.dispatcher.stats();
    let subscriptions = state.hub.subscription_stats();

    HealthResponse {
        status: HealthStatus::from_connection_state(connection),
        version: state.version.clone(),
        uptime_secs: state.started_at.elapsed().as_secs(),
        current_time: Utc::now(),
        upstream: UpstreamStatus::new(
            connection,
            state.connector.heartbeat_active(),
            state.connector.stats(),
        ),
        dispatch: DispatchStatus {
            routing: state.dispatcher.mode().as_str(),
            updates_published: dispatch.updates_published,
            deliveries: dispatch.deliveries,
            delivery_failures: dispatch.delivery_failures,
        },
        subscribers: SubscriberStatus {
            connected: state.hub.subscriber_count(),
            keys: subscriptions.key_count,
        },
    }
}

// =============================================================================
// Errors
// =============================================================================

/// Health server errors.
#[derive(Debug, thiserror::Error)]
pub enum HealthServerError {
    /// Failed to bind to port.
    #[error("failed to bind to port {0}: {1}")]
    BindFailed(u16, String),

    /// Server error.
    #[error("server error: {0}")]
    ServerFailed(String),
}

// =============================================================================
// Tests
// =============================================================================
