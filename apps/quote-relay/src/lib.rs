#![cfg_attr(
    test,
    allow(
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::float_cmp,
        clippy::significant_drop_tightening,
        clippy::too_many_lines,
        clippy::match_same_arms,
        clippy::needless_pass_by_value,
        clippy::needless_collect,
        clippy::option_if_let_else,
        clippy::default_trait_access,
        clippy::items_after_statements,
        clippy::or_fun_call
    )
)]

//! Quote Relay - Market Data Fan-out
//!
//! Holds one WebSocket connection to the upstream quote/K-line feed and
//! fans every decoded update out to downstream subscribers.
//!
//! # Layers (inside → outside)
//!
//! - **Domain**: Core relay types
//!   - `feed`: Feed updates and the connection state machine
//!   - `subscription`: Subscription key tracking
//!
//! - **Application**: Port definitions
//!   - `ports`: `ClientRegistry`, the delivery capability
//!
//! - **Infrastructure**: Adapters and external integrations
//!   - `upstream`: Connector, decoder, heartbeat and reconnect policy
//!   - `broadcast`: Fan-out dispatcher
//!   - `gateway`: Downstream WebSocket server and subscriber hub
//!   - `rest`: K-line and quote HTTP clients
//!   - `config`: Environment configuration
//!   - `health`: Health check HTTP endpoint
//!
//! # Data Flow
//!
//! ```text
//!                ┌───────────┐  bounded  ┌────────────┐     ┌──────────┐
//! Upstream WS ──►│ Connector │ ────────► │ Dispatcher │ ──► │   Hub    │──► subscriber 1
//!    ▲           │ + decoder │   queue   └────────────┘     │ (queues) │──► subscriber 2
//!    └─ ping ────│ heartbeat │                              └──────────┘──► subscriber N
//!                └───────────┘
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]

// =============================================================================
// Module Declarations
// =============================================================================

/// Domain layer - Core relay types with no I/O.
pub mod domain;

/// Application layer - Port definitions.
pub mod application;

/// Infrastructure layer - Adapters and external integrations.
pub mod infrastructure;

// =============================================================================
// Re-exports
// =============================================================================

// Domain types
pub use domain::feed::{ConnectionState, FeedUpdate, SubscriberId, SubscriptionKey};
pub use domain::subscription::{SubscriptionChanges, SubscriptionManager, SubscriptionStats};

// Ports
pub use application::ports::{ClientRegistry, DeliveryError};

// Infrastructure config
pub use infrastructure::config::{
    ConfigError, DispatchSettings, RelayConfig, RestSettings, RoutingMode, ServerSettings,
    UpstreamSettings,
};

// Upstream connector
pub use infrastructure::upstream::{
    ConnectorError, ConnectorStats, DecodeError, FeedDecoder, StateChange, TransportError,
    UpstreamConfig, UpstreamConnector,
};

// Fan-out
pub use infrastructure::broadcast::{DispatchReport, DispatchStats, FanoutDispatcher};

// Gateway
pub use infrastructure::gateway::{GatewayError, GatewayServer, SubscriberHub};

// REST clients
pub use infrastructure::rest::{
    KlineBar, KlineClient, KlineRequest, QuoteClient, RestError, Timeframe, ValidationError,
};

// Health server
pub use infrastructure::health::{HealthServer, HealthServerError, HealthServerState};

// Metrics
pub use infrastructure::metrics::init_metrics;

// Telemetry
pub use infrastructure::telemetry::{TelemetryConfig, TelemetryGuard, init as init_telemetry};
