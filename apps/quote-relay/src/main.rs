//! Quote Relay Binary
//!
//! Starts the market data relay.
//!
//! # Usage
//!
//! ```bash
//! cargo run --bin quote-relay
//! ```
//!
//! # Environment Variables
//!
//! - `RELAY_UPSTREAM_URL`: Upstream feed URL (default: `ws://39.107.99.235/ws`)
//! - `RELAY_SUBSCRIPTION_KEYS`: Comma-separated keys (default: btcusdt,ethusdt)
//! - `RELAY_ROUTING`: broadcast | `per_key` (default: broadcast)
//! - `RELAY_GATEWAY_PORT`: Subscriber WebSocket port (default: 8090)
//! - `RELAY_HEALTH_PORT`: Health check HTTP port (default: 8082)
//! - `RELAY_HEARTBEAT_INTERVAL_SECS`, `RELAY_IDLE_TIMEOUT_SECS`,
//!   `RELAY_CONNECT_TIMEOUT_SECS`, `RELAY_RECONNECT_*`: upstream tuning
//! - `OTEL_ENABLED`: Enable OpenTelemetry export (default: false)
//! - `RUST_LOG`: Log level (default: info)

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use quote_relay::infrastructure::telemetry;
use quote_relay::{
    ClientRegistry, FanoutDispatcher, FeedUpdate, GatewayServer, HealthServer,
    HealthServerState, RelayConfig, SubscriberHub, UpstreamConfig, UpstreamConnector,
    init_metrics,
};
use tokio::signal;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// How long servers get to drain after cancellation.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    rustls::crypto::ring::default_provider()
        .install_default()
        .map_err(|_| anyhow::anyhow!("failed to install rustls crypto provider"))?;

    load_dotenv();

    let _telemetry_guard = telemetry::init();

    tracing::info!("Starting quote relay");

    let _metrics_handle = init_metrics();

    let config = RelayConfig::from_env().context("invalid configuration")?;
    log_config(&config);

    let shutdown_token = CancellationToken::new();

    // Upstream → dispatcher queue
    let (update_tx, update_rx) =
        mpsc::channel::<FeedUpdate>(config.dispatch.dispatch_queue_capacity);

    let hub = Arc::new(SubscriberHub::new());
    let registry: Arc<dyn ClientRegistry> = hub.clone();
    let dispatcher = Arc::new(FanoutDispatcher::new(registry, config.dispatch.routing));
    let connector = Arc::new(UpstreamConnector::new(
        UpstreamConfig::from_upstream_settings(&config.upstream),
        update_tx,
    ));

    let dispatcher_task = tokio::spawn(
        Arc::clone(&dispatcher).run(update_rx, shutdown_token.clone()),
    );

    let gateway = GatewayServer::new(
        config.server.gateway_port,
        Arc::clone(&hub),
        config.dispatch.subscriber_queue_capacity,
        shutdown_token.clone(),
    );
    let gateway_task = tokio::spawn(async move {
        if let Err(e) = gateway.run().await {
            tracing::error!(error = %e, "Gateway error");
        }
    });

    let health_state = Arc::new(HealthServerState::new(
        env!("CARGO_PKG_VERSION").to_string(),
        Arc::clone(&connector),
        Arc::clone(&hub),
        Arc::clone(&dispatcher),
    ));
    let health_server = HealthServer::new(
        config.server.health_port,
        health_state,
        shutdown_token.clone(),
    );
    let health_task = tokio::spawn(async move {
        if let Err(e) = health_server.run().await {
            tracing::error!(error = %e, "Health server error");
        }
    });

    connector.start()?;

    tracing::info!("Quote relay ready");

    await_shutdown().await;

    connector.stop().await;
    shutdown_token.cancel();

    let drained = tokio::time::timeout(SHUTDOWN_TIMEOUT, async {
        let _ = tokio::join!(dispatcher_task, gateway_task, health_task);
    })
    .await;
    if drained.is_err() {
        tracing::warn!(
            timeout_secs = SHUTDOWN_TIMEOUT.as_secs(),
            "Shutdown timed out, exiting anyway"
        );
    }

    tracing::info!("Quote relay stopped");
    Ok(())
}

/// Log the parsed configuration.
fn log_config(config: &RelayConfig) {
    tracing::info!(
        upstream = %config.upstream.url,
        keys = ?config.upstream.subscription_keys,
        routing = config.dispatch.routing.as_str(),
        gateway_port = config.server.gateway_port,
        health_port = config.server.health_port,
        "Configuration loaded"
    );
    tracing::debug!(
        heartbeat_secs = config.upstream.heartbeat_interval.as_secs(),
        idle_timeout_secs = config.upstream.idle_timeout.map(|d| d.as_secs()),
        reconnect_initial_ms = config.upstream.reconnect_delay_initial.as_millis(),
        kline_url = %config.rest.kline_url,
        quote_url = %config.rest.quote_url,
        "Upstream tuning"
    );
}

/// Load .env file from current directory or any ancestor directory.
fn load_dotenv() {
    if dotenvy::dotenv().is_ok() {
        return;
    }

    if let Ok(cwd) = std::env::current_dir() {
        let mut dir = cwd.as_path();
        while let Some(parent) = dir.parent() {
            let env_path = parent.join(".env");
            if env_path.exists() {
                let _ = dotenvy::from_path(&env_path);
                return;
            }
            dir = parent;
        }
    }
}

/// Wait for shutdown signal (SIGTERM or SIGINT).
#[allow(clippy::expect_used)]
async fn await_shutdown() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("signal handler installation is critical for graceful shutdown");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("SIGTERM handler installation is critical for graceful shutdown")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating shutdown");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, initiating shutdown");
        }
    }
}
