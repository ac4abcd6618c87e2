//! Gateway Server
//!
//! Axum WebSocket endpoint that turns each downstream connection into a
//! [`SubscriberHub`] registration.
//!
//! # Connection Tasks
//!
//! ```text
//!            ┌─────────── reader (this task) ───────────┐
//! socket ──► │ commands → hub.subscribe / unsubscribe   │ ──► control replies ─┐
//!            └──────────────────────────────────────────┘                      │
//!                                                                              ▼
//!            ┌─────────── writer (spawned) ─────────────┐
//! socket ◄── │ control replies first, then feed payloads│ ◄── hub queue ◄── dispatcher
//!            └──────────────────────────────────────────┘
//! ```

use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::IntoResponse;
use axum::routing::get;
use bytes::Bytes;
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::hub::SubscriberHub;
use super::protocol::{ClientCommand, ServerFrame, normalize_keys};
use crate::domain::feed::SubscriberId;

/// Capacity of the per-connection control reply queue.
const REPLY_QUEUE_CAPACITY: usize = 32;

// =============================================================================
// Gateway Server
// =============================================================================

struct GatewayState {
    hub: Arc<SubscriberHub>,
    queue_capacity: usize,
    cancel: CancellationToken,
}

/// WebSocket server for downstream subscribers.
pub struct GatewayServer {
    port: u16,
    state: Arc<GatewayState>,
}

impl GatewayServer {
    /// Create a new gateway server.
    ///
    /// `queue_capacity` bounds each subscriber's outbound queue.
    #[must_use]
    pub fn new(
        port: u16,
        hub: Arc<SubscriberHub>,
        queue_capacity: usize,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            port,
            state: Arc::new(GatewayState {
                hub,
                queue_capacity: queue_capacity.max(1),
                cancel,
            }),
        }
    }

    /// Bind the configured port and serve until cancelled.
    ///
    /// # Errors
    ///
    /// Returns `GatewayError` if binding fails or the server stops with an
    /// error.
    pub async fn run(self) -> Result<(), GatewayError> {
        let addr = SocketAddr::from(([0, 0, 0, 0], self.port));
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| GatewayError::BindFailed(self.port, e.to_string()))?;

        self.run_with_listener(listener).await
    }

    /// Serve on an already bound listener until cancelled.
    ///
    /// # Errors
    ///
    /// Returns `GatewayError::ServerFailed` if the server stops with an error.
    pub async fn run_with_listener(self, listener: TcpListener) -> Result<(), GatewayError> {
        let local_addr = listener.local_addr().ok();
        tracing::info!(addr = ?local_addr, "Gateway listening");

        let cancel = self.state.cancel.clone();
        axum::serve(listener, router(self.state))
            .with_graceful_shutdown(cancel.cancelled_owned())
            .await
            .map_err(|e| GatewayError::ServerFailed(e.to_string()))?;

        tracing::info!("Gateway stopped");
        Ok(())
    }
}

fn router(state: Arc<GatewayState>) -> Router {
    Router::new()
        .route("/ws", get(ws_handler))
        .with_state(state)
}

// =============================================================================
// Connection Handling
// =============================================================================

async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<GatewayState>>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: Arc<GatewayState>) {
    let (subscriber, outbound) = state.hub.register(state.queue_capacity);
    let (ws_tx, mut ws_rx) = socket.split();
    let (reply_tx, reply_rx) = mpsc::channel::<ServerFrame>(REPLY_QUEUE_CAPACITY);

    tracing::info!(subscriber, "Subscriber connected");

    let writer = tokio::spawn(write_loop(ws_tx, reply_rx, outbound));
    let _ = reply_tx
        .send(ServerFrame::Welcome {
            subscriber_id: subscriber,
        })
        .await;

    loop {
        tokio::select! {
            () = state.cancel.cancelled() => break,
            message = ws_rx.next() => match message {
                Some(Ok(Message::Text(text))) => {
                    let reply = handle_command(&state.hub, subscriber, text.as_str());
                    if reply_tx.send(reply).await.is_err() {
                        break;
                    }
                }
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    tracing::debug!(subscriber, error = %e, "Subscriber socket error");
                    break;
                }
            },
        }
    }

    state.hub.unregister(subscriber);
    drop(reply_tx);
    writer.abort();

    tracing::info!(subscriber, "Subscriber disconnected");
}

/// Apply one subscriber command and build the reply.
fn handle_command(hub: &SubscriberHub, subscriber: SubscriberId, text: &str) -> ServerFrame {
    let command = match ClientCommand::parse(text) {
        Ok(command) => command,
        Err(e) => {
            return ServerFrame::Error {
                message: format!("invalid command: {e}"),
            };
        }
    };

    match command {
        ClientCommand::Subscribe { keys } => {
            let keys = normalize_keys(keys);
            if keys.is_empty() {
                return ServerFrame::Error {
                    message: "no keys given".to_string(),
                };
            }
            match hub.subscribe(subscriber, &keys) {
                Ok(_) => {
                    tracing::debug!(subscriber, keys = ?keys, "Subscribed");
                    ServerFrame::Subscribed { keys }
                }
                Err(e) => ServerFrame::Error {
                    message: e.to_string(),
                },
            }
        }
        ClientCommand::Unsubscribe { keys } => {
            let keys = normalize_keys(keys);
            match hub.unsubscribe(subscriber, &keys) {
                Ok(_) => {
                    tracing::debug!(subscriber, keys = ?keys, "Unsubscribed");
                    ServerFrame::Unsubscribed { keys }
                }
                Err(e) => ServerFrame::Error {
                    message: e.to_string(),
                },
            }
        }
        ClientCommand::Ping => ServerFrame::Pong,
    }
}

async fn write_loop(
    mut ws_tx: SplitSink<WebSocket, Message>,
    mut replies: mpsc::Receiver<ServerFrame>,
    mut payloads: mpsc::Receiver<Bytes>,
) {
    loop {
        let message = tokio::select! {
            biased;

            Some(reply) = replies.recv() => match reply.to_json() {
                Ok(json) => Message::Text(json.into()),
                Err(e) => {
                    tracing::warn!(error = %e, "Failed to encode control frame");
                    continue;
                }
            },
            payload = payloads.recv() => match payload {
                Some(payload) => payload_message(payload),
                None => break,
            },
        };

        if ws_tx.send(message).await.is_err() {
            break;
        }
    }

    let _ = ws_tx.close().await;
}

/// Feed payloads are JSON, so they go out as text frames.
fn payload_message(payload: Bytes) -> Message {
    match std::str::from_utf8(&payload) {
        Ok(text) => Message::Text(text.into()),
        Err(_) => Message::Binary(payload),
    }
}

// =============================================================================
// Errors
// =============================================================================

/// Gateway server errors.
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
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
