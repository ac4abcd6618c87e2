//! Upstream Connector
//!
//! Owns the single outbound WebSocket connection to the feed origin.
//!
//! # Lifecycle
//!
//! ```text
//! start() ─► Disconnected ─► Connecting ─► Handshaking ─► Live
//!                 ▲               │              │          │
//!                 │    connect    │   subscribe  │  read /  │
//!                 │    failure    │   failure    │  write / │
//!                 └───────────────┴──────────────┴──idle────┘
//!                        (reconnect delay, then Connecting)
//! ```
//!
//! All state changes and all transport I/O happen inside one spawned task.
//! Decoded updates leave through a bounded queue with a non-blocking send,
//! so a slow dispatcher costs dropped updates, never a stalled read loop.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use chrono::Utc;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{Sink, SinkExt, StreamExt};
use parking_lot::Mutex;
use tokio::net::TcpStream;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;

use super::decoder::{DecodeError, FeedDecoder};
use super::frames::{self, HeartbeatFrame, SubscribeFrame};
use super::heartbeat::{HeartbeatConfig, HeartbeatEvent, HeartbeatManager, HeartbeatState};
use super::reconnect::{ReconnectConfig, ReconnectPolicy};
use crate::domain::feed::{ConnectionState, FeedUpdate, SubscriptionKey};
use crate::infrastructure::metrics;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsWrite = SplitSink<WsStream, Message>;
type WsRead = SplitStream<WsStream>;

/// Upper bound on the close handshake when tearing a connection down.
const CLOSE_TIMEOUT: Duration = Duration::from_secs(2);

/// Buffered state changes per transition subscriber.
const TRANSITION_BUFFER: usize = 64;

/// Upper bound on a single outbound frame write.
const WRITE_TIMEOUT: Duration = Duration::from_secs(5);

// =============================================================================
// Error Types
// =============================================================================

/// Transport failures. Each one resets the connection; none is fatal.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// WebSocket connect failed.
    #[error("connect failed: {0}")]
    Connect(#[source] tungstenite::Error),

    /// WebSocket connect did not finish in time.
    #[error("connect timed out after {0:?}")]
    ConnectTimeout(Duration),

    /// Read or write on an established connection failed.
    #[error("WebSocket error: {0}")]
    WebSocket(#[source] tungstenite::Error),

    /// Writing the liveness ping failed.
    #[error("heartbeat send failed: {0}")]
    Heartbeat(#[source] tungstenite::Error),

    /// An outbound frame could not be written in time.
    #[error("write stalled for {0:?}")]
    WriteTimeout(Duration),

    /// The heartbeat task ended while the connection was live.
    #[error("heartbeat task stopped")]
    HeartbeatStopped,

    /// Nothing arrived from the origin for too long.
    #[error("no data from upstream for {0:?}")]
    IdleTimeout(Duration),

    /// The origin closed the connection.
    #[error("upstream closed the connection")]
    RemoteClosed,

    /// An outbound frame could not be serialized.
    #[error("failed to encode outbound frame: {0}")]
    Encode(#[source] serde_json::Error),
}

impl TransportError {
    /// Short label for metrics.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Connect(_) => "connect",
            Self::ConnectTimeout(_) => "connect_timeout",
            Self::WebSocket(_) => "websocket",
            Self::Heartbeat(_) => "heartbeat",
            Self::WriteTimeout(_) => "write_timeout",
            Self::HeartbeatStopped => "heartbeat_stopped",
            Self::IdleTimeout(_) => "idle_timeout",
            Self::RemoteClosed => "remote_closed",
            Self::Encode(_) => "encode",
        }
    }
}

/// Errors returned by connector control operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConnectorError {
    /// `start()` was called while the loop is running.
    #[error("upstream connector is already running")]
    AlreadyRunning,
}

// =============================================================================
// Configuration
// =============================================================================

/// Configuration for the upstream connector.
#[derive(Debug, Clone, PartialEq)]
pub struct UpstreamConfig {
    /// WebSocket URL of the feed origin.
    pub url: String,
    /// Keys sent in the subscribe handshake.
    pub keys: Vec<SubscriptionKey>,
    /// Upper bound on the transport connect.
    pub connect_timeout: Duration,
    /// Reconnection configuration.
    pub reconnect: ReconnectConfig,
    /// Heartbeat configuration.
    pub heartbeat: HeartbeatConfig,
}

impl UpstreamConfig {
    /// Create a configuration with default timings.
    #[must_use]
    pub fn new(url: impl Into<String>, keys: Vec<SubscriptionKey>) -> Self {
        Self {
            url: url.into(),
            keys,
            connect_timeout: Duration::from_secs(10),
            reconnect: ReconnectConfig::default(),
            heartbeat: HeartbeatConfig::default(),
        }
    }

    /// Create configuration from `UpstreamSettings`.
    #[must_use]
    pub fn from_upstream_settings(settings: &crate::UpstreamSettings) -> Self {
        Self {
            url: settings.url.clone(),
            keys: settings.subscription_keys.clone(),
            connect_timeout: settings.connect_timeout,
            reconnect: ReconnectConfig::from_upstream_settings(settings),
            heartbeat: HeartbeatConfig::from_upstream_settings(settings),
        }
    }
}

// =============================================================================
// Statistics
// =============================================================================

/// Running counters for the connector.
#[derive(Debug, Default)]
struct Counters {
    connections_established: AtomicU64,
    frames_received: AtomicU64,
    updates_forwarded: AtomicU64,
    frames_ignored: AtomicU64,
    decode_failures: AtomicU64,
    updates_dropped: AtomicU64,
    transport_errors: AtomicU64,
    heartbeats_sent: AtomicU64,
}

/// Snapshot of connector counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConnectorStats {
    /// Connections that reached `Live`.
    pub connections_established: u64,
    /// Data frames read from the origin.
    pub frames_received: u64,
    /// Updates handed to the dispatch queue.
    pub updates_forwarded: u64,
    /// Frames that carried nothing to relay.
    pub frames_ignored: u64,
    /// Frames that failed to decode.
    pub decode_failures: u64,
    /// Updates dropped because the dispatch queue was full or closed.
    pub updates_dropped: u64,
    /// Connections torn down by a transport error.
    pub transport_errors: u64,
    /// Liveness pings written.
    pub heartbeats_sent: u64,
}

impl Counters {
    fn snapshot(&self) -> ConnectorStats {
        ConnectorStats {
            connections_established: self.connections_established.load(Ordering::Relaxed),
            frames_received: self.frames_received.load(Ordering::Relaxed),
            updates_forwarded: self.updates_forwarded.load(Ordering::Relaxed),
            frames_ignored: self.frames_ignored.load(Ordering::Relaxed),
            decode_failures: self.decode_failures.load(Ordering::Relaxed),
            updates_dropped: self.updates_dropped.load(Ordering::Relaxed),
            transport_errors: self.transport_errors.load(Ordering::Relaxed),
            heartbeats_sent: self.heartbeats_sent.load(Ordering::Relaxed),
        }
    }
}

fn bump(counter: &AtomicU64) {
    counter.fetch_add(1, Ordering::Relaxed);
}

/// Write one frame, giving up after [`WRITE_TIMEOUT`] so a stalled origin
/// cannot hold the read loop.
async fn send_bounded<S>(
    sink: &mut S,
    message: Message,
    on_error: fn(tungstenite::Error) -> TransportError,
) -> Result<(), TransportError>
where
    S: Sink<Message, Error = tungstenite::Error> + Unpin,
{
    tokio::time::timeout(WRITE_TIMEOUT, sink.send(message))
        .await
        .map_err(|_| TransportError::WriteTimeout(WRITE_TIMEOUT))?
        .map_err(on_error)
}

// =============================================================================
// Upstream Connector
// =============================================================================

/// One edge taken through the connection state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StateChange {
    /// State left.
    pub from: ConnectionState,
    /// State entered.
    pub to: ConnectionState,
}

/// State shared between the handle and the run task.
struct Shared {
    config: UpstreamConfig,
    decoder: FeedDecoder,
    update_tx: mpsc::Sender<FeedUpdate>,
    state_tx: watch::Sender<ConnectionState>,
    transitions_tx: broadcast::Sender<StateChange>,
    counters: Counters,
    heartbeat_active: AtomicBool,
}

struct RunningLoop {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

/// Maintains the connection to the feed origin.
///
/// # Example
///
/// ```rust,no_run
/// use quote_relay::infrastructure::upstream::{UpstreamConfig, UpstreamConnector};
/// use tokio::sync::mpsc;
///
/// async fn example() {
///     let (update_tx, mut update_rx) = mpsc::channel(4096);
///     let config = UpstreamConfig::new("ws://127.0.0.1:9000/ws", vec!["btcusdt".to_string()]);
///     let connector = UpstreamConnector::new(config, update_tx);
///
///     connector.start().expect("not running yet");
///     while let Some(update) = update_rx.recv().await {
///         println!("{}: {} bytes", update.subscription_key(), update.payload().len());
///     }
///     connector.stop().await;
/// }
/// ```
pub struct UpstreamConnector {
    shared: Arc<Shared>,
    running: Mutex<Option<RunningLoop>>,
}

impl UpstreamConnector {
    /// Create a stopped connector that forwards updates into `update_tx`.
    #[must_use]
    pub fn new(config: UpstreamConfig, update_tx: mpsc::Sender<FeedUpdate>) -> Self {
        let (state_tx, _) = watch::channel(ConnectionState::Disconnected);
        let (transitions_tx, _) = broadcast::channel(TRANSITION_BUFFER);
        Self {
            shared: Arc::new(Shared {
                config,
                decoder: FeedDecoder::new(),
                update_tx,
                state_tx,
                transitions_tx,
                counters: Counters::default(),
                heartbeat_active: AtomicBool::new(false),
            }),
            running: Mutex::new(None),
        }
    }

    /// Spawn the connect/maintain loop and return immediately.
    ///
    /// Must be called from within a Tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns [`ConnectorError::AlreadyRunning`] if the loop is active.
    pub fn start(&self) -> Result<(), ConnectorError> {
        let mut running = self.running.lock();
        if running.as_ref().is_some_and(|r| !r.handle.is_finished()) {
            return Err(ConnectorError::AlreadyRunning);
        }

        let cancel = CancellationToken::new();
        let handle = tokio::spawn(Arc::clone(&self.shared).run(cancel.clone()));
        *running = Some(RunningLoop { cancel, handle });

        tracing::info!(url = %self.shared.config.url, "Upstream connector started");
        Ok(())
    }

    /// Stop the loop and wait for it to finish.
    ///
    /// On return the heartbeat task has exited, the transport is closed and
    /// the state is `Disconnected`. A no-op when not running.
    pub async fn stop(&self) {
        let running = self.running.lock().take();
        let Some(running) = running else {
            return;
        };

        running.cancel.cancel();
        if let Err(e) = running.handle.await {
            tracing::error!(error = %e, "Upstream connector task failed");
            self.shared.transition(ConnectionState::Disconnected);
        }
    }

    /// Whether the loop is active.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.running
            .lock()
            .as_ref()
            .is_some_and(|r| !r.handle.is_finished())
    }

    /// Current connection state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        *self.shared.state_tx.borrow()
    }

    /// Watch connection state changes.
    #[must_use]
    pub fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.shared.state_tx.subscribe()
    }

    /// Every state change in order, unlike [`Self::subscribe_state`] which
    /// only keeps the latest value.
    #[must_use]
    pub fn subscribe_transitions(&self) -> broadcast::Receiver<StateChange> {
        self.shared.transitions_tx.subscribe()
    }

    /// Whether a heartbeat task is currently running.
    #[must_use]
    pub fn heartbeat_active(&self) -> bool {
        self.shared.heartbeat_active.load(Ordering::SeqCst)
    }

    /// Current counters.
    #[must_use]
    pub fn stats(&self) -> ConnectorStats {
        self.shared.counters.snapshot()
    }
}

impl Shared {
    fn transition(&self, next: ConnectionState) {
        let previous = self.state_tx.send_replace(next);
        if previous == next {
            return;
        }
        debug_assert!(
            previous.can_transition_to(next),
            "illegal transition {previous} -> {next}"
        );
        metrics::set_connection_state(next);
        // No receivers is fine.
        let _ = self.transitions_tx.send(StateChange {
            from: previous,
            to: next,
        });
        tracing::debug!(from = %previous, to = %next, "Upstream state changed");
    }

    async fn run(self: Arc<Self>, cancel: CancellationToken) {
        let mut reconnect_policy = ReconnectPolicy::new(self.config.reconnect.clone());

        loop {
            if cancel.is_cancelled() {
                break;
            }

            match self.connect_and_run(&cancel, &mut reconnect_policy).await {
                Ok(()) => break,
                Err(e) => {
                    tracing::warn!(error = %e, kind = e.kind(), "Upstream connection error");
                    bump(&self.counters.transport_errors);
                    metrics::record_transport_error(e.kind());
                }
            }

            self.transition(ConnectionState::Disconnected);

            let delay = reconnect_policy.next_delay();
            let attempt = reconnect_policy.attempt_count();
            tracing::info!(
                attempt,
                delay_ms = delay.as_millis(),
                "Reconnecting to upstream feed"
            );
            metrics::record_reconnect();

            tokio::select! {
                () = cancel.cancelled() => break,
                () = tokio::time::sleep(delay) => {}
            }
        }

        self.transition(ConnectionState::Disconnected);
        tracing::info!("Upstream connector stopped");
    }

    /// Run one connection to completion.
    ///
    /// Returns `Ok(())` only when cancelled.
    async fn connect_and_run(
        &self,
        cancel: &CancellationToken,
        reconnect_policy: &mut ReconnectPolicy,
    ) -> Result<(), TransportError> {
        self.transition(ConnectionState::Connecting);
        tracing::info!(url = %self.config.url, "Connecting to upstream feed");

        let timeout = self.config.connect_timeout;
        let connect =
            tokio::time::timeout(timeout, tokio_tungstenite::connect_async(self.config.url.as_str()));
        let ws_stream = tokio::select! {
            () = cancel.cancelled() => return Ok(()),
            result = connect => {
                let (stream, _response) = result
                    .map_err(|_| TransportError::ConnectTimeout(timeout))?
                    .map_err(TransportError::Connect)?;
                stream
            }
        };

        self.transition(ConnectionState::Handshaking);
        let (mut write, mut read) = ws_stream.split();

        let subscribe = frames::to_text_message(&SubscribeFrame::new(&self.config.keys))
            .map_err(TransportError::Encode)?;
        send_bounded(&mut write, subscribe, TransportError::WebSocket).await?;

        let heartbeat_state = Arc::new(HeartbeatState::new());
        let (heartbeat_tx, mut heartbeat_rx) = mpsc::channel::<HeartbeatEvent>(4);
        let heartbeat_cancel = cancel.child_token();
        let heartbeat_manager = HeartbeatManager::new(
            self.config.heartbeat.clone(),
            heartbeat_state.clone(),
            heartbeat_tx,
            heartbeat_cancel.clone(),
        );
        self.heartbeat_active.store(true, Ordering::SeqCst);
        let heartbeat_handle = tokio::spawn(heartbeat_manager.run());

        // Heartbeat runs before observers see Live.
        reconnect_policy.reset();
        bump(&self.counters.connections_established);
        self.transition(ConnectionState::Live);
        tracing::info!(keys = %self.config.keys.join(","), "Upstream feed live");

        let result = self
            .pump(
                cancel,
                &mut write,
                &mut read,
                &heartbeat_state,
                &mut heartbeat_rx,
            )
            .await;

        heartbeat_cancel.cancel();
        if let Err(e) = heartbeat_handle.await {
            tracing::error!(error = %e, "Heartbeat task failed");
        }
        self.heartbeat_active.store(false, Ordering::SeqCst);

        if tokio::time::timeout(CLOSE_TIMEOUT, write.close())
            .await
            .is_err()
        {
            tracing::debug!("Close handshake timed out");
        }

        result
    }

    /// Read frames and heartbeat events until error or cancellation.
    async fn pump(
        &self,
        cancel: &CancellationToken,
        write: &mut WsWrite,
        read: &mut WsRead,
        heartbeat_state: &HeartbeatState,
        heartbeat_rx: &mut mpsc::Receiver<HeartbeatEvent>,
    ) -> Result<(), TransportError> {
        loop {
            tokio::select! {
                biased;

                () = cancel.cancelled() => return Ok(()),
                event = heartbeat_rx.recv() => match event {
                    Some(HeartbeatEvent::SendPing) => {
                        let ping = frames::to_text_message(&HeartbeatFrame::at(Utc::now()))
                            .map_err(TransportError::Encode)?;
                        send_bounded(write, ping, TransportError::Heartbeat).await?;
                        bump(&self.counters.heartbeats_sent);
                        metrics::record_heartbeat_sent();
                    }
                    Some(HeartbeatEvent::IdleTimeout(silent)) => {
                        return Err(TransportError::IdleTimeout(silent));
                    }
                    None => return Err(TransportError::HeartbeatStopped),
                },
                frame = read.next() => match frame {
                    Some(Ok(message)) => {
                        heartbeat_state.record_inbound();
                        self.handle_message(message, write).await?;
                    }
                    Some(Err(e)) => return Err(TransportError::WebSocket(e)),
                    None => return Err(TransportError::RemoteClosed),
                },
            }
        }
    }

    async fn handle_message(
        &self,
        message: Message,
        write: &mut WsWrite,
    ) -> Result<(), TransportError> {
        match message {
            Message::Text(text) => self.forward(self.decoder.decode(text.as_str())),
            Message::Binary(data) => self.forward(self.decoder.decode_bytes(&data)),
            Message::Ping(data) => {
                send_bounded(write, Message::Pong(data), TransportError::WebSocket).await?;
            }
            Message::Close(frame) => {
                tracing::info!(frame = ?frame, "Upstream sent close frame");
                return Err(TransportError::RemoteClosed);
            }
            Message::Pong(_) | Message::Frame(_) => {}
        }
        Ok(())
    }

    fn forward(&self, decoded: Result<Option<FeedUpdate>, DecodeError>) {
        bump(&self.counters.frames_received);
        metrics::record_frame_received();

        match decoded {
            Ok(Some(update)) => match self.update_tx.try_send(update) {
                Ok(()) => bump(&self.counters.updates_forwarded),
                Err(mpsc::error::TrySendError::Full(update)) => {
                    bump(&self.counters.updates_dropped);
                    metrics::record_update_dropped();
                    tracing::warn!(
                        key = update.subscription_key(),
                        "Dispatch queue full, dropping update"
                    );
                }
                Err(mpsc::error::TrySendError::Closed(_)) => {
                    bump(&self.counters.updates_dropped);
                    metrics::record_update_dropped();
                    tracing::debug!("Dispatch queue closed, dropping update");
                }
            },
            Ok(None) => {
                bump(&self.counters.frames_ignored);
                metrics::record_frame_ignored();
            }
            Err(e) => {
                bump(&self.counters.decode_failures);
                metrics::record_decode_failure(e.kind());
                tracing::warn!(error = %e, "Dropping undecodable frame");
            }
        }
    }
}
