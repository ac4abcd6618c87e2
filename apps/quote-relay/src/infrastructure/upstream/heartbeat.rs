//! Heartbeat Manager
//!
//! Per-connection task that asks the connector to send a liveness ping on a
//! fixed cadence and watches how long the origin has been silent. One
//! manager is spawned on entering `Live` and cancelled on every exit.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use tokio::sync::mpsc;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

/// Configuration for heartbeat behavior.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeartbeatConfig {
    /// Interval between ping messages.
    pub ping_interval: Duration,
    /// Maximum silence from the origin before the connection is dropped.
    /// `None` disables the watchdog.
    pub idle_timeout: Option<Duration>,
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            ping_interval: Duration::from_secs(10),
            idle_timeout: Some(Duration::from_secs(180)),
        }
    }
}

impl HeartbeatConfig {
    /// Create a new configuration with custom values.
    #[must_use]
    pub const fn new(ping_interval: Duration, idle_timeout: Option<Duration>) -> Self {
        Self {
            ping_interval,
            idle_timeout,
        }
    }

    /// Create configuration from `UpstreamSettings`.
    #[must_use]
    pub const fn from_upstream_settings(settings: &crate::UpstreamSettings) -> Self {
        Self {
            ping_interval: settings.heartbeat_interval,
            idle_timeout: settings.idle_timeout,
        }
    }
}

/// Events emitted by the heartbeat manager.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HeartbeatEvent {
    /// Request to send a ping message.
    SendPing,
    /// Nothing arrived from the origin for the given duration.
    IdleTimeout(Duration),
}

/// State shared between the heartbeat manager and the read loop.
#[derive(Debug)]
pub struct HeartbeatState {
    last_inbound: RwLock<Instant>,
}

impl Default for HeartbeatState {
    fn default() -> Self {
        Self::new()
    }
}

impl HeartbeatState {
    /// Create new heartbeat state.
    #[must_use]
    pub fn new() -> Self {
        Self {
            last_inbound: RwLock::new(Instant::now()),
        }
    }

    /// Record that a frame arrived from the origin.
    pub fn record_inbound(&self) {
        *self.last_inbound.write() = Instant::now();
    }

    /// Time since the last inbound frame.
    #[must_use]
    pub fn time_since_inbound(&self) -> Duration {
        self.last_inbound.read().elapsed()
    }
}

/// Heartbeat manager bound to one connection.
///
/// The first ping is requested one full interval after the manager starts.
///
/// # Example
///
/// ```rust,no_run
/// use quote_relay::infrastructure::upstream::heartbeat::{
///     HeartbeatConfig, HeartbeatEvent, HeartbeatManager, HeartbeatState,
/// };
/// use std::sync::Arc;
/// use tokio::sync::mpsc;
/// use tokio_util::sync::CancellationToken;
///
/// async fn example() {
///     let state = Arc::new(HeartbeatState::new());
///     let (event_tx, mut event_rx) = mpsc::channel(4);
///     let cancel = CancellationToken::new();
///
///     let manager = HeartbeatManager::new(
///         HeartbeatConfig::default(),
///         state.clone(),
///         event_tx,
///         cancel.child_token(),
///     );
///     let handle = tokio::spawn(manager.run());
///
///     while let Some(event) = event_rx.recv().await {
///         match event {
///             HeartbeatEvent::SendPing => { /* write the ping frame */ }
///             HeartbeatEvent::IdleTimeout(_) => break,
///         }
///     }
///
///     cancel.cancel();
///     let _ = handle.await;
/// }
/// ```
pub struct HeartbeatManager {
    config: HeartbeatConfig,
    state: Arc<HeartbeatState>,
    event_tx: mpsc::Sender<HeartbeatEvent>,
    cancel: CancellationToken,
}

impl HeartbeatManager {
    /// Create a new heartbeat manager.
    #[must_use]
    pub const fn new(
        config: HeartbeatConfig,
        state: Arc<HeartbeatState>,
        event_tx: mpsc::Sender<HeartbeatEvent>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            config,
            state,
            event_tx,
            cancel,
        }
    }

    /// Run until cancelled, the event channel closes, or the origin goes idle.
    pub async fn run(self) {
        let period = self.config.ping_interval;
        let mut interval = tokio::time::interval_at(Instant::now() + period, period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                () = self.cancel.cancelled() => {
                    tracing::debug!("Heartbeat manager cancelled");
                    break;
                }
                _ = interval.tick() => {
                    if self.check_and_ping().await.is_err() {
                        break;
                    }
                }
            }
        }
    }

    /// Returns `Err(())` when the loop should exit.
    async fn check_and_ping(&self) -> Result<(), ()> {
        if let Some(idle_timeout) = self.config.idle_timeout {
            let silent = self.state.time_since_inbound();
            if silent >= idle_timeout {
                tracing::warn!(
                    silent_secs = silent.as_secs(),
                    timeout_secs = idle_timeout.as_secs(),
                    "Upstream idle timeout detected"
                );
                let _ = self.event_tx.send(HeartbeatEvent::IdleTimeout(silent)).await;
                return Err(());
            }
        }

        if self.event_tx.send(HeartbeatEvent::SendPing).await.is_err() {
            tracing::debug!("Event channel closed, stopping heartbeat");
            return Err(());
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spawn_manager(
        config: HeartbeatConfig,
        state: Arc<HeartbeatState>,
    ) -> (
        mpsc::Receiver<HeartbeatEvent>,
        CancellationToken,
        tokio::task::JoinHandle<()>,
    ) {
        let (event_tx, event_rx) = mpsc::channel(16);
        let cancel = CancellationToken::new();
        let manager = HeartbeatManager::new(config, state, event_tx, cancel.clone());
        (event_rx, cancel, tokio::spawn(manager.run()))
    }

    #[test]
    fn default_config_values() {
        let config = HeartbeatConfig::default();
        assert_eq!(config.ping_interval, Duration::from_secs(10));
        assert_eq!(config.idle_timeout, Some(Duration::from_secs(180)));
    }

    #[tokio::test(start_paused = true)]
    async fn state_tracks_inbound() {
        let state = HeartbeatState::new();
        tokio::time::advance(Duration::from_secs(5)).await;
        assert_eq!(state.time_since_inbound(), Duration::from_secs(5));

        state.record_inbound();
        assert_eq!(state.time_since_inbound(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn first_ping_after_one_full_interval() {
        let config = HeartbeatConfig::new(Duration::from_secs(10), None);
        let (mut rx, cancel, handle) = spawn_manager(config, Arc::new(HeartbeatState::new()));
        let start = Instant::now();

        assert_eq!(rx.recv().await, Some(HeartbeatEvent::SendPing));
        assert_eq!(start.elapsed(), Duration::from_secs(10));

        cancel.cancel();
        handle.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn one_ping_per_interval() {
        let config = HeartbeatConfig::new(Duration::from_secs(10), None);
        let (mut rx, cancel, handle) = spawn_manager(config, Arc::new(HeartbeatState::new()));
        let start = Instant::now();

        for window in 1..=5u64 {
            assert_eq!(rx.recv().await, Some(HeartbeatEvent::SendPing));
            assert_eq!(start.elapsed(), Duration::from_secs(10 * window));
        }
        assert!(rx.try_recv().is_err());

        cancel.cancel();
        handle.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn idle_origin_triggers_timeout() {
        let config = HeartbeatConfig::new(Duration::from_secs(10), Some(Duration::from_secs(25)));
        let (mut rx, _cancel, handle) = spawn_manager(config, Arc::new(HeartbeatState::new()));

        assert_eq!(rx.recv().await, Some(HeartbeatEvent::SendPing));
        assert_eq!(rx.recv().await, Some(HeartbeatEvent::SendPing));
        assert_eq!(
            rx.recv().await,
            Some(HeartbeatEvent::IdleTimeout(Duration::from_secs(30)))
        );

        // Manager exits on its own after the timeout.
        handle.await.unwrap();
        assert_eq!(rx.recv().await, None);
    }

    #[tokio::test(start_paused = true)]
    async fn inbound_traffic_keeps_connection_alive() {
        let config = HeartbeatConfig::new(Duration::from_secs(10), Some(Duration::from_secs(15)));
        let state = Arc::new(HeartbeatState::new());
        let (mut rx, cancel, handle) = spawn_manager(config, state.clone());

        for _ in 0..4 {
            assert_eq!(rx.recv().await, Some(HeartbeatEvent::SendPing));
            state.record_inbound();
        }

        cancel.cancel();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn manager_cancellation() {
        let config = HeartbeatConfig::new(Duration::from_secs(10), None);
        let (_rx, cancel, handle) = spawn_manager(config, Arc::new(HeartbeatState::new()));

        cancel.cancel();

        let result = tokio::time::timeout(Duration::from_millis(100), handle).await;
        assert!(result.is_ok(), "manager should shut down on cancellation");
    }

    #[tokio::test]
    async fn closed_channel_stops_manager() {
        let config = HeartbeatConfig::new(Duration::from_millis(10), None);
        let (rx, _cancel, handle) = spawn_manager(config, Arc::new(HeartbeatState::new()));
        drop(rx);

        let result = tokio::time::timeout(Duration::from_secs(1), handle).await;
        assert!(result.is_ok(), "manager should stop when nobody listens");
    }
}
