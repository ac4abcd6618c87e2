//! Upstream Feed Client
//!
//! WebSocket client for the quote/K-line feed origin.
//!
//! - `connector`: connection state machine and read loop
//! - `decoder`: inbound frame → [`FeedUpdate`](crate::domain::feed::FeedUpdate)
//! - `frames`: outbound subscribe and ping frames
//! - `heartbeat`: per-connection ping cadence and idle watchdog
//! - `reconnect`: delay schedule between attempts

pub mod connector;
pub mod decoder;
pub mod frames;
pub mod heartbeat;
pub mod reconnect;

pub use connector::{
    ConnectorError, ConnectorStats, StateChange, TransportError, UpstreamConfig,
    UpstreamConnector,
};
pub use decoder::{DecodeError, FeedDecoder};
