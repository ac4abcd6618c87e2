//! Subscriber Gateway
//!
//! WebSocket-backed [`ClientRegistry`](crate::application::ports::ClientRegistry)
//! for downstream subscribers.
//!
//! # Protocol
//!
//! - On connect the relay sends `{"type":"welcome","subscriber_id":N}`.
//! - `{"action":"subscribe","keys":["btcusdt"]}` → `{"type":"subscribed",...}`
//! - `{"action":"unsubscribe","keys":["btcusdt"]}` → `{"type":"unsubscribed",...}`
//! - `{"action":"ping"}` → `{"type":"pong"}`
//! - Anything else → `{"type":"error","message":"..."}`
//!
//! Feed payloads arrive as text frames holding the update body unchanged.

pub mod hub;
pub mod protocol;
pub mod server;

pub use hub::SubscriberHub;
pub use protocol::{ClientCommand, ServerFrame};
pub use server::{GatewayError, GatewayServer};
