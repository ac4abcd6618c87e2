//! Domain Layer - Core relay types and business logic.
//!
//! This layer contains the core domain types for the quote relay with no
//! I/O. Everything here is plain Rust that the connector, dispatcher and
//! gateway share.

/// Feed updates and the upstream connection state machine.
pub mod feed;

/// Subscription key tracking per subscriber.
pub mod subscription;
