//! Infrastructure Layer - Adapters and external integrations.
//!
//! This layer contains the concrete implementations of the port interfaces
//! defined in the application layer.

/// Upstream WebSocket feed client.
pub mod upstream;

/// Fan-out dispatcher from the upstream queue to subscribers.
pub mod broadcast;

/// Downstream WebSocket gateway (the `ClientRegistry` adapter).
pub mod gateway;

/// K-line and quote REST clients.
pub mod rest;

/// Configuration loading.
pub mod config;

/// Health check HTTP endpoint.
pub mod health;

/// Prometheus metrics instrumentation.
pub mod metrics;

/// OpenTelemetry tracing integration.
pub mod telemetry;
