//! Infrastructure Layer - Adapters and external integrations.
//!
//! Concrete implementations of the ports defined in the application layer,
//! plus the process plumbing around them.

/// Kiwoom REST and streaming clients.
pub mod kiwoom;

/// Fan-out of ticks and chart snapshots to downstream connections.
pub mod broadcast;

/// Stream event multiplexer feeding the broadcast hub.
pub mod multiplexer;

/// Downstream WebSocket endpoint.
pub mod ws;

/// Configuration loaded from the environment.
pub mod config;

/// Health check and metrics HTTP routes.
pub mod health;

/// HTTP server hosting the WebSocket and health routes.
pub mod server;

/// Prometheus metrics instrumentation.
pub mod metrics;

/// Tracing subscriber and OpenTelemetry integration.
pub mod telemetry;
