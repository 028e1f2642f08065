#![cfg_attr(
    test,
    allow(
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::float_cmp,
        clippy::significant_drop_tightening,
        clippy::too_many_lines,
        clippy::needless_pass_by_value,
        clippy::items_after_statements
    )
)]

//! Kiwoom Stream Gateway - Market Data Fan-out
//!
//! Keeps one authenticated session against Kiwoom's streaming and REST
//! interfaces and multiplexes it to many local WebSocket subscribers.
//!
//! # Layers (inside → outside)
//!
//! - **Domain**: market data and registration types
//!   - `streaming`: symbols, ticks, candles, timeframes, downstream messages
//!   - `subscription`: pending / batched / registered wire codes
//!
//! - **Application**: ports and request handling
//!   - `ports`: chart source, registration, downstream delivery
//!   - `services`: `subscribe` / `requestChart` / `unsubscribe` routing
//!
//! - **Infrastructure**: adapters and process plumbing
//!   - `kiwoom`: access token, chart REST client, stream client, registry
//!   - `broadcast`: downstream fan-out hub
//!   - `ws`: downstream WebSocket endpoint
//!   - `health`, `metrics`, `telemetry`, `config`, `server`
//!
//! # Data Flow
//!
//! ```text
//!                       ┌──────────────┐  ticks   ┌──────────────┐
//! Kiwoom stream WS ────►│ StreamClient │─────────►│              │──► Client 1
//!                       └──────▲───────┘          │ BroadcastHub │──► Client 2
//!                              │ REG              │              │──► Client N
//!                       ┌──────┴───────┐          └──────▲───────┘
//!                       │   Registry   │◄── subscribe ───┤ chart (one client)
//!                       └──────────────┘          ┌──────┴───────┐
//! Kiwoom REST ─────────────────────────────────────►│ ChartGateway │
//!                                                 └──────────────┘
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]

// =============================================================================
// Module Declarations
// =============================================================================

/// Domain layer - Core types with no I/O.
pub mod domain;

/// Application layer - Ports and request handling.
pub mod application;

/// Infrastructure layer - Adapters and external integrations.
pub mod infrastructure;

// =============================================================================
// Re-exports
// =============================================================================

// Domain types
pub use domain::streaming::{Candle, ClientRequest, OutboundMessage, Symbol, Tick, Timeframe};
pub use domain::subscription::{RefreshMode, SubscriptionStats};

// Application
pub use application::ports::{ConnectionId, DeliveryError, SubscriberConnection};
pub use application::services::GatewayService;

// Infrastructure config
pub use infrastructure::config::{ConfigError, GatewayConfig, KiwoomCredentials};

// Kiwoom adapters
pub use infrastructure::kiwoom::{
    ChartGateway, SessionManager, StreamClient, StreamClientConfig, StreamEvent,
    SubscriptionRegistry,
};

// Fan-out
pub use infrastructure::broadcast::{BroadcastHub, BroadcastReport, SharedBroadcastHub};

// Health and server
pub use infrastructure::health::{FeedState, HealthState};
pub use infrastructure::server::{GatewayServer, ServerError};

// Metrics
pub use infrastructure::metrics::init_metrics;

// Telemetry
pub use infrastructure::telemetry::{TelemetryConfig, TelemetryGuard, init as init_telemetry};
