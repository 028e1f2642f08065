//! Health Check and Metrics Endpoint
//!
//! # Endpoints
//!
//! - `GET /health` - JSON status of the upstream feed and downstream fan-out
//! - `GET /healthz` - liveness (always OK)
//! - `GET /readyz` - readiness (OK once the upstream session is logged in)
//! - `GET /metrics` - Prometheus text format

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use axum::{Json, Router, extract::State, http::StatusCode, response::IntoResponse, routing::get};
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;

use crate::infrastructure::broadcast::SharedBroadcastHub;
use crate::infrastructure::kiwoom::{ConnectionState, SubscriptionRegistry};
use crate::infrastructure::metrics::get_metrics_handle;

// =============================================================================
// Feed State
// =============================================================================

/// Upstream feed status, updated from stream events.
#[derive(Debug)]
pub struct FeedState {
    state: RwLock<ConnectionState>,
    last_connected_at: RwLock<Option<DateTime<Utc>>>,
    last_error: RwLock<Option<String>>,
    reconnect_attempts: AtomicU64,
    messages_received: AtomicU64,
}

impl Default for FeedState {
    fn default() -> Self {
        Self::new()
    }
}

impl FeedState {
    /// Fresh, disconnected state.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            state: RwLock::new(ConnectionState::Disconnected),
            last_connected_at: RwLock::new(None),
            last_error: RwLock::new(None),
            reconnect_attempts: AtomicU64::new(0),
            messages_received: AtomicU64::new(0),
        }
    }

    /// Set the connection state. Logging in clears the error and the
    /// reconnect counter.
    pub fn set_state(&self, state: ConnectionState) {
        *self.state.write() = state;
        if state == ConnectionState::Active {
            *self.last_connected_at.write() = Some(Utc::now());
            *self.last_error.write() = None;
            self.reconnect_attempts.store(0, Ordering::Relaxed);
        }
    }

    /// Record the latest error.
    pub fn set_error(&self, message: impl Into<String>) {
        *self.last_error.write() = Some(message.into());
    }

    /// Record a reconnect attempt.
    pub fn increment_reconnect_attempts(&self) {
        self.reconnect_attempts.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a market-data message.
    pub fn increment_messages(&self) {
        self.messages_received.fetch_add(1, Ordering::Relaxed);
    }

    /// Current connection state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        *self.state.read()
    }

    /// Latest error, if any since the last login.
    #[must_use]
    pub fn last_error(&self) -> Option<String> {
        self.last_error.read().clone()
    }

    /// Last successful login.
    #[must_use]
    pub fn last_connected_at(&self) -> Option<DateTime<Utc>> {
        *self.last_connected_at.read()
    }

    /// Reconnect attempts since the last login.
    #[must_use]
    pub fn reconnect_attempts(&self) -> u64 {
        self.reconnect_attempts.load(Ordering::Relaxed)
    }

    /// Market-data messages received.
    #[must_use]
    pub fn messages_received(&self) -> u64 {
        self.messages_received.load(Ordering::Relaxed)
    }
}

// =============================================================================
// Health Response Types
// =============================================================================

/// Health check response.
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    /// Overall status.
    pub status: HealthStatus,
    /// Gateway version.
    pub version: String,
    /// Uptime in seconds.
    pub uptime_secs: u64,
    /// Current time.
    pub current_time: DateTime<Utc>,
    /// Upstream feed.
    pub stream: StreamStatus,
    /// Downstream connections.
    pub connections: usize,
    /// Real-time symbol registration.
    pub subscriptions: SubscriptionStatus,
}

/// Overall health status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    /// Logged in and streaming.
    Healthy,
    /// Connecting or awaiting login.
    Degraded,
    /// No upstream session.
    Unhealthy,
}

/// Upstream feed status.
#[derive(Debug, Clone, Serialize)]
pub struct StreamStatus {
    /// Connection state label.
    pub state: &'static str,
    /// Whether the session is logged in.
    pub connected: bool,
    /// Market-data messages received.
    pub messages_received: u64,
    /// Reconnect attempts since the last login.
    pub reconnect_attempts: u64,
    /// Last successful login.
    pub last_connected_at: Option<DateTime<Utc>>,
    /// Latest error since the last login.
    pub last_error: Option<String>,
}

/// Registration set sizes.
#[derive(Debug, Clone, Serialize)]
pub struct SubscriptionStatus {
    /// Symbols waiting for login.
    pub pending: usize,
    /// Symbols waiting for the debounce flush.
    pub batched: usize,
    /// Symbols queued for the socket but not yet written.
    pub in_flight: usize,
    /// Symbols registered upstream.
    pub registered: usize,
}

// =============================================================================
// Health State and Router
// =============================================================================

/// Shared state of the health routes.
#[derive(Debug)]
pub struct HealthState {
    version: String,
    started_at: Instant,
    feed: Arc<FeedState>,
    hub: SharedBroadcastHub,
    registry: SubscriptionRegistry,
}

impl HealthState {
    /// Create health state over the live components.
    #[must_use]
    pub fn new(
        version: String,
        feed: Arc<FeedState>,
        hub: SharedBroadcastHub,
        registry: SubscriptionRegistry,
    ) -> Self {
        Self {
            version,
            started_at: Instant::now(),
            feed,
            hub,
            registry,
        }
    }
}

/// Router serving the health and metrics routes.
pub fn router(state: Arc<HealthState>) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/healthz", get(liveness_handler))
        .route("/readyz", get(readiness_handler))
        .route("/metrics", get(metrics_handler))
        .with_state(state)
}

// =============================================================================
// HTTP Handlers
// =============================================================================

async fn health_handler(State(state): State<Arc<HealthState>>) -> impl IntoResponse {
    let response = build_health_response(&state);
    let status_code = match response.status {
        HealthStatus::Healthy | HealthStatus::Degraded => StatusCode::OK,
        HealthStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
    };
    (status_code, Json(response))
}

async fn liveness_handler() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}

async fn readiness_handler(State(state): State<Arc<HealthState>>) -> impl IntoResponse {
    if state.feed.state() == ConnectionState::Active {
        (StatusCode::OK, "READY")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "NOT READY")
    }
}

async fn metrics_handler() -> impl IntoResponse {
    get_metrics_handle().map_or_else(
        || {
            (
                StatusCode::SERVICE_UNAVAILABLE,
                [("content-type", "text/plain")],
                "Metrics not initialized".to_string(),
            )
        },
        |handle| {
            (
                StatusCode::OK,
                [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
                handle.render(),
            )
        },
    )
}

fn build_health_response(state: &HealthState) -> HealthResponse {
    let connection_state = state.feed.state();
    let stats = state.registry.stats();

    HealthResponse {
        status: determine_health_status(connection_state),
        version: state.version.clone(),
        uptime_secs: state.started_at.elapsed().as_secs(),
        current_time: Utc::now(),
        stream: StreamStatus {
            state: connection_state.as_str(),
            connected: connection_state == ConnectionState::Active,
            messages_received: state.feed.messages_received(),
            reconnect_attempts: state.feed.reconnect_attempts(),
            last_connected_at: state.feed.last_connected_at(),
            last_error: state.feed.last_error(),
        },
        connections: state.hub.connection_count(),
        subscriptions: SubscriptionStatus {
            pending: stats.pending,
            batched: stats.batched,
            in_flight: stats.in_flight,
            registered: stats.registered,
        },
    }
}

const fn determine_health_status(state: ConnectionState) -> HealthStatus {
    match state {
        ConnectionState::Active => HealthStatus::Healthy,
        ConnectionState::Connecting | ConnectionState::AwaitingLogin => HealthStatus::Degraded,
        ConnectionState::Disconnected => HealthStatus::Unhealthy,
    }
}

// =============================================================================
// Tests
// =============================================================================
