//! Prometheus Metrics Module
//!
//! Exposes gateway metrics in Prometheus format.
//!
//! # Metrics Categories
//!
//! - **Upstream stream**: frames received, login rejections, reconnects
//! - **Ticks**: broadcast and discarded counts
//! - **Charts**: requests by outcome, retries, latency
//! - **Registration**: messages sent and symbols carried
//! - **Downstream**: active connections and dropped subscribers
//!
//! Metrics are rendered at `/metrics` on the gateway port.

use std::sync::OnceLock;
use std::time::Duration;

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

// =============================================================================
// Global Metrics Handle
// =============================================================================

static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Metrics initialization error.
#[derive(Debug, thiserror::Error)]
pub enum MetricsError {
    /// The global recorder could not be installed.
    #[error("failed to install Prometheus recorder: {0}")]
    Install(String),
}

/// Install the Prometheus recorder and describe all metrics.
///
/// Subsequent calls return the existing handle.
///
/// # Errors
///
/// Returns an error if another global recorder is already installed.
pub fn init_metrics() -> Result<PrometheusHandle, MetricsError> {
    if let Some(handle) = PROMETHEUS_HANDLE.get() {
        return Ok(handle.clone());
    }

    let handle = PrometheusBuilder::new()
        .install_recorder()
        .map_err(|e| MetricsError::Install(e.to_string()))?;
    register_metrics();

    Ok(PROMETHEUS_HANDLE.get_or_init(|| handle).clone())
}

/// Get the Prometheus handle for rendering metrics.
///
/// Returns `None` if metrics have not been initialized.
#[must_use]
pub fn get_metrics_handle() -> Option<PrometheusHandle> {
    PROMETHEUS_HANDLE.get().cloned()
}

// =============================================================================
// Metric Registration
// =============================================================================

fn register_metrics() {
    describe_counter!(
        "kiwoom_gateway_frames_received_total",
        "Frames received from the upstream stream by kind"
    );
    describe_counter!(
        "kiwoom_gateway_ticks_broadcast_total",
        "Normalized ticks broadcast to downstream subscribers"
    );
    describe_counter!(
        "kiwoom_gateway_ticks_discarded_total",
        "Decoded tick records discarded for a non-positive price"
    );
    describe_counter!(
        "kiwoom_gateway_login_rejections_total",
        "Upstream login acknowledgments with a failure code"
    );
    describe_counter!(
        "kiwoom_gateway_reconnects_total",
        "Upstream reconnect attempts"
    );
    describe_gauge!(
        "kiwoom_gateway_stream_active",
        "1 while the upstream stream is logged in"
    );

    describe_counter!(
        "kiwoom_gateway_auth_requests_total",
        "Credential requests by outcome"
    );
    describe_counter!(
        "kiwoom_gateway_chart_requests_total",
        "Chart lookups by final outcome"
    );
    describe_counter!(
        "kiwoom_gateway_chart_retries_total",
        "Chart request retries by cause"
    );
    describe_histogram!(
        "kiwoom_gateway_chart_duration_seconds",
        "Chart lookup latency including admission and retries"
    );

    describe_counter!(
        "kiwoom_gateway_registrations_sent_total",
        "Registration messages handed to the upstream socket"
    );
    describe_counter!(
        "kiwoom_gateway_registration_symbols_total",
        "Symbols carried by registration messages"
    );

    describe_gauge!(
        "kiwoom_gateway_downstream_connections",
        "Active downstream subscriber connections"
    );
    describe_counter!(
        "kiwoom_gateway_subscribers_dropped_total",
        "Downstream connections removed after a failed send"
    );
}

// =============================================================================
// Labels
// =============================================================================

/// Upstream frame kinds.
#[derive(Debug, Clone, Copy)]
pub enum FrameKind {
    /// Login acknowledgment.
    Login,
    /// Keep-alive.
    Ping,
    /// Registration acknowledgment.
    Registration,
    /// Market data.
    Data,
    /// Undecodable frame.
    Malformed,
}

impl FrameKind {
    const fn as_str(self) -> &'static str {
        match self {
            Self::Login => "login",
            Self::Ping => "ping",
            Self::Registration => "registration",
            Self::Data => "data",
            Self::Malformed => "malformed",
        }
    }
}

/// Final outcome of a chart lookup.
#[derive(Debug, Clone, Copy)]
pub enum ChartOutcome {
    /// Candles returned.
    Success,
    /// Retries exhausted or no credential; empty result.
    Failed,
}

impl ChartOutcome {
    const fn as_str(self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Failed => "failed",
        }
    }
}

/// Reason a chart attempt is retried.
#[derive(Debug, Clone, Copy)]
pub enum RetryCause {
    /// HTTP 429.
    RateLimited,
    /// Any other transport, status or parse failure.
    Failure,
}

impl RetryCause {
    const fn as_str(self) -> &'static str {
        match self {
            Self::RateLimited => "rate_limited",
            Self::Failure => "failure",
        }
    }
}

// =============================================================================
// Metric Recording Functions
// =============================================================================

/// Record a frame received from the upstream stream.
pub fn record_frame_received(kind: FrameKind) {
    counter!("kiwoom_gateway_frames_received_total", "kind" => kind.as_str()).increment(1);
}

/// Record ticks broadcast downstream.
pub fn record_ticks_broadcast(count: u64) {
    counter!("kiwoom_gateway_ticks_broadcast_total").increment(count);
}

/// Record ticks discarded during normalization.
pub fn record_ticks_discarded(count: u64) {
    counter!("kiwoom_gateway_ticks_discarded_total").increment(count);
}

/// Record an upstream login rejection.
pub fn record_login_rejection() {
    counter!("kiwoom_gateway_login_rejections_total").increment(1);
}

/// Record an upstream reconnect attempt.
pub fn record_reconnect() {
    counter!("kiwoom_gateway_reconnects_total").increment(1);
}

/// Set whether the upstream stream is logged in.
pub fn set_stream_active(active: bool) {
    gauge!("kiwoom_gateway_stream_active").set(if active { 1.0 } else { 0.0 });
}

/// Record a credential request.
pub fn record_auth_request(success: bool) {
    counter!(
        "kiwoom_gateway_auth_requests_total",
        "outcome" => if success { "success" } else { "failure" }
    )
    .increment(1);
}

/// Record the final outcome and latency of a chart lookup.
pub fn record_chart_request(outcome: ChartOutcome, duration: Duration) {
    counter!("kiwoom_gateway_chart_requests_total", "outcome" => outcome.as_str()).increment(1);
    histogram!("kiwoom_gateway_chart_duration_seconds").record(duration.as_secs_f64());
}

/// Record a chart retry.
pub fn record_chart_retry(cause: RetryCause) {
    counter!("kiwoom_gateway_chart_retries_total", "cause" => cause.as_str()).increment(1);
}

/// Record a registration message sent upstream.
pub fn record_registration_sent(symbols: usize) {
    counter!("kiwoom_gateway_registrations_sent_total").increment(1);
    counter!("kiwoom_gateway_registration_symbols_total").increment(symbols as u64);
}

/// Update the downstream connection count.
#[allow(clippy::cast_precision_loss)]
pub fn set_downstream_connections(count: usize) {
    gauge!("kiwoom_gateway_downstream_connections").set(count as f64);
}

/// Record downstream connections dropped after failed sends.
pub fn record_subscribers_dropped(count: u64) {
    counter!("kiwoom_gateway_subscribers_dropped_total").increment(count);
}

// =============================================================================
// Tests
// =============================================================================
