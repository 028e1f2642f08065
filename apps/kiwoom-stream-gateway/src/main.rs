//! Kiwoom Stream Gateway Binary
//!
//! # Usage
//!
//! ```bash
//! cargo run --bin kiwoom-stream-gateway
//! ```
//!
//! # Environment Variables
//!
//! ## Required
//! - `KIWOOM_API_KEY`: application key
//! - `KIWOOM_SECRET_KEY`: application secret
//!
//! ## Optional
//! - `KIWOOM_API_URL`: REST base URL (default: <https://api.kiwoom.com>)
//! - `KIWOOM_WS_URL`: streaming URL
//! - `GATEWAY_PORT`: downstream HTTP/WebSocket port (default: 8000)
//! - `GATEWAY_*`: stream, chart and registration tuning
//! - `OTEL_ENABLED`: export spans over OTLP (default: false)
//! - `RUST_LOG`: log filter (default: info)

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use kiwoom_stream_gateway::infrastructure::health::{FeedState, HealthState};
use kiwoom_stream_gateway::infrastructure::kiwoom::{
    ChartGateway, SessionManager, StreamClient, StreamClientConfig, StreamEvent,
    SubscriptionRegistry,
};
use kiwoom_stream_gateway::infrastructure::ws::WsState;
use kiwoom_stream_gateway::infrastructure::{multiplexer, server, telemetry};
use kiwoom_stream_gateway::{BroadcastHub, GatewayConfig, GatewayServer, GatewayService, init_metrics};
use tokio::signal;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Capacity of the stream event channel.
const EVENT_CHANNEL_CAPACITY: usize = 4096;

/// Graceful shutdown timeout.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    #[allow(clippy::expect_used)]
    rustls::crypto::ring::default_provider()
        .install_default()
        .expect("Failed to install rustls crypto provider");

    load_dotenv();

    let _telemetry_guard = telemetry::init();

    tracing::info!("Starting Kiwoom Stream Gateway");

    if let Err(e) = init_metrics() {
        tracing::warn!(error = %e, "Prometheus recorder unavailable; /metrics disabled");
    }

    let config = GatewayConfig::from_env().context("invalid gateway configuration")?;
    log_config(&config);

    let shutdown_token = CancellationToken::new();

    let http = reqwest::Client::builder()
        .timeout(config.chart.http_timeout)
        .build()
        .context("failed to build HTTP client")?;

    let session = Arc::new(SessionManager::new(
        http.clone(),
        &config.endpoints.api_url,
        config.credentials.clone(),
    ));
    let charts = Arc::new(ChartGateway::new(
        http,
        &config.endpoints.api_url,
        Arc::clone(&session),
        &config.chart,
    ));
    let registry = SubscriptionRegistry::new(config.registration.clone());
    let hub = Arc::new(BroadcastHub::new());
    let feed = Arc::new(FeedState::new());

    let service = GatewayService::new(charts, Arc::new(registry.clone()), hub.clone());

    // Upstream stream
    let (event_tx, event_rx) = mpsc::channel::<StreamEvent>(EVENT_CHANNEL_CAPACITY);
    let stream_client = Arc::new(StreamClient::new(
        StreamClientConfig::from_config(&config),
        Arc::clone(&session),
        registry.clone(),
        event_tx,
        shutdown_token.clone(),
    ));
    let stream_handle = tokio::spawn(stream_client.run());

    // Ticks to subscribers
    let multiplexer_handle = tokio::spawn(multiplexer::run(
        event_rx,
        Arc::clone(&hub),
        Arc::clone(&feed),
        shutdown_token.clone(),
    ));

    // HTTP: downstream WebSocket + health
    let health_state = Arc::new(HealthState::new(
        env!("CARGO_PKG_VERSION").to_string(),
        Arc::clone(&feed),
        Arc::clone(&hub),
        registry,
    ));
    let ws_state = WsState::new(hub, service, config.server.subscriber_buffer);
    let http_server = GatewayServer::new(
        config.server.port,
        server::app(ws_state, health_state),
        shutdown_token.clone(),
    );
    let server_handle = tokio::spawn(async move {
        if let Err(e) = http_server.run().await {
            tracing::error!(error = %e, "Gateway server error");
        }
    });

    tracing::info!(port = config.server.port, "Gateway ready");

    await_shutdown(shutdown_token).await;

    let drained = tokio::time::timeout(SHUTDOWN_TIMEOUT, async {
        let _ = tokio::join!(stream_handle, multiplexer_handle, server_handle);
    })
    .await;
    if drained.is_err() {
        tracing::warn!(
            timeout_secs = SHUTDOWN_TIMEOUT.as_secs(),
            "Shutdown timed out with tasks still running"
        );
    }

    tracing::info!("Gateway stopped");
    Ok(())
}

/// Load `.env` from the current directory or the nearest ancestor.
fn load_dotenv() {
    if dotenvy::dotenv().is_ok() {
        return;
    }

    if let Ok(cwd) = std::env::current_dir() {
        for dir in cwd.ancestors().skip(1) {
            let env_path = dir.join(".env");
            if env_path.exists() {
                let _ = dotenvy::from_path(&env_path);
                return;
            }
        }
    }
}

/// Log the parsed configuration.
fn log_config(config: &GatewayConfig) {
    tracing::info!(
        port = config.server.port,
        chart_concurrency = config.chart.concurrency,
        refresh = ?config.registration.refresh,
        debounce_ms = config.registration.debounce.as_millis(),
        "Configuration loaded"
    );
    tracing::debug!(
        api_url = %config.endpoints.api_url,
        ws_url = %config.endpoints.ws_url,
        "Kiwoom endpoints"
    );
}

/// Wait for SIGINT or SIGTERM, then cancel `shutdown_token`.
async fn await_shutdown(shutdown_token: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Ctrl+C handler unavailable");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "SIGTERM handler unavailable");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating shutdown");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, initiating shutdown");
        }
    }

    shutdown_token.cancel();
}
