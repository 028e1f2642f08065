//! HTTP Server
//!
//! Serves the downstream WebSocket route and the health routes on one port
//! until the cancellation token fires.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use crate::infrastructure::health::{self, HealthState};
use crate::infrastructure::ws::{self, WsState};

/// HTTP server errors.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    /// Failed to bind the port.
    #[error("failed to bind to port {0}: {1}")]
    Bind(u16, String),

    /// The server failed while running.
    #[error("server error: {0}")]
    Serve(String),
}

/// Combined WebSocket and health router.
pub fn app(ws_state: WsState, health_state: Arc<HealthState>) -> Router {
    ws::router(ws_state).merge(health::router(health_state))
}

/// Gateway HTTP server.
pub struct GatewayServer {
    port: u16,
    app: Router,
    cancel: CancellationToken,
}

impl GatewayServer {
    /// Create a server for `app` on `port`.
    #[must_use]
    pub const fn new(port: u16, app: Router, cancel: CancellationToken) -> Self {
        Self { port, app, cancel }
    }

    /// Bind and serve until cancelled.
    ///
    /// # Errors
    ///
    /// Returns `ServerError` if binding fails or the server stops on a fatal
    /// error.
    pub async fn run(self) -> Result<(), ServerError> {
        let addr = SocketAddr::from(([0, 0, 0, 0], self.port));
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| ServerError::Bind(self.port, e.to_string()))?;
        self.serve(listener).await
    }

    /// Serve on an already-bound listener until cancelled.
    ///
    /// # Errors
    ///
    /// Returns `ServerError::Serve` if the server stops on a fatal error.
    pub async fn serve(self, listener: TcpListener) -> Result<(), ServerError> {
        let local = listener.local_addr().ok();
        tracing::info!(port = self.port, ?local, "Gateway server listening");

        axum::serve(listener, self.app)
            .with_graceful_shutdown(self.cancel.cancelled_owned())
            .await
            .map_err(|e| ServerError::Serve(e.to_string()))?;

        tracing::info!("Gateway server stopped");
        Ok(())
    }
}
