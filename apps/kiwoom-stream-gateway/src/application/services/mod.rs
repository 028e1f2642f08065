//! Application Services
//!
//! [`GatewayService`] routes downstream client requests:
//!
//! - `subscribe`: chart snapshot to the requester, then upstream registration
//! - `requestChart`: chart snapshot only (timeframe switch on the client)
//! - `unsubscribe`: logged, never enacted upstream
//!
//! Chart lookups run on their own task so a burst of subscribes is accepted
//! immediately instead of queueing behind slow REST calls.

use std::sync::Arc;

use tokio::task::JoinHandle;

use crate::application::ports::{ChartSource, ConnectionId, DownstreamPort, RegistrationPort};
use crate::domain::streaming::{ClientRequest, OutboundMessage, Symbol, Timeframe};

/// Downstream request router.
#[derive(Clone)]
pub struct GatewayService {
    charts: Arc<dyn ChartSource>,
    registrations: Arc<dyn RegistrationPort>,
    downstream: Arc<dyn DownstreamPort>,
}

impl GatewayService {
    /// Create a new service over its ports.
    #[must_use]
    pub fn new(
        charts: Arc<dyn ChartSource>,
        registrations: Arc<dyn RegistrationPort>,
        downstream: Arc<dyn DownstreamPort>,
    ) -> Self {
        Self {
            charts,
            registrations,
            downstream,
        }
    }

    /// Parse and handle one raw text frame from a downstream client.
    ///
    /// Malformed frames are logged and dropped.
    pub fn handle_text(&self, connection: ConnectionId, text: &str) -> Option<JoinHandle<()>> {
        match serde_json::from_str::<ClientRequest>(text) {
            Ok(request) => self.handle(connection, request),
            Err(e) => {
                tracing::warn!(%connection, error = %e, "Dropping malformed client message");
                None
            }
        }
    }

    /// Handle one client request.
    ///
    /// Returns the handle of the spawned chart task, if any.
    pub fn handle(&self, connection: ConnectionId, request: ClientRequest) -> Option<JoinHandle<()>> {
        match request {
            ClientRequest::Subscribe { symbol, timeframe } => {
                let symbol = Symbol::new(symbol);
                if symbol.is_empty() {
                    tracing::warn!(%connection, "Subscribe without symbol ignored");
                    return None;
                }
                tracing::info!(%connection, %symbol, %timeframe, "Subscribe requested");
                let task = self.spawn_chart(connection, symbol.clone(), Timeframe::parse(&timeframe));
                self.registrations.request(&symbol);
                Some(task)
            }
            ClientRequest::RequestChart { symbol, timeframe } => {
                let symbol = Symbol::new(symbol);
                if symbol.is_empty() {
                    tracing::warn!(%connection, "Chart request without symbol ignored");
                    return None;
                }
                tracing::debug!(%connection, %symbol, %timeframe, "Chart requested");
                Some(self.spawn_chart(connection, symbol, Timeframe::parse(&timeframe)))
            }
            ClientRequest::Unsubscribe { symbol } => {
                // Registrations are shared by every subscriber and persist.
                tracing::info!(%connection, %symbol, "Unsubscribe received (no upstream change)");
                None
            }
        }
    }

    fn spawn_chart(
        &self,
        connection: ConnectionId,
        symbol: Symbol,
        timeframe: Timeframe,
    ) -> JoinHandle<()> {
        let charts = Arc::clone(&self.charts);
        let downstream = Arc::clone(&self.downstream);

        tokio::spawn(async move {
            let candles = charts.fetch(&symbol, timeframe).await;
            let count = candles.len();
            let delivered = downstream
                .send_to(connection, OutboundMessage::chart(&symbol, candles))
                .await;
            tracing::debug!(%connection, %symbol, %timeframe, count, delivered, "Chart dispatched");
        })
    }
}
