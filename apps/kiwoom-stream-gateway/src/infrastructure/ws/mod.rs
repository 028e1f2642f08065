//! Downstream WebSocket Endpoint
//!
//! `GET /ws/stocks` upgrades to a WebSocket. Each accepted socket becomes a
//! [`WsConnection`] registered with the [`BroadcastHub`]; text frames from
//! the client are handed to [`GatewayService`].
//!
//! Outbound frames go through a bounded per-connection queue drained by a
//! writer task. A full queue counts as a failed send, so a stalled client
//! is dropped instead of holding up the broadcast.

use std::sync::Arc;

use async_trait::async_trait;
use axum::Router;
use axum::extract::State;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::response::Response;
use axum::routing::get;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

use crate::application::ports::{ConnectionId, DeliveryError, SubscriberConnection};
use crate::application::services::GatewayService;
use crate::domain::streaming::OutboundMessage;
use crate::infrastructure::broadcast::SharedBroadcastHub;

/// Route of the downstream socket.
pub const WS_PATH: &str = "/ws/stocks";

/// One accepted downstream socket, as seen by the hub.
#[derive(Debug)]
pub struct WsConnection {
    id: ConnectionId,
    outbound: mpsc::Sender<String>,
}

impl WsConnection {
    /// Wrap the sender side of a connection's outbound queue.
    #[must_use]
    pub fn new(outbound: mpsc::Sender<String>) -> Self {
        Self {
            id: ConnectionId::new(),
            outbound,
        }
    }
}

#[async_trait]
impl SubscriberConnection for WsConnection {
    fn id(&self) -> ConnectionId {
        self.id
    }

    async fn send(&self, message: &OutboundMessage) -> Result<(), DeliveryError> {
        let json =
            serde_json::to_string(message).map_err(|e| DeliveryError::Encode(e.to_string()))?;
        self.outbound.try_send(json).map_err(|e| match e {
            TrySendError::Full(_) => DeliveryError::Backpressure(self.id),
            TrySendError::Closed(_) => DeliveryError::Closed(self.id),
        })
    }
}

/// Shared state of the WebSocket route.
#[derive(Clone)]
pub struct WsState {
    hub: SharedBroadcastHub,
    service: GatewayService,
    buffer: usize,
}

impl WsState {
    /// Create the route state. `buffer` is the per-connection queue size.
    #[must_use]
    pub fn new(hub: SharedBroadcastHub, service: GatewayService, buffer: usize) -> Self {
        Self {
            hub,
            service,
            buffer: buffer.max(1),
        }
    }
}

/// Router serving [`WS_PATH`].
pub fn router(state: WsState) -> Router {
    Router::new()
        .route(WS_PATH, get(ws_handler))
        .with_state(state)
}

async fn ws_handler(ws: WebSocketUpgrade, State(state): State<WsState>) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: WsState) {
    let (mut sender, mut receiver) = socket.split();
    let (tx, mut rx) = mpsc::channel::<String>(state.buffer);

    let connection = Arc::new(WsConnection::new(tx));
    let id = connection.id();
    state.hub.register(connection);

    let send_task = tokio::spawn(async move {
        while let Some(frame) = rx.recv().await {
            if sender.send(Message::Text(frame.into())).await.is_err() {
                break;
            }
        }
    });

    while let Some(msg) = receiver.next().await {
        match msg {
            Ok(Message::Text(text)) => {
                state.service.handle_text(id, text.as_str());
            }
            Ok(Message::Close(_)) => break,
            Ok(_) => {}
            Err(e) => {
                tracing::debug!(connection = %id, error = %e, "Subscriber socket error");
                break;
            }
        }
    }

    state.hub.unregister(id);
    send_task.abort();
    tracing::info!(connection = %id, "Subscriber disconnected");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::streaming::Symbol;

    fn chart() -> OutboundMessage {
        OutboundMessage::chart(&Symbol::new("005930"), Vec::new())
    }

    #[tokio::test]
    async fn send_serializes_into_queue() {
        let (tx, mut rx) = mpsc::channel(4);
        let connection = WsConnection::new(tx);

        connection.send(&chart()).await.unwrap();

        let frame: serde_json::Value = serde_json::from_str(&rx.recv().await.unwrap()).unwrap();
        assert_eq!(frame["type"], "chart");
        assert_eq!(frame["symbol"], "005930");
    }

    #[tokio::test]
    async fn full_queue_is_backpressure() {
        let (tx, _rx) = mpsc::channel(1);
        let connection = WsConnection::new(tx);

        connection.send(&chart()).await.unwrap();
        let err = connection.send(&chart()).await.unwrap_err();
        assert!(matches!(err, DeliveryError::Backpressure(id) if id == connection.id()));
    }

    #[tokio::test]
    async fn closed_queue_is_closed() {
        let (tx, rx) = mpsc::channel(1);
        drop(rx);
        let connection = WsConnection::new(tx);

        let err = connection.send(&chart()).await.unwrap_err();
        assert!(matches!(err, DeliveryError::Closed(_)));
    }
}
