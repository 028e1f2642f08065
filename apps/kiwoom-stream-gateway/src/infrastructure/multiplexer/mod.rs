//! Stream Event Multiplexer
//!
//! Long-lived task between the stream client and the hub: ticks become
//! `{type:"tick"}` broadcasts, lifecycle events update [`FeedState`].

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::domain::streaming::OutboundMessage;
use crate::infrastructure::broadcast::BroadcastHub;
use crate::infrastructure::health::FeedState;
use crate::infrastructure::kiwoom::{ConnectionState, StreamEvent};
use crate::infrastructure::metrics;

/// Consume stream events until the channel closes or `cancel` fires.
pub async fn run(
    mut rx: mpsc::Receiver<StreamEvent>,
    hub: Arc<BroadcastHub>,
    feed: Arc<FeedState>,
    cancel: CancellationToken,
) {
    loop {
        let event = tokio::select! {
            () = cancel.cancelled() => break,
            event = rx.recv() => event,
        };
        let Some(event) = event else {
            break;
        };
        handle_event(event, &hub, &feed).await;
    }
    tracing::info!("Stream event multiplexer stopped");
}

async fn handle_event(event: StreamEvent, hub: &BroadcastHub, feed: &FeedState) {
    match event {
        StreamEvent::Tick(tick) => {
            feed.increment_messages();
            let report = hub.broadcast(&OutboundMessage::Tick { data: tick }).await;
            metrics::record_ticks_broadcast(report.delivered as u64);
        }
        StreamEvent::Connected => {
            feed.set_state(ConnectionState::Active);
            tracing::info!("Upstream feed connected");
        }
        StreamEvent::Disconnected => {
            feed.set_state(ConnectionState::Disconnected);
            tracing::warn!("Upstream feed disconnected");
        }
        StreamEvent::Reconnecting { attempt, delay } => {
            feed.set_state(ConnectionState::Connecting);
            feed.increment_reconnect_attempts();
            tracing::info!(attempt, delay_ms = delay.as_millis(), "Upstream feed reconnecting");
        }
        StreamEvent::LoginRejected { code, message } => {
            feed.set_error(format!("login rejected ({code}): {message}"));
        }
        StreamEvent::Registered { code, message } => {
            if code != 0 {
                feed.set_error(format!("registration refused ({code}): {message}"));
            }
        }
    }
}
