//! Downstream Fan-out
//!
//! [`BroadcastHub`] holds the active downstream connections and delivers
//! ticks to all of them and chart snapshots to one of them.
//!
//! # Failure Isolation
//!
//! `broadcast` walks a point-in-time copy of the connection list, so a
//! connection that disconnects mid-walk cannot disturb the traversal. A
//! connection whose send fails is removed; delivery to the rest continues
//! and the caller never sees the error.

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;

use crate::application::ports::{ConnectionId, DownstreamPort, SubscriberConnection};
use crate::domain::streaming::OutboundMessage;
use crate::infrastructure::metrics;

/// Outcome of one broadcast.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BroadcastReport {
    /// Connections that accepted the message.
    pub delivered: usize,
    /// Connections removed after a failed send.
    pub dropped: usize,
}

/// Registry of active downstream connections.
#[derive(Default)]
pub struct BroadcastHub {
    connections: RwLock<Vec<Arc<dyn SubscriberConnection>>>,
}

/// Shared handle to the hub.
pub type SharedBroadcastHub = Arc<BroadcastHub>;

impl std::fmt::Debug for BroadcastHub {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BroadcastHub")
            .field("connections", &self.connection_count())
            .finish()
    }
}

impl BroadcastHub {
    /// Create an empty hub.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a connection. Re-registering the same id replaces the entry.
    pub fn register(&self, connection: Arc<dyn SubscriberConnection>) {
        let id = connection.id();
        let count = {
            let mut connections = self.connections.write();
            connections.retain(|c| c.id() != id);
            connections.push(connection);
            connections.len()
        };
        metrics::set_downstream_connections(count);
        tracing::info!(connection = %id, active = count, "Subscriber registered");
    }

    /// Remove a connection. Returns whether it was present.
    pub fn unregister(&self, id: ConnectionId) -> bool {
        let (removed, count) = {
            let mut connections = self.connections.write();
            let before = connections.len();
            connections.retain(|c| c.id() != id);
            (connections.len() != before, connections.len())
        };
        if removed {
            metrics::set_downstream_connections(count);
            tracing::info!(connection = %id, active = count, "Subscriber unregistered");
        }
        removed
    }

    /// Number of active connections.
    #[must_use]
    pub fn connection_count(&self) -> usize {
        self.connections.read().len()
    }

    /// Whether `id` is registered.
    #[must_use]
    pub fn contains(&self, id: ConnectionId) -> bool {
        self.connections.read().iter().any(|c| c.id() == id)
    }

    /// Deliver `message` to every connection.
    pub async fn broadcast(&self, message: &OutboundMessage) -> BroadcastReport {
        let snapshot: Vec<Arc<dyn SubscriberConnection>> = self.connections.read().clone();
        let mut report = BroadcastReport::default();
        let mut failed = Vec::new();

        for connection in &snapshot {
            match connection.send(message).await {
                Ok(()) => report.delivered += 1,
                Err(e) => {
                    tracing::warn!(
                        connection = %connection.id(),
                        kind = message.kind(),
                        error = %e,
                        "Dropping subscriber after failed send"
                    );
                    failed.push(connection.id());
                }
            }
        }

        for id in failed {
            if self.unregister(id) {
                report.dropped += 1;
            }
        }
        if report.dropped > 0 {
            metrics::record_subscribers_dropped(report.dropped as u64);
        }
        report
    }

    /// Deliver `message` to connection `id` only.
    ///
    /// Returns `false` when `id` is unknown or the send failed; a failed
    /// connection is removed.
    pub async fn send_to(&self, id: ConnectionId, message: &OutboundMessage) -> bool {
        let target = self
            .connections
            .read()
            .iter()
            .find(|c| c.id() == id)
            .cloned();

        let Some(connection) = target else {
            tracing::debug!(connection = %id, kind = message.kind(), "Target connection gone");
            return false;
        };

        match connection.send(message).await {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(connection = %id, error = %e, "Dropping subscriber after failed send");
                if self.unregister(id) {
                    metrics::record_subscribers_dropped(1);
                }
                false
            }
        }
    }
}

#[async_trait]
impl DownstreamPort for BroadcastHub {
    async fn send_to(&self, id: ConnectionId, message: OutboundMessage) -> bool {
        Self::send_to(self, id, &message).await
    }
}
