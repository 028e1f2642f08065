//! Port Interfaces
//!
//! Contracts between the request-handling service and the adapters that
//! talk to the brokerage and to downstream clients.
//!
//! ## Driven Ports (Outbound)
//!
//! - [`ChartSource`]: historical candle lookups
//! - [`RegistrationPort`]: real-time symbol registration upstream
//! - [`DownstreamPort`]: point-to-point delivery to one subscriber
//!
//! ## Connection Port
//!
//! - [`SubscriberConnection`]: one accepted downstream connection

use std::fmt;

use async_trait::async_trait;
use uuid::Uuid;

use crate::domain::streaming::{Candle, OutboundMessage, Symbol, Timeframe};

// =============================================================================
// Connection Identity
// =============================================================================

/// Identifier assigned to each accepted downstream connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(Uuid);

impl ConnectionId {
    /// Allocate a fresh random identifier.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

// =============================================================================
// Errors
// =============================================================================

/// Failure to hand a message to a downstream connection.
#[derive(Debug, Clone, thiserror::Error)]
pub enum DeliveryError {
    /// The connection is closed.
    #[error("connection {0} closed")]
    Closed(ConnectionId),

    /// The connection's outbound buffer is full.
    #[error("connection {0} outbound buffer full")]
    Backpressure(ConnectionId),

    /// The message could not be serialized.
    #[error("failed to encode message: {0}")]
    Encode(String),
}

// =============================================================================
// Ports
// =============================================================================

/// One downstream subscriber connection.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SubscriberConnection: Send + Sync {
    /// Connection identifier.
    fn id(&self) -> ConnectionId;

    /// Deliver one message. Any error marks the connection as dead.
    async fn send(&self, message: &OutboundMessage) -> Result<(), DeliveryError>;
}

/// Historical chart lookups.
///
/// Implementations never fail: exhausted retries and malformed responses
/// both yield an empty list.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ChartSource: Send + Sync {
    /// Fetch candles for `symbol` at `timeframe`.
    async fn fetch(&self, symbol: &Symbol, timeframe: Timeframe) -> Vec<Candle>;
}

/// Real-time registration of symbols with the upstream stream.
#[cfg_attr(test, mockall::automock)]
pub trait RegistrationPort: Send + Sync {
    /// Record interest in `symbol`. Idempotent.
    fn request(&self, symbol: &Symbol);
}

/// Point-to-point delivery to a registered subscriber.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait DownstreamPort: Send + Sync {
    /// Send `message` to connection `id`.
    ///
    /// Returns `false` when the connection is unknown or the send failed;
    /// a failed connection is dropped from the active set.
    async fn send_to(&self, id: ConnectionId, message: OutboundMessage) -> bool;
}
