//! Heartbeat Tracking
//!
//! Transport-level keep-alive for the upstream socket. The stream loop sends
//! a WebSocket ping every `ping_interval`; any inbound traffic (a frame or a
//! pong) answers it. If nothing arrives within `ping_timeout` of the oldest
//! unanswered ping, the connection is treated as dead. The stream loop waits
//! on [`HeartbeatState::deadline`] directly, so detection does not wait for
//! the next ping tick.
//!
//! This is separate from the application-level `PING` frames the upstream
//! sends, which are simply echoed.

use std::time::Duration;

use tokio::time::Instant;

use crate::infrastructure::config::StreamSettings;

/// Configuration for heartbeat behavior.
#[derive(Debug, Clone)]
pub struct HeartbeatConfig {
    /// Interval between pings.
    pub ping_interval: Duration,
    /// Silence after a ping before the connection is considered dead.
    pub ping_timeout: Duration,
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            ping_interval: Duration::from_secs(20),
            ping_timeout: Duration::from_secs(30),
        }
    }
}

impl HeartbeatConfig {
    /// Create configuration from [`StreamSettings`].
    #[must_use]
    pub const fn from_stream_settings(settings: &StreamSettings) -> Self {
        Self {
            ping_interval: settings.ping_interval,
            ping_timeout: settings.ping_timeout,
        }
    }
}

/// What the stream loop should do on a heartbeat tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeartbeatAction {
    /// Send a ping.
    SendPing,
    /// No traffic since the oldest unanswered ping; give up on the socket.
    Timeout(Duration),
}

/// Per-connection heartbeat state, owned by the stream loop.
#[derive(Debug)]
pub struct HeartbeatState {
    config: HeartbeatConfig,
    unanswered_since: Option<Instant>,
}

impl HeartbeatState {
    /// Fresh state for a new connection.
    #[must_use]
    pub const fn new(config: HeartbeatConfig) -> Self {
        Self {
            config,
            unanswered_since: None,
        }
    }

    /// Record inbound traffic; answers any outstanding ping.
    pub const fn record_traffic(&mut self) {
        self.unanswered_since = None;
    }

    /// Whether a ping is awaiting traffic.
    #[must_use]
    pub const fn is_waiting(&self) -> bool {
        self.unanswered_since.is_some()
    }

    /// Decide the action for an interval tick.
    pub fn on_tick(&mut self) -> HeartbeatAction {
        match self.unanswered_since {
            Some(sent) if sent.elapsed() >= self.config.ping_timeout => {
                HeartbeatAction::Timeout(sent.elapsed())
            }
            Some(_) => HeartbeatAction::SendPing,
            None => {
                self.unanswered_since = Some(Instant::now());
                HeartbeatAction::SendPing
            }
        }
    }

    /// When the oldest unanswered ping times out, if one is outstanding.
    #[must_use]
    pub fn deadline(&self) -> Option<Instant> {
        self.unanswered_since.map(|sent| sent + self.config.ping_timeout)
    }

    /// Silence since the oldest unanswered ping.
    #[must_use]
    pub fn silence(&self) -> Duration {
        self.unanswered_since.map_or(Duration::ZERO, |sent| sent.elapsed())
    }

    /// Ping interval.
    #[must_use]
    pub const fn interval(&self) -> Duration {
        self.config.ping_interval
    }
}
