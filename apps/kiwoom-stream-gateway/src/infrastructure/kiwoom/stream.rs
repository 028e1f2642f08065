//! Upstream Stream Client
//!
//! Owns the single streaming socket to Kiwoom and drives it through
//! `Disconnected -> Connecting -> AwaitingLogin -> Active`.
//!
//! # Protocol
//!
//! 1. Open the socket and send `{"trnm":"LOGIN","token":"..."}`
//! 2. Wait for the `LOGIN` ack; `return_code == 0` is success
//! 3. Once active: echo `PING` frames verbatim, log `REG` acks, and decode
//!    everything else as market data
//!
//! A rejected login invalidates the shared access token, so the next
//! session attempt requests a fresh one. Any way a session ends leads back
//! to a wait and a new attempt; the loop only stops on cancellation.

use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use parking_lot::RwLock;
use tokio::sync::mpsc;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;

use super::auth::{AccessToken, SessionManager};
use super::codec::{TickNormalizer, UpstreamFrame, decode_frame, login_frame};
use super::heartbeat::{HeartbeatAction, HeartbeatConfig, HeartbeatState};
use super::reconnect::{ReconnectConfig, ReconnectPolicy};
use super::registry::{FrameSender, RegistrationFrame, SubscriptionRegistry};
use crate::domain::streaming::Tick;
use crate::infrastructure::config::GatewayConfig;
use crate::infrastructure::metrics::{self, FrameKind};

// =============================================================================
// Error Type
// =============================================================================

/// Ways a single upstream session ends.
#[derive(Debug, thiserror::Error)]
pub enum StreamClientError {
    /// WebSocket transport error.
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    /// The server closed the connection or the stream ended.
    #[error("connection closed")]
    ConnectionClosed,

    /// No inbound traffic after a ping.
    #[error("no traffic for {0:?} after ping")]
    HeartbeatTimeout(Duration),

    /// The login ack carried a failure code.
    #[error("login rejected with code {code}: {message}")]
    LoginRejected {
        /// `return_code`.
        code: i64,
        /// `return_msg`.
        message: String,
    },
}

// =============================================================================
// Events and State
// =============================================================================

/// Events emitted by the stream client.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    /// Logged in; the session is active.
    Connected,
    /// The session ended.
    Disconnected,
    /// Waiting before the next session attempt.
    Reconnecting {
        /// Reconnect attempt number.
        attempt: u64,
        /// Wait before the attempt.
        delay: Duration,
    },
    /// The upstream refused the login.
    LoginRejected {
        /// `return_code`.
        code: i64,
        /// `return_msg`.
        message: String,
    },
    /// Registration acknowledgment.
    Registered {
        /// `return_code`.
        code: i64,
        /// `return_msg`.
        message: String,
    },
    /// Normalized tick.
    Tick(Tick),
}

/// Connection state of the upstream session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    /// No socket.
    #[default]
    Disconnected,
    /// Opening the socket.
    Connecting,
    /// Login sent, ack not yet received.
    AwaitingLogin,
    /// Logged in.
    Active,
}

impl ConnectionState {
    /// Label for logs and health output.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::AwaitingLogin => "awaiting_login",
            Self::Active => "active",
        }
    }
}

// =============================================================================
// Configuration
// =============================================================================

/// Configuration for the stream client.
#[derive(Debug, Clone)]
pub struct StreamClientConfig {
    /// WebSocket URL.
    pub url: String,
    /// Reconnect delays.
    pub reconnect: ReconnectConfig,
    /// Keep-alive.
    pub heartbeat: HeartbeatConfig,
    /// Wait after a failed token acquisition.
    pub token_retry: Duration,
}

impl StreamClientConfig {
    /// Create configuration for `url` with default timings.
    #[must_use]
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            reconnect: ReconnectConfig::default(),
            heartbeat: HeartbeatConfig::default(),
            token_retry: Duration::from_secs(10),
        }
    }

    /// Create configuration from the gateway configuration.
    #[must_use]
    pub fn from_config(config: &GatewayConfig) -> Self {
        Self {
            url: config.endpoints.ws_url.clone(),
            reconnect: ReconnectConfig::from_stream_settings(&config.stream),
            heartbeat: HeartbeatConfig::from_stream_settings(&config.stream),
            token_retry: config.stream.token_retry,
        }
    }
}

// =============================================================================
// Stream Client
// =============================================================================

/// Upstream streaming session driver.
pub struct StreamClient {
    config: StreamClientConfig,
    session: Arc<SessionManager>,
    registry: SubscriptionRegistry,
    normalizer: TickNormalizer,
    event_tx: mpsc::Sender<StreamEvent>,
    cancel: CancellationToken,
    state: RwLock<ConnectionState>,
}

impl StreamClient {
    /// Create a new stream client.
    #[must_use]
    pub fn new(
        config: StreamClientConfig,
        session: Arc<SessionManager>,
        registry: SubscriptionRegistry,
        event_tx: mpsc::Sender<StreamEvent>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            config,
            session,
            registry,
            normalizer: TickNormalizer::new(),
            event_tx,
            cancel,
            state: RwLock::new(ConnectionState::Disconnected),
        }
    }

    /// Current connection state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        *self.state.read()
    }

    fn set_state(&self, state: ConnectionState) {
        *self.state.write() = state;
        metrics::set_stream_active(state == ConnectionState::Active);
    }

    async fn emit(&self, event: StreamEvent) {
        let _ = self.event_tx.send(event).await;
    }

    /// Run sessions until cancelled.
    pub async fn run(self: Arc<Self>) {
        let mut policy = ReconnectPolicy::new(self.config.reconnect.clone());

        loop {
            let Some(token) = self.ensure_token().await else {
                tracing::info!("Stream client cancelled while acquiring token");
                return;
            };

            let outcome = self.connect_and_run(&token, &mut policy).await;
            self.registry.detach();
            self.set_state(ConnectionState::Disconnected);

            match outcome {
                Ok(()) => {
                    tracing::info!("Stream client cancelled");
                    return;
                }
                Err(e) => {
                    tracing::warn!(error = %e, "Upstream session ended");
                    self.emit(StreamEvent::Disconnected).await;
                }
            }

            let delay = policy.next_delay();
            let attempt = policy.attempt_count();
            metrics::record_reconnect();
            tracing::info!(
                attempt,
                delay_ms = delay.as_millis(),
                rejections = policy.consecutive_rejections(),
                "Reconnecting to upstream stream"
            );
            self.emit(StreamEvent::Reconnecting { attempt, delay }).await;

            tokio::select! {
                () = self.cancel.cancelled() => {
                    tracing::info!("Stream client cancelled during reconnect delay");
                    return;
                }
                () = tokio::time::sleep(delay) => {}
            }
        }
    }

    /// Hold a token before connecting, retrying acquisition until it
    /// succeeds. `None` means cancelled.
    async fn ensure_token(&self) -> Option<AccessToken> {
        loop {
            if self.cancel.is_cancelled() {
                return None;
            }
            match self.session.acquire(false).await {
                Ok(token) => return Some(token),
                Err(e) => {
                    tracing::warn!(
                        error = %e,
                        retry_ms = self.config.token_retry.as_millis(),
                        "Token unavailable; stream connect deferred"
                    );
                }
            }
            tokio::select! {
                () = self.cancel.cancelled() => return None,
                () = tokio::time::sleep(self.config.token_retry) => {}
            }
        }
    }

    /// One session: connect, log in, pump frames until it ends.
    ///
    /// `Ok(())` only on cancellation.
    async fn connect_and_run(
        &self,
        token: &AccessToken,
        policy: &mut ReconnectPolicy,
    ) -> Result<(), StreamClientError> {
        self.set_state(ConnectionState::Connecting);
        tracing::info!(url = %self.config.url, "Connecting to upstream stream");

        let (ws_stream, _response) = tokio::select! {
            () = self.cancel.cancelled() => return Ok(()),
            connected = tokio_tungstenite::connect_async(&self.config.url) => connected?,
        };
        let (mut write, mut read) = ws_stream.split();

        write.send(Message::Text(login_frame(token.as_str()).into())).await?;
        self.set_state(ConnectionState::AwaitingLogin);
        tracing::debug!("Login frame sent");

        // Registration frames reach the socket through this queue. Frames
        // still queued when the session ends are requeued by `detach`.
        let (frame_tx, mut frame_rx) = mpsc::unbounded_channel::<RegistrationFrame>();

        let mut heartbeat = HeartbeatState::new(self.config.heartbeat.clone());
        let period = heartbeat.interval();
        let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            let deadline = heartbeat.deadline();
            tokio::select! {
                () = self.cancel.cancelled() => {
                    let _ = write.send(Message::Close(None)).await;
                    return Ok(());
                }
                () = tokio::time::sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {
                    return Err(StreamClientError::HeartbeatTimeout(heartbeat.silence()));
                }
                _ = ticker.tick() => {
                    match heartbeat.on_tick() {
                        HeartbeatAction::SendPing => {
                            write.send(Message::Ping(Vec::new().into())).await?;
                        }
                        HeartbeatAction::Timeout(silence) => {
                            return Err(StreamClientError::HeartbeatTimeout(silence));
                        }
                    }
                }
                Some(frame) = frame_rx.recv() => {
                    match write.send(Message::Text(frame.text.into())).await {
                        Ok(()) => self.registry.confirm(&frame.codes),
                        Err(e) => {
                            self.registry.requeue(&frame.codes);
                            return Err(e.into());
                        }
                    }
                }
                msg = read.next() => {
                    let Some(msg) = msg else {
                        tracing::info!("Upstream stream ended");
                        return Err(StreamClientError::ConnectionClosed);
                    };
                    heartbeat.record_traffic();
                    match msg? {
                        Message::Text(text) => {
                            if let Some(reply) = self.handle_text(&text, policy, &frame_tx).await? {
                                write.send(Message::Text(reply.into())).await?;
                            }
                        }
                        Message::Ping(data) => write.send(Message::Pong(data)).await?,
                        Message::Close(frame) => {
                            tracing::info!(?frame, "Upstream sent close frame");
                            return Err(StreamClientError::ConnectionClosed);
                        }
                        _ => {}
                    }
                }
            }
        }
    }

    /// Handle one text frame. Returns a frame to write back, if any.
    async fn handle_text(
        &self,
        text: &str,
        policy: &mut ReconnectPolicy,
        frame_tx: &FrameSender,
    ) -> Result<Option<String>, StreamClientError> {
        let frame = match decode_frame(text) {
            Ok(frame) => frame,
            Err(e) => {
                metrics::record_frame_received(FrameKind::Malformed);
                tracing::warn!(error = %e, "Skipping malformed upstream frame");
                return Ok(None);
            }
        };

        match frame {
            UpstreamFrame::Login { code, message } => {
                metrics::record_frame_received(FrameKind::Login);
                if code == 0 {
                    self.set_state(ConnectionState::Active);
                    policy.reset();
                    let registered = self.registry.attach(frame_tx.clone());
                    tracing::info!(registered, "Upstream login accepted");
                    self.emit(StreamEvent::Connected).await;
                } else {
                    tracing::error!(code, message = %message, "Upstream login rejected");
                    self.session.invalidate();
                    policy.record_login_rejection();
                    metrics::record_login_rejection();
                    self.emit(StreamEvent::LoginRejected {
                        code,
                        message: message.clone(),
                    })
                    .await;
                    return Err(StreamClientError::LoginRejected { code, message });
                }
            }
            UpstreamFrame::Ping(raw) => {
                metrics::record_frame_received(FrameKind::Ping);
                tracing::trace!("Echoing upstream PING");
                return Ok(Some(raw));
            }
            UpstreamFrame::Registration { code, message } => {
                metrics::record_frame_received(FrameKind::Registration);
                if code == 0 {
                    tracing::info!(code, message = %message, "Registration acknowledged");
                } else {
                    tracing::warn!(code, message = %message, "Registration refused");
                }
                self.emit(StreamEvent::Registered { code, message }).await;
            }
            UpstreamFrame::Data(value) => {
                metrics::record_frame_received(FrameKind::Data);
                if self.state() != ConnectionState::Active {
                    tracing::debug!("Ignoring data frame before login ack");
                    return Ok(None);
                }
                let normalized = self.normalizer.decode(&value);
                if normalized.discarded > 0 {
                    metrics::record_ticks_discarded(normalized.discarded as u64);
                }
                for tick in normalized.ticks {
                    self.emit(StreamEvent::Tick(tick)).await;
                }
            }
        }
        Ok(None)
    }
}

impl std::fmt::Debug for StreamClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamClient")
            .field("url", &self.config.url)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::config::KiwoomCredentials;

    #[test]
    fn config_from_gateway_config() {
        let gateway = GatewayConfig::with_credentials(KiwoomCredentials::new(
            "app".to_string(),
            "secret".to_string(),
        ));
        let config = StreamClientConfig::from_config(&gateway);
        assert_eq!(config.url, gateway.endpoints.ws_url);
        assert_eq!(config.token_retry, Duration::from_secs(10));
        assert_eq!(config.heartbeat.ping_interval, Duration::from_secs(20));
        assert_eq!(config.reconnect.max_delay, Duration::from_secs(60));
    }

    #[test]
    fn state_labels() {
        assert_eq!(ConnectionState::default().as_str(), "disconnected");
        assert_eq!(ConnectionState::AwaitingLogin.as_str(), "awaiting_login");
        assert_eq!(ConnectionState::Active.as_str(), "active");
    }

    #[test]
    fn login_rejection_error_carries_code() {
        let err = StreamClientError::LoginRejected {
            code: 8005,
            message: "token expired".to_string(),
        };
        assert!(err.to_string().contains("8005"));
    }
}
