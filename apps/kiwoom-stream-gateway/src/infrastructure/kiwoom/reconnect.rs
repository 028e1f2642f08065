//! Reconnection Policy
//!
//! Wait between upstream stream sessions. The delay grows with consecutive
//! login rejections rather than with every disconnect:
//!
//! ```text
//! delay = min(base * (1 + rejections / 3), max)
//! ```
//!
//! Plain transport drops keep the base delay; a run of rejected logins
//! (expired or revoked credentials) spreads out retries so the auth
//! endpoint is not hammered. A successful login resets the counter.

use std::time::Duration;

use crate::infrastructure::config::StreamSettings;

/// Configuration for reconnection behavior.
#[derive(Debug, Clone)]
pub struct ReconnectConfig {
    /// Delay with no recent rejections.
    pub base_delay: Duration,
    /// Delay ceiling.
    pub max_delay: Duration,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_secs(5),
            max_delay: Duration::from_secs(60),
        }
    }
}

impl ReconnectConfig {
    /// Create configuration from [`StreamSettings`].
    #[must_use]
    pub const fn from_stream_settings(settings: &StreamSettings) -> Self {
        Self {
            base_delay: settings.reconnect_base,
            max_delay: settings.reconnect_max,
        }
    }
}

/// Rejection-scaled reconnect delay.
///
/// ```rust
/// use kiwoom_stream_gateway::infrastructure::kiwoom::reconnect::{ReconnectConfig, ReconnectPolicy};
/// use std::time::Duration;
///
/// let mut policy = ReconnectPolicy::new(ReconnectConfig::default());
/// assert_eq!(policy.next_delay(), Duration::from_secs(5));
///
/// for _ in 0..3 {
///     policy.record_login_rejection();
/// }
/// assert_eq!(policy.next_delay(), Duration::from_secs(10));
///
/// policy.reset();
/// assert_eq!(policy.next_delay(), Duration::from_secs(5));
/// ```
#[derive(Debug)]
pub struct ReconnectPolicy {
    config: ReconnectConfig,
    rejections: u32,
    attempts: u64,
}

impl ReconnectPolicy {
    /// Create a new policy.
    #[must_use]
    pub const fn new(config: ReconnectConfig) -> Self {
        Self {
            config,
            rejections: 0,
            attempts: 0,
        }
    }

    /// Count a rejected login.
    pub const fn record_login_rejection(&mut self) {
        self.rejections = self.rejections.saturating_add(1);
    }

    /// Successful login: clear the rejection counter.
    pub const fn reset(&mut self) {
        self.rejections = 0;
    }

    /// Delay before the next session attempt. Also counts the attempt.
    #[must_use]
    pub fn next_delay(&mut self) -> Duration {
        self.attempts = self.attempts.saturating_add(1);
        let factor = 1 + self.rejections / 3;
        self.config
            .base_delay
            .saturating_mul(factor)
            .min(self.config.max_delay)
    }

    /// Consecutive login rejections.
    #[must_use]
    pub const fn consecutive_rejections(&self) -> u32 {
        self.rejections
    }

    /// Reconnect attempts over the policy's lifetime.
    #[must_use]
    pub const fn attempt_count(&self) -> u64 {
        self.attempts
    }
}
