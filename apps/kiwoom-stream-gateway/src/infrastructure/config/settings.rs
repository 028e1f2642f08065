//! Gateway Configuration Settings
//!
//! Configuration types for the gateway, loaded from environment variables.
//! Required credentials fail loudly; malformed optional values fall back to
//! their defaults.

use std::time::Duration;

use crate::domain::subscription::RefreshMode;

/// Default REST base URL.
pub const DEFAULT_API_URL: &str = "https://api.kiwoom.com";

/// Default streaming endpoint.
pub const DEFAULT_WS_URL: &str = "wss://api.kiwoom.com:10000/api/dostk/websocket";

/// Kiwoom application credentials.
#[derive(Clone)]
pub struct KiwoomCredentials {
    app_key: String,
    secret_key: String,
}

impl KiwoomCredentials {
    /// Create new credentials.
    #[must_use]
    pub const fn new(app_key: String, secret_key: String) -> Self {
        Self {
            app_key,
            secret_key,
        }
    }

    /// Application key.
    #[must_use]
    pub fn app_key(&self) -> &str {
        &self.app_key
    }

    /// Application secret.
    #[must_use]
    pub fn secret_key(&self) -> &str {
        &self.secret_key
    }
}

impl std::fmt::Debug for KiwoomCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KiwoomCredentials")
            .field("app_key", &"[REDACTED]")
            .field("secret_key", &"[REDACTED]")
            .finish()
    }
}

/// Upstream endpoints.
#[derive(Debug, Clone)]
pub struct EndpointSettings {
    /// REST base URL (auth and chart).
    pub api_url: String,
    /// Streaming socket URL.
    pub ws_url: String,
}

impl Default for EndpointSettings {
    fn default() -> Self {
        Self {
            api_url: DEFAULT_API_URL.to_string(),
            ws_url: DEFAULT_WS_URL.to_string(),
        }
    }
}

/// Upstream streaming connection settings.
#[derive(Debug, Clone)]
pub struct StreamSettings {
    /// Transport ping interval.
    pub ping_interval: Duration,
    /// Silence after a ping before the connection is considered dead.
    pub ping_timeout: Duration,
    /// Base reconnect delay.
    pub reconnect_base: Duration,
    /// Reconnect delay ceiling.
    pub reconnect_max: Duration,
    /// Wait after a failed credential acquisition.
    pub token_retry: Duration,
}

impl Default for StreamSettings {
    fn default() -> Self {
        Self {
            ping_interval: Duration::from_secs(20),
            ping_timeout: Duration::from_secs(30),
            reconnect_base: Duration::from_secs(5),
            reconnect_max: Duration::from_secs(60),
            token_retry: Duration::from_secs(10),
        }
    }
}

/// Historical chart fetch settings.
#[derive(Debug, Clone)]
pub struct ChartSettings {
    /// Admission gate capacity.
    pub concurrency: usize,
    /// Token bucket refill rate (tokens per second).
    pub rate_per_sec: f64,
    /// Token bucket capacity.
    pub burst: u32,
    /// Attempts per fetch, first try included.
    pub max_attempts: u32,
    /// Base retry delay, doubled per attempt.
    pub backoff_base: Duration,
    /// REST client timeout.
    pub http_timeout: Duration,
}

impl Default for ChartSettings {
    fn default() -> Self {
        Self {
            concurrency: 3,
            rate_per_sec: 5.0,
            burst: 5,
            max_attempts: 3,
            backoff_base: Duration::from_millis(1000),
            http_timeout: Duration::from_secs(15),
        }
    }
}

/// Real-time registration settings.
#[derive(Debug, Clone)]
pub struct RegistrationSettings {
    /// Quiet window before a batch is sent.
    pub debounce: Duration,
    /// Additive or replace registrations.
    pub refresh: RefreshMode,
    /// Registration group number.
    pub group: String,
    /// Channel codes to register for each symbol.
    pub channels: Vec<String>,
}

impl Default for RegistrationSettings {
    fn default() -> Self {
        Self {
            debounce: Duration::from_millis(500),
            refresh: RefreshMode::Additive,
            group: "1".to_string(),
            channels: vec!["00".to_string(), "0B".to_string()],
        }
    }
}

/// Downstream server settings.
#[derive(Debug, Clone)]
pub struct ServerSettings {
    /// HTTP / WebSocket port.
    pub port: u16,
    /// Outbound queue depth per downstream connection.
    pub subscriber_buffer: usize,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            port: 8000,
            subscriber_buffer: 256,
        }
    }
}

/// Complete gateway configuration.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// Application credentials.
    pub credentials: KiwoomCredentials,
    /// Upstream endpoints.
    pub endpoints: EndpointSettings,
    /// Streaming connection settings.
    pub stream: StreamSettings,
    /// Chart fetch settings.
    pub chart: ChartSettings,
    /// Registration settings.
    pub registration: RegistrationSettings,
    /// Downstream server settings.
    pub server: ServerSettings,
}

impl GatewayConfig {
    /// Create a configuration with defaults around the given credentials.
    #[must_use]
    pub fn with_credentials(credentials: KiwoomCredentials) -> Self {
        Self {
            credentials,
            endpoints: EndpointSettings::default(),
            stream: StreamSettings::default(),
            chart: ChartSettings::default(),
            registration: RegistrationSettings::default(),
            server: ServerSettings::default(),
        }
    }

    /// Create configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if a required variable is missing or empty, or if
    /// `GATEWAY_REG_REFRESH` names an unknown mode.
    pub fn from_env() -> Result<Self, ConfigError> {
        let app_key = required_env("KIWOOM_API_KEY")?;
        let secret_key = required_env("KIWOOM_SECRET_KEY")?;

        let endpoints = EndpointSettings {
            api_url: std::env::var("KIWOOM_API_URL")
                .ok()
                .filter(|v| !v.trim().is_empty())
                .map_or_else(|| DEFAULT_API_URL.to_string(), |v| v.trim_end_matches('/').to_string()),
            ws_url: std::env::var("KIWOOM_WS_URL")
                .ok()
                .filter(|v| !v.trim().is_empty())
                .unwrap_or_else(|| DEFAULT_WS_URL.to_string()),
        };

        let stream_defaults = StreamSettings::default();
        let stream = StreamSettings {
            ping_interval: parse_env_duration_secs(
                "GATEWAY_PING_INTERVAL_SECS",
                stream_defaults.ping_interval,
            ),
            ping_timeout: parse_env_duration_secs(
                "GATEWAY_PING_TIMEOUT_SECS",
                stream_defaults.ping_timeout,
            ),
            reconnect_base: parse_env_duration_secs(
                "GATEWAY_RECONNECT_BASE_SECS",
                stream_defaults.reconnect_base,
            ),
            reconnect_max: parse_env_duration_secs(
                "GATEWAY_RECONNECT_MAX_SECS",
                stream_defaults.reconnect_max,
            ),
            token_retry: parse_env_duration_secs(
                "GATEWAY_TOKEN_RETRY_SECS",
                stream_defaults.token_retry,
            ),
        };

        let chart_defaults = ChartSettings::default();
        let chart = ChartSettings {
            concurrency: parse_env_usize("GATEWAY_CHART_CONCURRENCY", chart_defaults.concurrency)
                .max(1),
            rate_per_sec: parse_env_f64("GATEWAY_CHART_RATE_PER_SEC", chart_defaults.rate_per_sec),
            burst: parse_env_u32("GATEWAY_CHART_BURST", chart_defaults.burst),
            max_attempts: parse_env_u32("GATEWAY_CHART_MAX_ATTEMPTS", chart_defaults.max_attempts)
                .max(1),
            backoff_base: parse_env_duration_millis(
                "GATEWAY_CHART_BACKOFF_MS",
                chart_defaults.backoff_base,
            ),
            http_timeout: parse_env_duration_secs(
                "GATEWAY_HTTP_TIMEOUT_SECS",
                chart_defaults.http_timeout,
            ),
        };

        let registration_defaults = RegistrationSettings::default();
        let refresh = match std::env::var("GATEWAY_REG_REFRESH") {
            Ok(raw) if !raw.trim().is_empty() => RefreshMode::parse(&raw).ok_or_else(|| {
                ConfigError::Invalid {
                    key: "GATEWAY_REG_REFRESH".to_string(),
                    value: raw.clone(),
                }
            })?,
            _ => registration_defaults.refresh,
        };
        let registration = RegistrationSettings {
            debounce: parse_env_duration_millis(
                "GATEWAY_REG_DEBOUNCE_MS",
                registration_defaults.debounce,
            ),
            refresh,
            group: std::env::var("GATEWAY_REG_GROUP")
                .ok()
                .filter(|v| !v.trim().is_empty())
                .unwrap_or(registration_defaults.group),
            channels: std::env::var("GATEWAY_REG_CHANNELS")
                .ok()
                .map(|v| parse_list(&v))
                .filter(|v| !v.is_empty())
                .unwrap_or(registration_defaults.channels),
        };

        let server_defaults = ServerSettings::default();
        let server = ServerSettings {
            port: parse_env_u16("GATEWAY_PORT", server_defaults.port),
            subscriber_buffer: parse_env_usize(
                "GATEWAY_SUBSCRIBER_BUFFER",
                server_defaults.subscriber_buffer,
            )
            .max(1),
        };

        Ok(Self {
            credentials: KiwoomCredentials::new(app_key, secret_key),
            endpoints,
            stream,
            chart,
            registration,
            server,
        })
    }
}

/// Configuration error.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Required environment variable is missing.
    #[error("missing required environment variable: {0}")]
    MissingEnvVar(String),
    /// Environment variable has empty value.
    #[error("environment variable {0} cannot be empty")]
    EmptyValue(String),
    /// Environment variable has an unusable value.
    #[error("environment variable {key} has invalid value {value:?}")]
    Invalid {
        /// Variable name.
        key: String,
        /// Offending value.
        value: String,
    },
}

fn required_env(key: &str) -> Result<String, ConfigError> {
    let value = std::env::var(key).map_err(|_| ConfigError::MissingEnvVar(key.to_string()))?;
    if value.trim().is_empty() {
        return Err(ConfigError::EmptyValue(key.to_string()));
    }
    Ok(value)
}

fn parse_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(ToString::to_string)
        .collect()
}

fn parse_env_u16(key: &str, default: u16) -> u16 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn parse_env_u32(key: &str, default: u32) -> u32 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn parse_env_usize(key: &str, default: usize) -> usize {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn parse_env_f64(key: &str, default: f64) -> f64 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse::<f64>().ok())
        .filter(|v| v.is_finite() && *v > 0.0)
        .unwrap_or(default)
}

fn parse_env_duration_secs(key: &str, default: Duration) -> Duration {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        .map_or(default, Duration::from_secs)
}

fn parse_env_duration_millis(key: &str, default: Duration) -> Duration {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        .map_or(default, Duration::from_millis)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn credentials_redacted_debug() {
        let creds = KiwoomCredentials::new("key123".to_string(), "secret456".to_string());
        let debug = format!("{creds:?}");
        assert!(!debug.contains("key123"));
        assert!(!debug.contains("secret456"));
        assert!(debug.contains("[REDACTED]"));
    }

    #[test]
    fn stream_settings_defaults() {
        let settings = StreamSettings::default();
        assert_eq!(settings.ping_interval, Duration::from_secs(20));
        assert_eq!(settings.ping_timeout, Duration::from_secs(30));
        assert_eq!(settings.reconnect_base, Duration::from_secs(5));
        assert_eq!(settings.reconnect_max, Duration::from_secs(60));
        assert_eq!(settings.token_retry, Duration::from_secs(10));
    }

    #[test]
    fn chart_settings_defaults() {
        let settings = ChartSettings::default();
        assert_eq!(settings.concurrency, 3);
        assert_eq!(settings.burst, 5);
        assert_eq!(settings.max_attempts, 3);
        assert_eq!(settings.backoff_base, Duration::from_secs(1));
    }

    #[test]
    fn registration_settings_defaults() {
        let settings = RegistrationSettings::default();
        assert_eq!(settings.debounce, Duration::from_millis(500));
        assert_eq!(settings.refresh, RefreshMode::Additive);
        assert_eq!(settings.group, "1");
        assert_eq!(settings.channels, vec!["00", "0B"]);
    }

    #[test]
    fn server_settings_defaults() {
        let settings = ServerSettings::default();
        assert_eq!(settings.port, 8000);
        assert_eq!(settings.subscriber_buffer, 256);
    }

    #[test]
    fn parse_list_trims_and_skips_empty() {
        assert_eq!(parse_list(" 00, 0B ,,"), vec!["00", "0B"]);
        assert!(parse_list("").is_empty());
    }

    #[test]
    fn parse_env_helpers_fall_back_to_default() {
        assert_eq!(parse_env_u16("GATEWAY_TEST_UNSET_PORT_VAR", 1234), 1234);
        assert_eq!(
            parse_env_duration_millis("GATEWAY_TEST_UNSET_MS_VAR", Duration::from_millis(7)),
            Duration::from_millis(7)
        );
    }

    #[test]
    fn config_error_messages() {
        let err = ConfigError::MissingEnvVar("KIWOOM_API_KEY".to_string());
        assert!(err.to_string().contains("KIWOOM_API_KEY"));

        let err = ConfigError::Invalid {
            key: "GATEWAY_REG_REFRESH".to_string(),
            value: "sometimes".to_string(),
        };
        assert!(err.to_string().contains("sometimes"));
    }
}
