//! Configuration Module
//!
//! Environment-driven configuration for the gateway.

mod settings;

pub use settings::{
    ChartSettings, ConfigError, DEFAULT_API_URL, DEFAULT_WS_URL, EndpointSettings, GatewayConfig,
    KiwoomCredentials, RegistrationSettings, ServerSettings, StreamSettings,
};
