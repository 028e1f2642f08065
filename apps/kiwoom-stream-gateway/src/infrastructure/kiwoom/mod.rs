//! Kiwoom Adapters
//!
//! Clients for Kiwoom's REST and streaming interfaces:
//!
//! - **auth**: process-wide access token (`/oauth2/token`)
//! - **chart**: rate-limited historical candle lookups (`/api/dostk/chart`)
//! - **stream**: the single real-time socket and its login state machine
//! - **registry**: debounced `REG` batching for the stream
//! - **codec**: frame classification and tick normalization

pub mod auth;
pub mod chart;
pub mod codec;
pub mod heartbeat;
pub mod rate_limit;
pub mod reconnect;
pub mod registry;
pub mod stream;

pub use auth::{AccessToken, AuthError, SessionManager};
pub use chart::{ChartError, ChartGateway};
pub use codec::{CodecError, Normalized, TickNormalizer, UpstreamFrame};
pub use heartbeat::{HeartbeatAction, HeartbeatConfig, HeartbeatState};
pub use rate_limit::TokenBucket;
pub use reconnect::{ReconnectConfig, ReconnectPolicy};
pub use registry::{FrameSender, RegistrationFrame, SubscriptionRegistry};
pub use stream::{
    ConnectionState, StreamClient, StreamClientConfig, StreamClientError, StreamEvent,
};
