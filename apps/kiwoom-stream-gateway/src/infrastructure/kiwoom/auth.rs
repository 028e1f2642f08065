//! Access Token Lifecycle
//!
//! [`SessionManager`] owns the single process-wide access token used by both
//! the streaming login and the chart REST calls.
//!
//! # Authentication Flow
//!
//! 1. `POST {api_url}/oauth2/token` with
//!    `{"grant_type":"client_credentials","appkey":"...","secretkey":"..."}`
//! 2. HTTP 200 with `{"token":"..."}` installs the token
//! 3. Anything else leaves the current token untouched and reports failure
//!
//! Refreshes are single-flight: concurrent callers queue on one async lock,
//! and callers that were waiting while another refresh completed take that
//! refresh's outcome instead of issuing their own request.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::RwLock;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::Mutex;

use crate::infrastructure::config::KiwoomCredentials;
use crate::infrastructure::metrics;

/// Token endpoint path, relative to the REST base URL.
pub const TOKEN_PATH: &str = "/oauth2/token";

// =============================================================================
// Error Types
// =============================================================================

/// Errors that can occur while acquiring an access token.
#[derive(Debug, Clone, Error)]
pub enum AuthError {
    /// Network or body read failure.
    #[error("auth transport error: {0}")]
    Transport(String),

    /// The token endpoint answered with a non-success status.
    #[error("auth rejected with HTTP {status}: {message}")]
    Rejected {
        /// HTTP status code.
        status: u16,
        /// Response body or upstream message.
        message: String,
    },

    /// A success response without a usable token.
    #[error("auth response carried no token: {0}")]
    MissingToken(String),
}

// =============================================================================
// Token
// =============================================================================

/// An opaque bearer token.
#[derive(Clone, PartialEq, Eq)]
pub struct AccessToken(String);

impl AccessToken {
    /// Wrap a raw token string.
    #[must_use]
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    /// The raw token.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for AccessToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("AccessToken([REDACTED])")
    }
}

#[derive(Serialize)]
struct TokenRequest<'a> {
    grant_type: &'a str,
    appkey: &'a str,
    secretkey: &'a str,
}

#[derive(Deserialize)]
struct TokenResponse {
    #[serde(default)]
    token: Option<String>,
    #[serde(default)]
    return_msg: Option<String>,
}

// =============================================================================
// Session Manager
// =============================================================================

/// Owner of the process-wide access token.
pub struct SessionManager {
    client: Client,
    token_url: String,
    credentials: KiwoomCredentials,
    current: RwLock<Option<AccessToken>>,
    last_outcome: RwLock<Option<Result<AccessToken, AuthError>>>,
    refreshes: AtomicU64,
    refresh_lock: Mutex<()>,
}

impl fmt::Debug for SessionManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionManager")
            .field("token_url", &self.token_url)
            .field("has_token", &self.has_token())
            .field("refreshes", &self.refreshes.load(Ordering::SeqCst))
            .finish_non_exhaustive()
    }
}

impl SessionManager {
    /// Create a manager for the REST base URL `api_url`.
    #[must_use]
    pub fn new(client: Client, api_url: &str, credentials: KiwoomCredentials) -> Self {
        Self {
            client,
            token_url: format!("{}{TOKEN_PATH}", api_url.trim_end_matches('/')),
            credentials,
            current: RwLock::new(None),
            last_outcome: RwLock::new(None),
            refreshes: AtomicU64::new(0),
            refresh_lock: Mutex::new(()),
        }
    }

    /// The current token, if one is installed.
    #[must_use]
    pub fn current(&self) -> Option<AccessToken> {
        self.current.read().clone()
    }

    /// Whether a token is installed.
    #[must_use]
    pub fn has_token(&self) -> bool {
        self.current.read().is_some()
    }

    /// Get a token, requesting one when none is held or `force` is set.
    ///
    /// # Errors
    ///
    /// Returns the failure of the refresh this call joined or issued.
    pub async fn acquire(&self, force: bool) -> Result<AccessToken, AuthError> {
        if !force && let Some(token) = self.current() {
            return Ok(token);
        }

        let observed = self.refreshes.load(Ordering::SeqCst);
        let _guard = self.refresh_lock.lock().await;

        // A refresh finished while we queued; share its outcome.
        if self.refreshes.load(Ordering::SeqCst) != observed
            && let Some(outcome) = self.last_outcome.read().clone()
        {
            return outcome;
        }
        if !force && let Some(token) = self.current() {
            return Ok(token);
        }

        let outcome = self.request_token().await;
        match &outcome {
            Ok(token) => {
                *self.current.write() = Some(token.clone());
                tracing::info!("Access token issued");
            }
            Err(e) => tracing::error!(error = %e, "Access token request failed"),
        }
        metrics::record_auth_request(outcome.is_ok());

        *self.last_outcome.write() = Some(outcome.clone());
        self.refreshes.fetch_add(1, Ordering::SeqCst);
        outcome
    }

    /// Drop the current token.
    ///
    /// Called when the streaming login reports the token as rejected.
    pub fn invalidate(&self) {
        *self.current.write() = None;
        *self.last_outcome.write() = None;
        tracing::warn!("Access token invalidated");
    }

    async fn request_token(&self) -> Result<AccessToken, AuthError> {
        let body = TokenRequest {
            grant_type: "client_credentials",
            appkey: self.credentials.app_key(),
            secretkey: self.credentials.secret_key(),
        };

        let response = self
            .client
            .post(&self.token_url)
            .json(&body)
            .send()
            .await
            .map_err(|e| AuthError::Transport(e.to_string()))?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| AuthError::Transport(e.to_string()))?;

        if status != StatusCode::OK {
            return Err(AuthError::Rejected {
                status: status.as_u16(),
                message: text,
            });
        }

        let parsed: TokenResponse =
            serde_json::from_str(&text).map_err(|e| AuthError::MissingToken(e.to_string()))?;

        match parsed.token.filter(|t| !t.is_empty()) {
            Some(token) => Ok(AccessToken::new(token)),
            None => Err(AuthError::MissingToken(
                parsed.return_msg.unwrap_or_else(|| "no token field".to_string()),
            )),
        }
    }
}
