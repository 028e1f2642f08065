//! Historical Chart Gateway
//!
//! Rate-limited, retrying candle lookups against the chart REST operation.
//!
//! # Request Shape
//!
//! `POST {api_url}/api/dostk/chart` with headers `authorization: Bearer <token>`
//! and `api-id`, and body:
//!
//! ```json
//! {"stk_cd": "005930_AL", "upd_stkpc_tp": "1", "base_dt": "20250214", "tic_scope": "5"}
//! ```
//!
//! | Timeframe | `api-id` | `tic_scope` |
//! |-----------|----------|-------------|
//! | minutes   | ka10080  | interval    |
//! | daily     | ka10081  | omitted     |
//! | weekly    | ka10082  | omitted     |
//!
//! # Admission
//!
//! Every lookup holds one slot of a FIFO semaphore for its whole retry loop
//! and spends one token-bucket token per attempt. A 429 or any other
//! failure is retried after `backoff_base * 2^attempt`; exhausting the
//! attempts yields an empty list.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;
use tokio::sync::Semaphore;

use super::auth::{AccessToken, SessionManager};
use super::rate_limit::TokenBucket;
use crate::application::ports::ChartSource;
use crate::domain::streaming::{
    Candle, Symbol, Timeframe, clean_value, first_present, market_date, value_to_string,
};
use crate::infrastructure::config::ChartSettings;
use crate::infrastructure::metrics::{self, ChartOutcome, RetryCause};

/// Chart endpoint path, relative to the REST base URL.
pub const CHART_PATH: &str = "/api/dostk/chart";

/// Minute-bar operation.
pub const MINUTE_CHART_API: &str = "ka10080";
/// Day-bar operation.
pub const DAILY_CHART_API: &str = "ka10081";
/// Week-bar operation.
pub const WEEKLY_CHART_API: &str = "ka10082";

/// Candidate list fields, tried in order.
const LIST_FIELDS: [&str; 3] = [
    "stk_min_pole_chart_qry",
    "stk_dt_pole_chart_qry",
    "stk_stk_pole_chart_qry",
];

const TIME_KEYS: &[&str] = &["cntr_tm", "dt"];
const OPEN_KEYS: &[&str] = &["open_pric", "stck_oprc"];
const HIGH_KEYS: &[&str] = &["high_pric", "stck_hgpr"];
const LOW_KEYS: &[&str] = &["low_pric", "stck_lwpr"];
const CLOSE_KEYS: &[&str] = &["cur_prc", "stck_prpr", "stck_clpr"];
const VOLUME_KEYS: &[&str] = &["trde_qty", "acc_trde_qty"];

// =============================================================================
// Error Types
// =============================================================================

/// Failure of a single chart attempt. Never escapes [`ChartGateway::fetch_on`].
#[derive(Debug, Error)]
pub enum ChartError {
    /// HTTP 429.
    #[error("rate limited by upstream")]
    RateLimited,

    /// Any other non-success status.
    #[error("chart request failed with HTTP {status}")]
    Status {
        /// HTTP status code.
        status: u16,
    },

    /// Network failure.
    #[error("chart transport error: {0}")]
    Transport(String),

    /// Undecodable response body.
    #[error("chart response decode error: {0}")]
    Decode(String),
}

// =============================================================================
// Request Mapping
// =============================================================================

/// Upstream operation id for a timeframe.
#[must_use]
pub const fn api_id(timeframe: Timeframe) -> &'static str {
    match timeframe {
        Timeframe::Minutes(_) => MINUTE_CHART_API,
        Timeframe::Weekly => WEEKLY_CHART_API,
        Timeframe::Daily => DAILY_CHART_API,
    }
}

/// Chart request body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChartRequestBody {
    stk_cd: String,
    upd_stkpc_tp: &'static str,
    base_dt: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    tic_scope: Option<String>,
}

impl ChartRequestBody {
    /// Build the body for `symbol` at `timeframe` as of `base_date`.
    #[must_use]
    pub fn new(symbol: &Symbol, timeframe: Timeframe, base_date: &str) -> Self {
        let tic_scope = match timeframe {
            Timeframe::Minutes(interval) => Some(interval.to_string()),
            Timeframe::Weekly | Timeframe::Daily => None,
        };
        Self {
            stk_cd: symbol.wire_code(),
            upd_stkpc_tp: "1",
            base_dt: base_date.to_string(),
            tic_scope,
        }
    }
}

// =============================================================================
// Response Parsing
// =============================================================================

/// Extract candles from a chart response payload.
///
/// The first candidate list field holding a non-empty array wins. For
/// minute bars, a clock-only `HHMMSS` time is prefixed with `base_date`.
#[must_use]
pub fn extract_candles(payload: &Value, timeframe: Timeframe, base_date: &str) -> Vec<Candle> {
    let Some(records) = LIST_FIELDS
        .iter()
        .filter_map(|field| payload.get(*field).and_then(Value::as_array))
        .find(|list| !list.is_empty())
    else {
        return Vec::new();
    };

    records
        .iter()
        .map(|record| {
            let mut time = first_present(record, TIME_KEYS)
                .map(value_to_string)
                .unwrap_or_default();
            if timeframe.is_intraday() && time.len() == 6 {
                time = format!("{base_date}{time}");
            }
            Candle {
                time,
                open: clean_value(first_present(record, OPEN_KEYS)),
                high: clean_value(first_present(record, HIGH_KEYS)),
                low: clean_value(first_present(record, LOW_KEYS)),
                close: clean_value(first_present(record, CLOSE_KEYS)),
                volume: clean_value(first_present(record, VOLUME_KEYS)),
            }
        })
        .collect()
}

// =============================================================================
// Chart Gateway
// =============================================================================

/// Rate-limited, retrying chart fetcher.
pub struct ChartGateway {
    client: Client,
    chart_url: String,
    session: Arc<SessionManager>,
    gate: Semaphore,
    limiter: TokenBucket,
    max_attempts: u32,
    backoff_base: Duration,
}

impl ChartGateway {
    /// Create a gateway for the REST base URL `api_url`.
    #[must_use]
    pub fn new(
        client: Client,
        api_url: &str,
        session: Arc<SessionManager>,
        settings: &ChartSettings,
    ) -> Self {
        Self {
            client,
            chart_url: format!("{}{CHART_PATH}", api_url.trim_end_matches('/')),
            session,
            gate: Semaphore::new(settings.concurrency.max(1)),
            limiter: TokenBucket::new(settings.rate_per_sec, settings.burst),
            max_attempts: settings.max_attempts.max(1),
            backoff_base: settings.backoff_base,
        }
    }

    /// Free admission slots.
    #[must_use]
    pub fn available_slots(&self) -> usize {
        self.gate.available_permits()
    }

    /// Delay before retrying after the zero-based `attempt` failed.
    #[must_use]
    pub fn retry_delay(&self, attempt: u32) -> Duration {
        self.backoff_base.saturating_mul(2u32.saturating_pow(attempt))
    }

    /// Fetch candles as of `base_date` (`YYYYMMDD`).
    ///
    /// Never fails: an unobtainable credential or exhausted retries yield an
    /// empty list, logged here. The credential is read per attempt, after
    /// admission, so a token invalidated while queued is not reused.
    pub async fn fetch_on(&self, symbol: &Symbol, timeframe: Timeframe, base_date: &str) -> Vec<Candle> {
        let started = Instant::now();
        let body = ChartRequestBody::new(symbol, timeframe, base_date);
        let api_id = api_id(timeframe);

        let Ok(_permit) = self.gate.acquire().await else {
            tracing::error!(%symbol, "Chart admission gate closed");
            metrics::record_chart_request(ChartOutcome::Failed, started.elapsed());
            return Vec::new();
        };

        for attempt in 0..self.max_attempts {
            let token = match self.session.acquire(false).await {
                Ok(token) => token,
                Err(e) => {
                    tracing::error!(%symbol, error = %e, "Chart skipped: no credential");
                    metrics::record_chart_request(ChartOutcome::Failed, started.elapsed());
                    return Vec::new();
                }
            };

            self.limiter.consume().await;

            match self.request_once(api_id, &token, &body).await {
                Ok(payload) => {
                    let candles = extract_candles(&payload, timeframe, base_date);
                    tracing::info!(
                        %symbol,
                        %timeframe,
                        api_id,
                        count = candles.len(),
                        "Chart fetched"
                    );
                    metrics::record_chart_request(ChartOutcome::Success, started.elapsed());
                    return candles;
                }
                Err(e) => {
                    let cause = if matches!(e, ChartError::RateLimited) {
                        RetryCause::RateLimited
                    } else {
                        RetryCause::Failure
                    };
                    let remaining = self.max_attempts - attempt - 1;
                    tracing::warn!(
                        %symbol,
                        api_id,
                        attempt = attempt + 1,
                        remaining,
                        error = %e,
                        "Chart attempt failed"
                    );
                    if remaining > 0 {
                        metrics::record_chart_retry(cause);
                        tokio::time::sleep(self.retry_delay(attempt)).await;
                    }
                }
            }
        }

        tracing::error!(%symbol, attempts = self.max_attempts, "Chart retries exhausted");
        metrics::record_chart_request(ChartOutcome::Failed, started.elapsed());
        Vec::new()
    }

    async fn request_once(
        &self,
        api_id: &str,
        token: &AccessToken,
        body: &ChartRequestBody,
    ) -> Result<Value, ChartError> {
        let response = self
            .client
            .post(&self.chart_url)
            .header("authorization", format!("Bearer {}", token.as_str()))
            .header("api-id", api_id)
            .json(body)
            .send()
            .await
            .map_err(|e| ChartError::Transport(e.to_string()))?;

        let status = response.status();
        if status == StatusCode::TOO_MANY_REQUESTS {
            return Err(ChartError::RateLimited);
        }
        if !status.is_success() {
            return Err(ChartError::Status {
                status: status.as_u16(),
            });
        }

        response
            .json::<Value>()
            .await
            .map_err(|e| ChartError::Decode(e.to_string()))
    }
}

#[async_trait]
impl ChartSource for ChartGateway {
    async fn fetch(&self, symbol: &Symbol, timeframe: Timeframe) -> Vec<Candle> {
        self.fetch_on(symbol, timeframe, &market_date()).await
    }
}
