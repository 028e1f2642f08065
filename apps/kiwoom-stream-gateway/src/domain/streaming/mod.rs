//! Market Data Streaming Types
//!
//! Canonical internal representation of market data: symbols and their
//! upstream wire codes, ticks, candles and chart timeframes, plus the
//! message shapes exchanged with downstream subscribers.
//!
//! # Numeric Cleaning
//!
//! Upstream numeric fields arrive as strings prefixed with `+`/`-` direction
//! markers (`"+73400"`, `"-600"`). The markers describe the move relative to
//! the prior close, not the sign of the value, so [`clean_numeric`] strips
//! every character that is not a digit or a decimal point.

use std::fmt;

use chrono::{DateTime, FixedOffset, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

// =============================================================================
// Constants
// =============================================================================

/// Routing suffix that selects SOR quotes (alternate venues included).
pub const SOR_SUFFIX: &str = "_AL";

/// Sub-day interval tokens accepted by the minute chart operation.
pub const MINUTE_INTERVALS: [&str; 8] = ["1", "3", "5", "10", "15", "30", "45", "60"];

/// Market time zone: fixed UTC+9, no daylight saving.
pub const MARKET_OFFSET: FixedOffset = match FixedOffset::east_opt(9 * 3600) {
    Some(offset) => offset,
    None => panic!("UTC+9 is a valid offset"),
};

// =============================================================================
// Symbols
// =============================================================================

/// Translate a market code to its upstream wire form.
///
/// Idempotent: an already-suffixed code is returned unchanged.
#[must_use]
pub fn wire_code(code: &str) -> String {
    if code.ends_with(SOR_SUFFIX) {
        code.to_string()
    } else {
        format!("{code}{SOR_SUFFIX}")
    }
}

/// Strip the routing suffix from a wire code.
#[must_use]
pub fn canonical_code(code: &str) -> &str {
    code.strip_suffix(SOR_SUFFIX).unwrap_or(code)
}

/// A canonical market code such as `005930`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Symbol(String);

impl Symbol {
    /// Create a symbol from either its canonical or its wire form.
    #[must_use]
    pub fn new(code: impl AsRef<str>) -> Self {
        Self(canonical_code(code.as_ref().trim()).to_string())
    }

    /// The canonical code.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The upstream wire code (canonical code plus [`SOR_SUFFIX`]).
    #[must_use]
    pub fn wire_code(&self) -> String {
        wire_code(&self.0)
    }

    /// Whether the code is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// =============================================================================
// Numeric Cleaning
// =============================================================================

/// Strip everything but digits and `.` and parse the remainder.
///
/// Returns `0.0` when nothing parseable remains, including inputs with
/// more than one `.` such as `"1.2.3"`. A malformed field therefore zeroes
/// that field only; it never fails the surrounding tick or chart record.
#[must_use]
pub fn clean_numeric(raw: &str) -> f64 {
    let cleaned: String = raw
        .chars()
        .filter(|c| c.is_ascii_digit() || *c == '.')
        .collect();
    cleaned.parse().unwrap_or(0.0)
}

/// [`clean_numeric`] over an optional JSON value (string or number).
#[must_use]
pub fn clean_value(value: Option<&Value>) -> f64 {
    match value {
        Some(Value::String(s)) => clean_numeric(s),
        Some(Value::Number(n)) => clean_numeric(&n.to_string()),
        _ => 0.0,
    }
}

/// Like [`clean_value`], but a leading `-` is kept as the sign.
///
/// Used for change rates, the only signed field of a [`Tick`].
#[must_use]
pub fn signed_value(value: Option<&Value>) -> f64 {
    match value {
        Some(Value::Number(n)) => n.as_f64().unwrap_or(0.0),
        Some(Value::String(s)) => {
            let magnitude = clean_numeric(s);
            if s.trim_start().starts_with('-') {
                -magnitude
            } else {
                magnitude
            }
        }
        _ => 0.0,
    }
}

/// Look up the first alias that carries a non-empty value.
#[must_use]
pub fn first_present<'a>(record: &'a Value, aliases: &[&str]) -> Option<&'a Value> {
    aliases
        .iter()
        .filter_map(|key| record.get(*key))
        .find(|value| match value {
            Value::Null => false,
            Value::String(s) => !s.trim().is_empty(),
            _ => true,
        })
}

/// Render a JSON scalar as a plain string (no quotes for strings).
#[must_use]
pub fn value_to_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.trim().to_string(),
        other => other.to_string(),
    }
}

/// Truncate a cleaned value to a non-negative integer.
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
#[must_use]
pub fn to_whole(value: f64) -> u64 {
    if value.is_finite() && value > 0.0 {
        value as u64
    } else {
        0
    }
}

// =============================================================================
// Market Time
// =============================================================================

/// Current time in the market's time zone.
#[must_use]
pub fn market_now() -> DateTime<FixedOffset> {
    Utc::now().with_timezone(&MARKET_OFFSET)
}

/// Today's market date as `YYYYMMDD`.
#[must_use]
pub fn market_date() -> String {
    market_now().format("%Y%m%d").to_string()
}

/// Current market clock time as `HHMMSS`.
#[must_use]
pub fn market_clock() -> String {
    market_now().format("%H%M%S").to_string()
}

// =============================================================================
// Ticks and Candles
// =============================================================================

/// A normalized real-time trade tick.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tick {
    /// Canonical symbol.
    pub symbol: String,
    /// Last trade price.
    pub price: u64,
    /// Session open.
    pub open: u64,
    /// Session high.
    pub high: u64,
    /// Session low.
    pub low: u64,
    /// Cumulative session volume.
    pub volume: u64,
    /// Percent change against the prior close.
    pub change_rate: f64,
    /// `HHMMSS` or `YYYYMMDDHHMMSS`.
    pub timestamp: String,
}

/// One historical OHLCV bar.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    /// `YYYYMMDD` for daily/weekly bars, `YYYYMMDDHHMMSS` for sub-day bars.
    #[serde(rename = "dt")]
    pub time: String,
    /// Open price.
    pub open: f64,
    /// High price.
    pub high: f64,
    /// Low price.
    pub low: f64,
    /// Close price.
    pub close: f64,
    /// Traded volume.
    pub volume: f64,
}

// =============================================================================
// Timeframes
// =============================================================================

/// Chart resolution requested by a downstream client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Timeframe {
    /// Sub-day bars of the given minute interval.
    Minutes(u8),
    /// Calendar-week bars.
    Weekly,
    /// Calendar-day bars.
    #[default]
    Daily,
}

impl Timeframe {
    /// Parse a timeframe token. Unknown tokens fall back to daily.
    #[must_use]
    pub fn parse(raw: &str) -> Self {
        let raw = raw.trim();
        if MINUTE_INTERVALS.contains(&raw) {
            return raw.parse().map_or(Self::Daily, Self::Minutes);
        }
        match raw {
            "W" | "w" => Self::Weekly,
            _ => Self::Daily,
        }
    }

    /// Whether bars carry a clock-only time that needs the date prefixed.
    #[must_use]
    pub const fn is_intraday(&self) -> bool {
        matches!(self, Self::Minutes(_))
    }
}

impl fmt::Display for Timeframe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Minutes(interval) => write!(f, "{interval}"),
            Self::Weekly => f.write_str("W"),
            Self::Daily => f.write_str("D"),
        }
    }
}

// =============================================================================
// Downstream Messages
// =============================================================================

fn default_timeframe() -> String {
    "D".to_string()
}

/// Requests sent by downstream clients.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "type")]
pub enum ClientRequest {
    /// Chart snapshot plus real-time registration.
    #[serde(rename = "subscribe")]
    Subscribe {
        /// Requested symbol.
        #[serde(default)]
        symbol: String,
        /// Chart timeframe token.
        #[serde(default = "default_timeframe")]
        timeframe: String,
    },
    /// Chart snapshot only (timeframe change).
    #[serde(rename = "requestChart")]
    RequestChart {
        /// Requested symbol.
        #[serde(default)]
        symbol: String,
        /// Chart timeframe token.
        #[serde(default = "default_timeframe")]
        timeframe: String,
    },
    /// Accepted and logged, never enacted upstream.
    #[serde(rename = "unsubscribe")]
    Unsubscribe {
        /// Symbol the client no longer wants.
        #[serde(default)]
        symbol: String,
    },
}

/// Payload of a chart message.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChartPayload {
    /// Candles, oldest first as delivered upstream.
    pub output: Vec<Candle>,
}

/// Messages sent to downstream clients.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum OutboundMessage {
    /// Real-time tick, broadcast to every subscriber.
    Tick {
        /// The tick.
        data: Tick,
    },
    /// Chart snapshot, sent to the requesting subscriber only.
    Chart {
        /// Canonical symbol.
        symbol: String,
        /// Candle list.
        data: ChartPayload,
    },
}

impl OutboundMessage {
    /// Build a chart message.
    #[must_use]
    pub fn chart(symbol: &Symbol, candles: Vec<Candle>) -> Self {
        Self::Chart {
            symbol: symbol.as_str().to_string(),
            data: ChartPayload { output: candles },
        }
    }

    /// Short label for logs and metrics.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Tick { .. } => "tick",
            Self::Chart { .. } => "chart",
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use proptest::prelude::*;
    use serde_json::json;
    use test_case::test_case;

    use super::*;

    #[test]
    fn wire_code_appends_suffix() {
        assert_eq!(wire_code("005930"), "005930_AL");
        assert_eq!(wire_code("005930_AL"), "005930_AL");
    }

    #[test]
    fn symbol_accepts_wire_form() {
        let symbol = Symbol::new("005930_AL");
        assert_eq!(symbol.as_str(), "005930");
        assert_eq!(symbol.wire_code(), "005930_AL");
    }

    #[test]
    fn clean_numeric_discards_direction_markers() {
        assert!((clean_numeric("+73400") - 73400.0).abs() < f64::EPSILON);
        assert!((clean_numeric("-600") - 600.0).abs() < f64::EPSILON);
        assert!((clean_numeric("-0.81") - 0.81).abs() < f64::EPSILON);
        assert!(clean_numeric("").abs() < f64::EPSILON);
        assert!(clean_numeric("--").abs() < f64::EPSILON);
    }

    #[test]
    fn clean_numeric_zeroes_unparseable_remainder() {
        assert!(clean_numeric("1.2.3").abs() < f64::EPSILON);
        assert!(clean_numeric("+1..5").abs() < f64::EPSILON);
        assert!((clean_numeric("12,345") - 12345.0).abs() < f64::EPSILON);
    }

    #[test]
    fn clean_value_handles_missing_and_numbers() {
        assert!(clean_value(None).abs() < f64::EPSILON);
        assert!(clean_value(Some(&Value::Null)).abs() < f64::EPSILON);
        assert!((clean_value(Some(&json!(-600))) - 600.0).abs() < f64::EPSILON);
        assert!((clean_value(Some(&json!("1,234"))) - 1234.0).abs() < f64::EPSILON);
    }

    #[test]
    fn signed_value_keeps_sign() {
        assert!((signed_value(Some(&json!("-1.81"))) + 1.81).abs() < 1e-9);
        assert!((signed_value(Some(&json!("+2.5"))) - 2.5).abs() < 1e-9);
        assert!((signed_value(Some(&json!(-0.5))) + 0.5).abs() < 1e-9);
        assert!(signed_value(None).abs() < f64::EPSILON);
    }

    #[test]
    fn first_present_skips_empty_values() {
        let record = json!({"a": "", "b": null, "c": "7"});
        assert_eq!(first_present(&record, &["a", "b", "c"]), Some(&json!("7")));
        assert_eq!(first_present(&record, &["a", "b"]), None);
    }

    #[test_case("1", Timeframe::Minutes(1); "one minute")]
    #[test_case("60", Timeframe::Minutes(60); "sixty minutes")]
    #[test_case("W", Timeframe::Weekly; "weekly")]
    #[test_case("D", Timeframe::Daily; "daily")]
    #[test_case("2", Timeframe::Daily; "unsupported interval")]
    #[test_case("", Timeframe::Daily; "empty")]
    fn timeframe_parse(raw: &str, expected: Timeframe) {
        assert_eq!(Timeframe::parse(raw), expected);
    }

    #[test]
    fn client_request_defaults_timeframe() {
        let request: ClientRequest =
            serde_json::from_str(r#"{"type":"subscribe","symbol":"005930"}"#).unwrap();
        assert_eq!(
            request,
            ClientRequest::Subscribe {
                symbol: "005930".to_string(),
                timeframe: "D".to_string(),
            }
        );
    }

    #[test]
    fn client_request_rejects_unknown_type() {
        let result = serde_json::from_str::<ClientRequest>(r#"{"type":"order","symbol":"1"}"#);
        assert!(result.is_err());
    }

    #[test]
    fn outbound_messages_serialize_with_type_tag() {
        let tick = Tick {
            symbol: "005930".to_string(),
            price: 73400,
            open: 73000,
            high: 75000,
            low: 73000,
            volume: 1_234_567,
            change_rate: -0.81,
            timestamp: "090000".to_string(),
        };
        let value = serde_json::to_value(OutboundMessage::Tick { data: tick }).unwrap();
        assert_eq!(value["type"], "tick");
        assert_eq!(value["data"]["price"], 73400);

        let chart = OutboundMessage::chart(&Symbol::new("005930"), vec![]);
        let value = serde_json::to_value(chart).unwrap();
        assert_eq!(value["type"], "chart");
        assert_eq!(value["symbol"], "005930");
        assert_eq!(value["data"]["output"], json!([]));
    }

    proptest! {
        #[test]
        fn wire_code_is_idempotent(code in "[0-9A-Z]{1,8}") {
            let once = wire_code(&code);
            prop_assert_eq!(wire_code(&once), once.clone());
            prop_assert_eq!(canonical_code(&once), code.as_str());
        }

        #[test]
        fn clean_numeric_never_negative(raw in "[+\\-]?[0-9]{0,9}(\\.[0-9]{1,4})?") {
            prop_assert!(clean_numeric(&raw) >= 0.0);
        }
    }
}
