//! Stream Frame Codec
//!
//! Classifies upstream text frames by their `trnm` tag, builds the outbound
//! control frames, and normalizes market-data frames into [`Tick`]s.
//!
//! # Inbound Frames
//!
//! | `trnm`  | Meaning                    | Handling                    |
//! |---------|----------------------------|-----------------------------|
//! | `LOGIN` | login acknowledgment       | state transition            |
//! | `PING`  | keep-alive                 | echoed back verbatim        |
//! | `REG`   | registration acknowledgment| logged                      |
//! | other   | market data                | [`TickNormalizer::decode`]  |
//!
//! # Tick Shapes
//!
//! Structured:
//!
//! ```json
//! {"data": [{"item": "005930_AL", "values": {"10": "-73400", "12": "-0.81", "20": "090000"}}]}
//! ```
//!
//! Legacy flat records name each field with one of several aliases
//! (`cur_prc` / `stck_prpr` / `price`, ...); the first present alias wins.

use std::collections::BTreeSet;

use serde_json::{Value, json};
use thiserror::Error;

use crate::domain::streaming::{
    Tick, canonical_code, clean_value, first_present, market_clock, signed_value, to_whole,
    value_to_string,
};
use crate::domain::subscription::{RefreshMode, WireCode};

// =============================================================================
// Field Codes
// =============================================================================

/// Numeric field codes of the structured tick shape.
pub mod field {
    /// Last trade price.
    pub const PRICE: &str = "10";
    /// Change against the prior close.
    pub const PRIOR_DAY_DELTA: &str = "11";
    /// Percent change against the prior close.
    pub const CHANGE_RATE: &str = "12";
    /// Cumulative session volume.
    pub const VOLUME: &str = "13";
    /// Session open.
    pub const OPEN: &str = "16";
    /// Session high.
    pub const HIGH: &str = "17";
    /// Session low.
    pub const LOW: &str = "18";
    /// Trade time (`HHMMSS`).
    pub const TRADE_TIME: &str = "20";
}

const SYMBOL_ALIASES: &[&str] = &["stk_cd", "mksc_shrn_iscd", "item"];
const PRICE_ALIASES: &[&str] = &["cur_prc", "stck_prpr", "price"];
const OPEN_ALIASES: &[&str] = &["open_pric", "stck_oprc", "open"];
const HIGH_ALIASES: &[&str] = &["high_pric", "stck_hgpr", "high"];
const LOW_ALIASES: &[&str] = &["low_pric", "stck_lwpr", "low"];
const VOLUME_ALIASES: &[&str] = &["acc_trde_qty", "acml_vol", "volume"];
const CHANGE_ALIASES: &[&str] = &["fluc_rt", "prdy_ctrt"];
const TIME_ALIASES: &[&str] = &["cntr_tm", "stck_cntg_hour"];

// =============================================================================
// Error Types
// =============================================================================

/// Frame decoding errors.
#[derive(Debug, Error)]
pub enum CodecError {
    /// Not valid JSON.
    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),

    /// Valid JSON of the wrong shape.
    #[error("invalid frame: {0}")]
    InvalidFormat(String),
}

// =============================================================================
// Inbound Frames
// =============================================================================

/// A classified upstream frame.
#[derive(Debug, Clone, PartialEq)]
pub enum UpstreamFrame {
    /// Login acknowledgment.
    Login {
        /// `return_code`; `0` is success.
        code: i64,
        /// `return_msg`.
        message: String,
    },
    /// Keep-alive, carrying the raw text to echo.
    Ping(String),
    /// Registration acknowledgment.
    Registration {
        /// `return_code`.
        code: i64,
        /// `return_msg`.
        message: String,
    },
    /// Anything else: candidate market data.
    Data(Value),
}

/// Classify one text frame.
///
/// # Errors
///
/// Returns an error for invalid JSON or a non-object payload.
pub fn decode_frame(text: &str) -> Result<UpstreamFrame, CodecError> {
    let value: Value = serde_json::from_str(text)?;
    if !value.is_object() {
        return Err(CodecError::InvalidFormat("expected a JSON object".to_string()));
    }

    let frame = match value.get("trnm").and_then(Value::as_str) {
        Some("LOGIN") => UpstreamFrame::Login {
            code: return_code(&value),
            message: return_message(&value),
        },
        Some("PING") => UpstreamFrame::Ping(text.to_string()),
        Some("REG") => UpstreamFrame::Registration {
            code: return_code(&value),
            message: return_message(&value),
        },
        _ => UpstreamFrame::Data(value),
    };
    Ok(frame)
}

/// `return_code` as a number; it arrives either as a number or a string.
/// Missing or unparseable codes read as `-1`.
fn return_code(value: &Value) -> i64 {
    match value.get("return_code") {
        Some(Value::Number(n)) => n.as_i64().unwrap_or(-1),
        Some(Value::String(s)) => s.trim().parse().unwrap_or(-1),
        _ => -1,
    }
}

fn return_message(value: &Value) -> String {
    value
        .get("return_msg")
        .map(value_to_string)
        .unwrap_or_default()
}

// =============================================================================
// Outbound Frames
// =============================================================================

/// Login frame carrying the access token.
#[must_use]
pub fn login_frame(token: &str) -> String {
    json!({"trnm": "LOGIN", "token": token}).to_string()
}

/// Registration frame for `codes` on `channels`.
#[must_use]
pub fn registration_frame(
    group: &str,
    refresh: RefreshMode,
    codes: &BTreeSet<WireCode>,
    channels: &[String],
) -> String {
    json!({
        "trnm": "REG",
        "grp_no": group,
        "refresh": refresh.wire_flag(),
        "data": [{
            "item": codes,
            "type": channels,
        }],
    })
    .to_string()
}

// =============================================================================
// Tick Normalizer
// =============================================================================

/// Result of normalizing one market-data frame.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Normalized {
    /// Ticks with a positive price.
    pub ticks: Vec<Tick>,
    /// Records dropped for a non-positive price.
    pub discarded: usize,
}

/// Decodes both tick shapes into [`Tick`]s.
#[derive(Debug, Clone, Copy, Default)]
pub struct TickNormalizer;

impl TickNormalizer {
    /// Create a normalizer.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Normalize one market-data frame.
    ///
    /// A non-empty `data` array selects the structured shape (one tick per
    /// entry); anything else is tried as a single legacy record.
    #[must_use]
    pub fn decode(&self, frame: &Value) -> Normalized {
        let mut out = Normalized::default();

        if let Some(entries) = frame.get("data").and_then(Value::as_array)
            && !entries.is_empty()
        {
            for entry in entries {
                let Some(code) = entry.get("item").and_then(Value::as_str) else {
                    continue;
                };
                let Some(values) = entry.get("values").filter(|v| is_non_empty_object(v)) else {
                    continue;
                };
                match self.decode_structured(code, values) {
                    Some(tick) => out.ticks.push(tick),
                    None => out.discarded += 1,
                }
            }
            return out;
        }

        if first_present(frame, SYMBOL_ALIASES).is_some() {
            match self.decode_legacy(frame) {
                Some(tick) => out.ticks.push(tick),
                None => out.discarded += 1,
            }
        }
        out
    }

    /// Decode one structured entry. `None` when the price is not positive.
    #[must_use]
    pub fn decode_structured(&self, code: &str, values: &Value) -> Option<Tick> {
        let price = to_whole(clean_value(values.get(field::PRICE)));
        if price == 0 {
            tracing::trace!(code, "Structured entry without price");
            return None;
        }

        Some(Tick {
            symbol: canonical_code(code.trim()).to_string(),
            price,
            open: or_price(values.get(field::OPEN), price),
            high: or_price(values.get(field::HIGH), price),
            low: or_price(values.get(field::LOW), price),
            volume: to_whole(clean_value(values.get(field::VOLUME))),
            change_rate: signed_value(values.get(field::CHANGE_RATE)),
            timestamp: timestamp_or_now(values.get(field::TRADE_TIME)),
        })
    }

    /// Decode one legacy flat record. `None` without a symbol or a positive
    /// price.
    #[must_use]
    pub fn decode_legacy(&self, record: &Value) -> Option<Tick> {
        let symbol = first_present(record, SYMBOL_ALIASES).map(value_to_string)?;
        let price = to_whole(clean_value(first_present(record, PRICE_ALIASES)));
        if price == 0 {
            tracing::trace!(%symbol, "Legacy record without price");
            return None;
        }

        Some(Tick {
            symbol: canonical_code(&symbol).to_string(),
            price,
            open: or_price(first_present(record, OPEN_ALIASES), price),
            high: or_price(first_present(record, HIGH_ALIASES), price),
            low: or_price(first_present(record, LOW_ALIASES), price),
            volume: to_whole(clean_value(first_present(record, VOLUME_ALIASES))),
            change_rate: signed_value(first_present(record, CHANGE_ALIASES)),
            timestamp: timestamp_or_now(first_present(record, TIME_ALIASES)),
        })
    }
}

fn is_non_empty_object(value: &Value) -> bool {
    value.as_object().is_some_and(|map| !map.is_empty())
}

/// Cleaned whole value, falling back to `price` when absent or zero.
fn or_price(value: Option<&Value>, price: u64) -> u64 {
    match to_whole(clean_value(value)) {
        0 => price,
        v => v,
    }
}

fn timestamp_or_now(value: Option<&Value>) -> String {
    value
        .map(value_to_string)
        .filter(|s| !s.is_empty())
        .unwrap_or_else(market_clock)
}

#[cfg(test)]
mod tests {
    use test_case::test_case;

    use super::*;

    #[test]
    fn classifies_control_frames() {
        assert_eq!(
            decode_frame(r#"{"trnm":"LOGIN","return_code":0,"return_msg":"ok"}"#).unwrap(),
            UpstreamFrame::Login {
                code: 0,
                message: "ok".to_string()
            }
        );
        assert_eq!(
            decode_frame(r#"{"trnm":"LOGIN","return_code":"8005","return_msg":"expired"}"#)
                .unwrap(),
            UpstreamFrame::Login {
                code: 8005,
                message: "expired".to_string()
            }
        );

        let ping = r#"{"trnm":"PING","seq":7}"#;
        assert_eq!(
            decode_frame(ping).unwrap(),
            UpstreamFrame::Ping(ping.to_string())
        );

        assert!(matches!(
            decode_frame(r#"{"trnm":"REG","return_code":0}"#).unwrap(),
            UpstreamFrame::Registration { code: 0, .. }
        ));
        assert!(matches!(
            decode_frame(r#"{"trnm":"REAL","data":[]}"#).unwrap(),
            UpstreamFrame::Data(_)
        ));
    }

    #[test]
    fn rejects_malformed_frames() {
        assert!(matches!(decode_frame("{not json"), Err(CodecError::Json(_))));
        assert!(matches!(
            decode_frame("[1,2]"),
            Err(CodecError::InvalidFormat(_))
        ));
    }

    #[test]
    fn login_ack_without_code_is_failure() {
        assert!(matches!(
            decode_frame(r#"{"trnm":"LOGIN"}"#).unwrap(),
            UpstreamFrame::Login { code: -1, .. }
        ));
    }

    #[test]
    fn registration_frame_shape() {
        let codes: BTreeSet<WireCode> = ["005930_AL".to_string(), "000660_AL".to_string()]
            .into_iter()
            .collect();
        let frame = registration_frame(
            "1",
            RefreshMode::Additive,
            &codes,
            &["00".to_string(), "0B".to_string()],
        );
        let value: Value = serde_json::from_str(&frame).unwrap();
        assert_eq!(
            value,
            json!({
                "trnm": "REG",
                "grp_no": "1",
                "refresh": "1",
                "data": [{"item": ["000660_AL", "005930_AL"], "type": ["00", "0B"]}]
            })
        );
    }

    #[test]
    fn login_frame_shape() {
        let value: Value = serde_json::from_str(&login_frame("tok")).unwrap();
        assert_eq!(value, json!({"trnm": "LOGIN", "token": "tok"}));
    }

    #[test]
    fn structured_frame_yields_tick_per_entry() {
        let frame = json!({
            "trnm": "REAL",
            "data": [
                {"item": "005930_AL", "values": {
                    "10": "-73400", "11": "-600", "12": "-0.81", "13": "1234567",
                    "16": "-73000", "17": "+75000", "18": "-73000", "20": "090000"
                }},
                {"item": "000660_AL", "values": {"10": "+201000", "20": "090001"}}
            ]
        });

        let out = TickNormalizer::new().decode(&frame);
        assert_eq!(out.discarded, 0);
        assert_eq!(
            out.ticks[0],
            Tick {
                symbol: "005930".to_string(),
                price: 73400,
                open: 73000,
                high: 75000,
                low: 73000,
                volume: 1_234_567,
                change_rate: -0.81,
                timestamp: "090000".to_string(),
            }
        );
        assert_eq!(out.ticks[1].symbol, "000660");
        assert_eq!(out.ticks[1].open, 201_000);
        assert_eq!(out.ticks[1].low, 201_000);
    }

    #[test]
    fn non_positive_price_is_discarded() {
        let frame = json!({"data": [{"item": "005930_AL", "values": {"10": "0"}}]});
        let out = TickNormalizer::new().decode(&frame);
        assert!(out.ticks.is_empty());
        assert_eq!(out.discarded, 1);

        let legacy = json!({"stk_cd": "005930", "cur_prc": ""});
        let out = TickNormalizer::new().decode(&legacy);
        assert!(out.ticks.is_empty());
    }

    #[test]
    fn entries_without_values_are_skipped() {
        let frame = json!({"data": [{"item": "005930_AL", "values": {}}, {"values": {"10": "1"}}]});
        assert_eq!(TickNormalizer::new().decode(&frame), Normalized::default());
    }

    #[test]
    fn missing_timestamp_defaults_to_market_clock() {
        let frame = json!({"data": [{"item": "005930_AL", "values": {"10": "100"}}]});
        let tick = &TickNormalizer::new().decode(&frame).ticks[0];
        assert_eq!(tick.timestamp.len(), 6);
        assert!(tick.timestamp.chars().all(|c| c.is_ascii_digit()));
    }

    #[test_case(json!({"stk_cd": "005930_AL", "cur_prc": "+73400", "open_pric": "73000", "high_pric": "75000", "low_pric": "72000", "acc_trde_qty": "10", "fluc_rt": "+1.5", "cntr_tm": "091500"}); "kiwoom aliases")]
    #[test_case(json!({"mksc_shrn_iscd": "005930", "stck_prpr": "73400", "stck_oprc": "73000", "stck_hgpr": "75000", "stck_lwpr": "72000", "acml_vol": "10", "prdy_ctrt": "1.5", "stck_cntg_hour": "091500"}); "kis aliases")]
    #[test_case(json!({"item": "005930", "price": 73400, "open": 73000, "high": 75000, "low": 72000, "volume": 10, "fluc_rt": 1.5, "cntr_tm": "091500"}); "plain aliases")]
    fn legacy_aliases_normalize_identically(record: Value) {
        let tick = TickNormalizer::new().decode_legacy(&record).unwrap();
        assert_eq!(
            tick,
            Tick {
                symbol: "005930".to_string(),
                price: 73400,
                open: 73000,
                high: 75000,
                low: 72000,
                volume: 10,
                change_rate: 1.5,
                timestamp: "091500".to_string(),
            }
        );
    }

    #[test]
    fn legacy_without_symbol_is_ignored() {
        let out = TickNormalizer::new().decode(&json!({"cur_prc": "100"}));
        assert_eq!(out, Normalized::default());
    }
}
