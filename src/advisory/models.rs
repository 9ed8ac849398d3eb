//! Advisory wire contract
//!
//! The override service speaks a small JSON contract. Parsing is total:
//! recognized fields are extracted with per-field fallbacks, unknown
//! fields are ignored, and only a body that is not a JSON object counts
//! as a failed refresh.

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;

pub const DEFAULT_RISK_MULTIPLIER: f64 = 1.0;

/// Outbound payload carrying current account status
#[derive(Debug, Clone, Serialize)]
pub struct AdvisoryRequest {
    pub equity: f64,
    pub daily_pnl: f64,
    pub dd: f64,
}

/// Cached view of the last successful advisory response.
///
/// Stale values are reused between refreshes and across failures.
#[derive(Debug, Clone)]
pub struct AdvisoryState {
    pub pause: bool,
    pub risk_multiplier: f64,
    pub regime: String,
    pub last_update: Option<DateTime<Utc>>,
}

impl Default for AdvisoryState {
    fn default() -> Self {
        Self {
            pause: false,
            risk_multiplier: DEFAULT_RISK_MULTIPLIER,
            regime: "unknown".to_string(),
            last_update: None,
        }
    }
}

/// Extract the recognized fields from a response body.
///
/// Returns `None` when the body is not a JSON object - the caller treats
/// that as a failed refresh and keeps its cache.
pub fn parse_response(body: &str) -> Option<(bool, f64, String)> {
    let value: Value = serde_json::from_str(body).ok()?;
    let object = value.as_object()?;

    let pause = object
        .get("pause_trading")
        .and_then(Value::as_bool)
        .unwrap_or(false);
    let risk_multiplier = object
        .get("risk_multiplier")
        .and_then(Value::as_f64)
        .unwrap_or(DEFAULT_RISK_MULTIPLIER);
    let regime = object
        .get("regime")
        .and_then(Value::as_str)
        .unwrap_or("unknown")
        .to_string();

    Some((pause, risk_multiplier, regime))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_full_response() {
        let body = r#"{"regime":"trending","pause_trading":true,"risk_multiplier":0.5}"#;
        let (pause, mult, regime) = parse_response(body).unwrap();
        assert!(pause);
        assert_eq!(mult, 0.5);
        assert_eq!(regime, "trending");
    }

    #[test]
    fn test_absent_and_mistyped_fields_default() {
        // pause_trading as a string and risk_multiplier missing entirely
        let body = r#"{"regime":"choppy","pause_trading":"yes","extra_field":42}"#;
        let (pause, mult, regime) = parse_response(body).unwrap();
        assert!(!pause);
        assert_eq!(mult, DEFAULT_RISK_MULTIPLIER);
        assert_eq!(regime, "choppy");
    }

    #[test]
    fn test_malformed_body_is_a_failed_refresh() {
        assert!(parse_response("regime=trending").is_none());
        assert!(parse_response("[1,2,3]").is_none());
        assert!(parse_response("").is_none());
    }

    #[test]
    fn test_request_serialization() {
        let request = AdvisoryRequest {
            equity: 25_000.0,
            daily_pnl: -120.5,
            dd: -0.48,
        };
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["equity"], 25_000.0);
        assert_eq!(json["daily_pnl"], -120.5);
        assert_eq!(json["dd"], -0.48);
    }
}
