//! Structural stop and R-multiple target computation
//!
//! The protective level anchors to the micro-range edge opposite the
//! breakout, never to a fixed pip count; targets are pure R-multiples of
//! whatever stop distance that produces.

use super::signal::RangeWindow;
use crate::config::InstrumentConfig;
use crate::types::{Direction, InstrumentMeta};

/// Price levels derived for one trade at entry time
#[derive(Debug, Clone, Copy)]
pub struct StopPlan {
    pub stop_price: f64,
    pub stop_pips: f64,
    pub tp1: f64,
    pub tp2: f64,
    /// Virtual-stop destination after the first partial exit
    pub break_even: f64,
}

/// Compute the stop plan for an entry against the broken range.
///
/// The stop distance is clamped upward to `min_sl_pips`; a distance beyond
/// `max_sl_pips` rejects the trade entirely (`None`) - widening the
/// configured risk envelope is never an option.
pub fn compute_stop(
    config: &InstrumentConfig,
    meta: &InstrumentMeta,
    direction: Direction,
    entry_price: f64,
    range: &RangeWindow,
    tp1_r: f64,
    tp2_r: f64,
    break_even_buffer_pips: f64,
) -> Option<StopPlan> {
    if !range.valid {
        return None;
    }

    let buffer = meta.to_price(config.stop_buffer_pips);
    let raw_stop = match direction {
        Direction::Long => range.low - buffer,
        Direction::Short => range.high + buffer,
    };

    let raw_pips = meta.to_pips((entry_price - raw_stop).abs());
    if raw_pips > config.max_sl_pips {
        return None;
    }
    let stop_pips = raw_pips.max(config.min_sl_pips);
    let stop_distance = meta.to_price(stop_pips);
    let be_offset = meta.to_price(break_even_buffer_pips);

    let plan = match direction {
        Direction::Long => StopPlan {
            stop_price: entry_price - stop_distance,
            stop_pips,
            tp1: entry_price + stop_distance * tp1_r,
            tp2: entry_price + stop_distance * tp2_r,
            break_even: entry_price + be_offset,
        },
        Direction::Short => StopPlan {
            stop_price: entry_price + stop_distance,
            stop_pips,
            tp1: entry_price - stop_distance * tp1_r,
            tp2: entry_price - stop_distance * tp2_r,
            break_even: entry_price - be_offset,
        },
    };
    Some(plan)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn meta() -> InstrumentMeta {
        InstrumentMeta {
            symbol: "XAUUSD".to_string(),
            pip_size: 0.1,
            tick_size: 0.01,
            tick_value: 0.1,
            volume_min: 0.01,
            volume_max: 50.0,
            volume_step: 0.01,
        }
    }

    fn range(high: f64, low: f64) -> RangeWindow {
        RangeWindow {
            valid: true,
            high,
            low,
            formed_at: Utc.with_ymd_and_hms(2025, 3, 10, 14, 0, 0).unwrap(),
        }
    }

    fn config() -> InstrumentConfig {
        InstrumentConfig {
            stop_buffer_pips: 2.0,
            min_sl_pips: 10.0,
            max_sl_pips: 35.0,
            ..Default::default()
        }
    }

    #[test]
    fn test_long_reference_levels() {
        // Range low 1998.70, buffer 0.2 -> stop 1998.50, 15 pips below entry
        let plan = compute_stop(
            &config(),
            &meta(),
            Direction::Long,
            2000.0,
            &range(1999.8, 1998.7),
            2.0,
            3.0,
            2.0,
        )
        .unwrap();

        assert!((plan.stop_price - 1998.5).abs() < 1e-9);
        assert!((plan.stop_pips - 15.0).abs() < 1e-9);
        assert!((plan.tp1 - 2003.0).abs() < 1e-9);
        assert!((plan.tp2 - 2004.5).abs() < 1e-9);
        assert!((plan.break_even - 2000.2).abs() < 1e-9);
    }

    #[test]
    fn test_short_mirror() {
        let plan = compute_stop(
            &config(),
            &meta(),
            Direction::Short,
            2000.0,
            &range(2001.3, 2000.5),
            2.0,
            3.0,
            2.0,
        )
        .unwrap();

        // Stop above the range high: 2001.3 + 0.2 = 2001.5, 15 pips
        assert!((plan.stop_price - 2001.5).abs() < 1e-9);
        assert!((plan.tp1 - 1997.0).abs() < 1e-9);
        assert!((plan.break_even - 1999.8).abs() < 1e-9);
    }

    #[test]
    fn test_tight_stop_raised_to_minimum() {
        // Structural stop only 5 pips away -> raised to the 10-pip floor
        let plan = compute_stop(
            &config(),
            &meta(),
            Direction::Long,
            2000.0,
            &range(1999.9, 1999.7),
            2.0,
            3.0,
            2.0,
        )
        .unwrap();

        assert!((plan.stop_pips - 10.0).abs() < 1e-9);
        assert!((plan.stop_price - 1999.0).abs() < 1e-9);
    }

    #[test]
    fn test_wide_stop_rejected() {
        // Structural stop 52 pips away exceeds the 35-pip cap: no trade
        let plan = compute_stop(
            &config(),
            &meta(),
            Direction::Long,
            2000.0,
            &range(1999.0, 1995.0),
            2.0,
            3.0,
            2.0,
        );
        assert!(plan.is_none());
    }

    #[test]
    fn test_invalid_range_rejected() {
        let plan = compute_stop(
            &config(),
            &meta(),
            Direction::Long,
            2000.0,
            &RangeWindow::invalid(),
            2.0,
            3.0,
            2.0,
        );
        assert!(plan.is_none());
    }
}
