//! Risk-budget position sizing
//!
//! Converts a stop distance and a risk percentage into a tradable lot.
//! The lot is always floored to the venue's volume step - rounding up
//! would misstate the risk actually taken.

use crate::types::InstrumentMeta;

/// Compute the lot for a trade risking `risk_percent` of `balance` over
/// `stop_pips`. Returns 0.0 (no trade) when the raw lot falls below the
/// venue minimum or the inputs are degenerate.
pub fn compute_lot(
    meta: &InstrumentMeta,
    stop_pips: f64,
    risk_percent: f64,
    balance: f64,
    max_lot_per_trade: f64,
) -> f64 {
    if stop_pips <= 0.0 || risk_percent <= 0.0 || balance <= 0.0 {
        return 0.0;
    }
    let pip_value = meta.pip_value_per_lot();
    if pip_value <= 0.0 || meta.volume_step <= 0.0 {
        return 0.0;
    }

    let risk_amount = balance * risk_percent / 100.0;
    let raw_lot = risk_amount / (stop_pips * pip_value);

    if raw_lot < meta.volume_min {
        return 0.0;
    }

    let stepped = floor_to_step(raw_lot, meta.volume_step);
    let ceiling = meta.volume_max.min(max_lot_per_trade);
    stepped.clamp(meta.volume_min, ceiling)
}

/// Floor a volume to the venue step.
///
/// The tiny epsilon keeps an exact multiple of the step (which rarely has
/// an exact binary representation) from flooring one step low.
pub fn floor_to_step(volume: f64, step: f64) -> f64 {
    if step <= 0.0 {
        return volume;
    }
    ((volume / step) + 1e-9).floor() * step
}

#[cfg(test)]
mod tests {
    use super::*;

    fn meta() -> InstrumentMeta {
        InstrumentMeta {
            symbol: "XAUUSD".to_string(),
            pip_size: 0.1,
            tick_size: 0.01,
            tick_value: 0.1, // $1.00 per pip per lot
            volume_min: 0.01,
            volume_max: 50.0,
            volume_step: 0.01,
        }
    }

    #[test]
    fn test_reference_sizing() {
        // 25,000 balance, 0.5% risk, 20-pip stop, $1/pip -> 6.25 lots
        let lot = compute_lot(&meta(), 20.0, 0.5, 25_000.0, 10.0);
        assert!((lot - 6.25).abs() < 1e-9);
    }

    #[test]
    fn test_lot_floored_to_step() {
        // 125 / (17 * 1.0) = 7.3529... -> 7.35
        let lot = compute_lot(&meta(), 17.0, 0.5, 25_000.0, 10.0);
        assert!((lot - 7.35).abs() < 1e-9);
        // Floored risk never exceeds the budget
        assert!(lot * 17.0 * meta().pip_value_per_lot() <= 125.0 + 1e-9);
    }

    #[test]
    fn test_lot_clamped_to_max() {
        let lot = compute_lot(&meta(), 20.0, 0.5, 25_000.0, 2.0);
        assert!((lot - 2.0).abs() < 1e-9);

        // Venue max below the per-trade cap wins
        let mut tight = meta();
        tight.volume_max = 1.5;
        let lot = compute_lot(&tight, 20.0, 0.5, 25_000.0, 2.0);
        assert!((lot - 1.5).abs() < 1e-9);
    }

    #[test]
    fn test_sub_minimum_yields_no_trade() {
        let mut chunky = meta();
        chunky.volume_min = 1.0;
        chunky.volume_step = 1.0;
        // Raw lot 0.625 is below the 1.0 minimum: no trade, not a round-up
        let lot = compute_lot(&chunky, 20.0, 0.05, 25_000.0, 10.0);
        assert_eq!(lot, 0.0);
    }

    #[test]
    fn test_degenerate_inputs() {
        assert_eq!(compute_lot(&meta(), 0.0, 0.5, 25_000.0, 10.0), 0.0);
        assert_eq!(compute_lot(&meta(), 20.0, 0.5, 0.0, 10.0), 0.0);
    }
}
