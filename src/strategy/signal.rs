//! Directional bias, micro-range, VWAP gate and breakout trigger
//!
//! Each check is pure over the market snapshot and fails closed: when the
//! data needed for a check is not there yet the result is indeterminate
//! and no entry can pass, retried on the next update.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use super::bars::{is_contiguous, sma_at};
use crate::config::InstrumentConfig;
use crate::types::{Bar, Direction, InstrumentMeta, MarketSnapshot};

/// Directional opinion derived from the 5-minute timeframe
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Bias {
    Neutral,
    Long,
    Short,
}

impl Bias {
    pub fn direction(&self) -> Option<Direction> {
        match self {
            Bias::Long => Some(Direction::Long),
            Bias::Short => Some(Direction::Short),
            Bias::Neutral => None,
        }
    }
}

/// High/low envelope of the recent 1-minute consolidation
#[derive(Debug, Clone, Copy)]
pub struct RangeWindow {
    pub valid: bool,
    pub high: f64,
    pub low: f64,
    pub formed_at: DateTime<Utc>,
}

impl RangeWindow {
    pub fn invalid() -> Self {
        Self {
            valid: false,
            high: 0.0,
            low: 0.0,
            formed_at: DateTime::<Utc>::MIN_UTC,
        }
    }
}

/// A triggered breakout ready for sizing and submission
#[derive(Debug, Clone, Copy)]
pub struct BreakoutSignal {
    pub direction: Direction,
    pub entry_price: f64,
}

/// Recompute bias from the closed 5-minute series.
///
/// Long requires fast > slow AND close > fast AND close > slow; Short is
/// the mirror; anything else is Neutral. Returns `None` (indeterminate,
/// caller keeps the prior bias) while fewer than two bars of average data
/// are available.
pub fn update_bias(config: &InstrumentConfig, five_minute: &[Bar]) -> Option<Bias> {
    // Both averages must exist on the last two closed bars before the
    // crossover relationship is trusted at all.
    let fast = sma_at(five_minute, config.fast_ma_period, 0)?;
    let slow = sma_at(five_minute, config.slow_ma_period, 0)?;
    sma_at(five_minute, config.fast_ma_period, 1)?;
    sma_at(five_minute, config.slow_ma_period, 1)?;
    let close = five_minute.last()?.close;

    let bias = if fast > slow && close > fast && close > slow {
        Bias::Long
    } else if fast < slow && close < fast && close < slow {
        Bias::Short
    } else {
        Bias::Neutral
    };
    Some(bias)
}

/// Scan `range_bars` closed minute bars for a compression window.
///
/// The window ends one bar before the most recent close - that bar is the
/// breakout candidate and cannot belong to the envelope it has to escape.
/// Valid only when the run (window plus candidate) is gap-free and the
/// envelope width stays within the configured maximum.
pub fn detect_micro_range(
    config: &InstrumentConfig,
    meta: &InstrumentMeta,
    minute: &[Bar],
) -> RangeWindow {
    let count = config.range_bars;
    if minute.len() < count + 1 || !is_contiguous(minute, count + 1, chrono::Duration::minutes(1))
    {
        return RangeWindow::invalid();
    }

    let window = &minute[minute.len() - count - 1..minute.len() - 1];
    let high = window.iter().map(|b| b.high).fold(f64::MIN, f64::max);
    let low = window.iter().map(|b| b.low).fold(f64::MAX, f64::min);
    let width_pips = meta.to_pips(high - low);

    RangeWindow {
        valid: width_pips <= config.max_range_pips,
        high,
        low,
        formed_at: window[window.len() - 1].timestamp,
    }
}

/// Volume-weighted typical price accumulated since the start of the
/// current trading day.
#[derive(Debug, Default)]
pub struct SessionVwap {
    day: Option<NaiveDate>,
    sum_pv: f64,
    sum_volume: u64,
}

impl SessionVwap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Accumulate a closed minute bar
    pub fn on_bar(&mut self, bar: &Bar) {
        self.sum_pv += bar.typical_price() * bar.volume as f64;
        self.sum_volume += bar.volume;
    }

    /// Reset at day rollover; `day` tags the new trading day
    pub fn reset(&mut self, day: NaiveDate) {
        self.day = Some(day);
        self.sum_pv = 0.0;
        self.sum_volume = 0;
    }

    /// Current session VWAP; `None` until a bar with volume has accumulated
    pub fn value(&self) -> Option<f64> {
        if self.sum_volume == 0 {
            None
        } else {
            Some(self.sum_pv / self.sum_volume as f64)
        }
    }
}

/// VWAP-side check: the last close must sit within tolerance of VWAP on
/// the side consistent with the bias. Fails closed when no session VWAP
/// exists yet.
pub fn vwap_price_ok(
    config: &InstrumentConfig,
    meta: &InstrumentMeta,
    bias: Bias,
    vwap: Option<f64>,
    last_close: f64,
) -> bool {
    let Some(vwap) = vwap else {
        return false;
    };
    let tolerance = meta.to_price(config.vwap_tolerance_pips);
    match bias {
        Bias::Long => last_close >= vwap - tolerance,
        Bias::Short => last_close <= vwap + tolerance,
        Bias::Neutral => false,
    }
}

/// Breakout trigger against a valid micro-range.
///
/// The prior closed bar must clear the range edge by the configured buffer
/// without an oversized body (news-spike filter). The entry price is the
/// live ask/bid, not the breakout bar's close - slippage between signal
/// and execution is accepted.
pub fn evaluate_breakout(
    config: &InstrumentConfig,
    meta: &InstrumentMeta,
    direction: Direction,
    range: &RangeWindow,
    snapshot: &MarketSnapshot<'_>,
    atr: Option<f64>,
) -> Option<BreakoutSignal> {
    if !range.valid {
        return None;
    }
    let prior = snapshot.minute_bars.last()?;
    let atr = atr?;

    if prior.body() > config.max_body_atr_mult * atr {
        return None;
    }

    let buffer = meta.to_price(config.breakout_buffer_pips);
    let triggered = match direction {
        Direction::Long => prior.close > range.high + buffer,
        Direction::Short => prior.close < range.low - buffer,
    };
    if !triggered {
        return None;
    }

    let entry_price = if direction.is_buy() {
        snapshot.tick.ask
    } else {
        snapshot.tick.bid
    };
    Some(BreakoutSignal {
        direction,
        entry_price,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Tick;
    use chrono::TimeZone;

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

    fn config() -> InstrumentConfig {
        InstrumentConfig {
            fast_ma_period: 2,
            slow_ma_period: 3,
            range_bars: 3,
            max_range_pips: 20.0,
            breakout_buffer_pips: 2.0,
            max_body_atr_mult: 1.5,
            vwap_tolerance_pips: 10.0,
            ..Default::default()
        }
    }

    fn bar_at(minute: u32, open: f64, high: f64, low: f64, close: f64) -> Bar {
        Bar {
            timestamp: Utc.with_ymd_and_hms(2025, 3, 10, 14, minute, 0).unwrap(),
            open,
            high,
            low,
            close,
            volume: 100,
        }
    }

    fn bars_from_closes(closes: &[f64]) -> Vec<Bar> {
        closes
            .iter()
            .enumerate()
            .map(|(i, close)| bar_at(i as u32, *close, *close, *close, *close))
            .collect()
    }

    #[test]
    fn test_bias_long_requires_full_agreement() {
        let config = config();
        // Rising closes: fast(2) > slow(3), close above both
        let bars = bars_from_closes(&[2000.0, 2001.0, 2002.0, 2003.0]);
        assert_eq!(update_bias(&config, &bars), Some(Bias::Long));

        // Falling closes mirror to Short
        let bars = bars_from_closes(&[2003.0, 2002.0, 2001.0, 2000.0]);
        assert_eq!(update_bias(&config, &bars), Some(Bias::Short));
    }

    #[test]
    fn test_bias_neutral_on_disagreement() {
        let config = config();
        // Fast above slow but last close dipped below the fast average
        let bars = bars_from_closes(&[2000.0, 2001.0, 2003.0, 2001.5]);
        let fast = sma_at(&bars, 2, 0).unwrap();
        let slow = sma_at(&bars, 3, 0).unwrap();
        assert!(fast > slow);
        assert!(bars.last().unwrap().close < fast);
        assert_eq!(update_bias(&config, &bars), Some(Bias::Neutral));
    }

    #[test]
    fn test_bias_indeterminate_with_short_history() {
        let config = config();
        // Three bars: slow SMA exists for the last bar but not the prior one
        let bars = bars_from_closes(&[2000.0, 2001.0, 2002.0]);
        assert_eq!(update_bias(&config, &bars), None);
    }

    #[test]
    fn test_micro_range_excludes_breakout_candidate() {
        let config = config();
        let meta = meta();

        let mut bars: Vec<Bar> = (0..3)
            .map(|minute| bar_at(minute, 2000.0, 2000.8, 2000.0, 2000.5))
            .collect();
        // The envelope ends before the last close, so the candidate bar's
        // spike does not widen it.
        bars.push(bar_at(3, 2000.5, 2002.5, 2000.4, 2001.5));
        let range = detect_micro_range(&config, &meta, &bars);
        assert!(range.valid); // 8 pips wide
        assert_eq!(range.high, 2000.8);
        assert_eq!(range.low, 2000.0);

        // Once the spike bar rotates into the window the envelope is 25
        // pips and no longer a consolidation.
        bars.push(bar_at(4, 2000.0, 2001.0, 2000.0, 2000.5));
        let range = detect_micro_range(&config, &meta, &bars);
        assert!(!range.valid);
    }

    #[test]
    fn test_micro_range_invalidated_by_gap() {
        let config = config();
        let meta = meta();

        let bars = vec![
            bar_at(0, 2000.0, 2000.5, 2000.0, 2000.2),
            bar_at(1, 2000.0, 2000.5, 2000.0, 2000.2),
            bar_at(2, 2000.0, 2000.5, 2000.0, 2000.2),
            bar_at(5, 2000.0, 2000.5, 2000.0, 2000.2), // gap
        ];
        assert!(!detect_micro_range(&config, &meta, &bars).valid);
    }

    #[test]
    fn test_session_vwap_accumulates_and_resets() {
        let mut vwap = SessionVwap::new();
        assert_eq!(vwap.value(), None);

        vwap.on_bar(&bar_at(0, 2000.0, 2001.0, 1999.0, 2000.0)); // typical 2000
        vwap.on_bar(&bar_at(1, 2002.0, 2003.0, 2001.0, 2002.0)); // typical 2002
        assert!((vwap.value().unwrap() - 2001.0).abs() < 1e-9);

        vwap.reset(NaiveDate::from_ymd_opt(2025, 3, 11).unwrap());
        assert_eq!(vwap.value(), None);
    }

    #[test]
    fn test_vwap_side_check() {
        let config = config();
        let meta = meta();
        let vwap = Some(2000.0);

        // 10-pip tolerance = 1.0 in price
        assert!(vwap_price_ok(&config, &meta, Bias::Long, vwap, 1999.2));
        assert!(!vwap_price_ok(&config, &meta, Bias::Long, vwap, 1998.9));
        assert!(vwap_price_ok(&config, &meta, Bias::Short, vwap, 2000.9));
        assert!(!vwap_price_ok(&config, &meta, Bias::Short, vwap, 2001.2));
        assert!(!vwap_price_ok(&config, &meta, Bias::Long, None, 2000.0));
    }

    #[test]
    fn test_breakout_long_trigger_and_body_cap() {
        let config = config();
        let meta = meta();
        let tick = Tick {
            timestamp: Utc.with_ymd_and_hms(2025, 3, 10, 14, 10, 0).unwrap(),
            bid: 2001.5,
            ask: 2001.8,
        };
        let range = RangeWindow {
            valid: true,
            high: 2001.0,
            low: 2000.0,
            formed_at: tick.timestamp,
        };

        // Prior close 2001.3 clears high + 0.2 buffer; small body
        let bars = vec![bar_at(9, 2001.1, 2001.4, 2001.0, 2001.3)];
        let snapshot = MarketSnapshot {
            minute_bars: &bars,
            five_minute_bars: &[],
            tick: &tick,
        };

        let signal =
            evaluate_breakout(&config, &meta, Direction::Long, &range, &snapshot, Some(0.5))
                .unwrap();
        // Entry is the live ask, not the breakout close
        assert_eq!(signal.entry_price, 2001.8);

        // Same close on an oversized body is rejected
        let spike = vec![bar_at(9, 2000.0, 2001.4, 2000.0, 2001.3)];
        let snapshot = MarketSnapshot {
            minute_bars: &spike,
            five_minute_bars: &[],
            tick: &tick,
        };
        assert!(
            evaluate_breakout(&config, &meta, Direction::Long, &range, &snapshot, Some(0.5))
                .is_none()
        );
    }

    #[test]
    fn test_breakout_requires_buffer_clearance() {
        let config = config();
        let meta = meta();
        let tick = Tick {
            timestamp: Utc.with_ymd_and_hms(2025, 3, 10, 14, 10, 0).unwrap(),
            bid: 2001.0,
            ask: 2001.3,
        };
        let range = RangeWindow {
            valid: true,
            high: 2001.0,
            low: 2000.0,
            formed_at: tick.timestamp,
        };

        // Close above the high but inside the buffer: no trigger
        let bars = vec![bar_at(9, 2001.0, 2001.2, 2000.9, 2001.1)];
        let snapshot = MarketSnapshot {
            minute_bars: &bars,
            five_minute_bars: &[],
            tick: &tick,
        };
        assert!(
            evaluate_breakout(&config, &meta, Direction::Long, &range, &snapshot, Some(0.5))
                .is_none()
        );
    }
}
