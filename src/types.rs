// Library crate shared types - market data primitives and instrument metadata

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Trade direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Direction {
    Long,
    Short,
}

impl Direction {
    pub fn is_buy(&self) -> bool {
        matches!(self, Direction::Long)
    }

    pub fn opposite(&self) -> Direction {
        match self {
            Direction::Long => Direction::Short,
            Direction::Short => Direction::Long,
        }
    }
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Direction::Long => write!(f, "LONG"),
            Direction::Short => write!(f, "SHORT"),
        }
    }
}

/// OHLCV bar on a fixed timeframe
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Bar {
    pub timestamp: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: u64,
}

impl Bar {
    /// Absolute candle body size
    pub fn body(&self) -> f64 {
        (self.close - self.open).abs()
    }

    /// Typical price used for VWAP accumulation
    pub fn typical_price(&self) -> f64 {
        (self.high + self.low + self.close) / 3.0
    }

    /// True range against the prior close
    pub fn true_range(&self, prev_close: f64) -> f64 {
        (self.high - self.low)
            .max((self.high - prev_close).abs())
            .max((self.low - prev_close).abs())
    }
}

/// Top-of-book quote
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Tick {
    pub timestamp: DateTime<Utc>,
    pub bid: f64,
    pub ask: f64,
}

impl Tick {
    pub fn mid(&self) -> f64 {
        (self.bid + self.ask) / 2.0
    }

    pub fn spread(&self) -> f64 {
        self.ask - self.bid
    }
}

/// Venue-reported contract specification for one instrument
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstrumentMeta {
    pub symbol: String,
    /// Price-step unit all pip-denominated config is expressed in
    pub pip_size: f64,
    /// Minimum venue price increment
    pub tick_size: f64,
    /// Account-currency value of one tick for one lot
    pub tick_value: f64,
    pub volume_min: f64,
    pub volume_max: f64,
    pub volume_step: f64,
}

impl InstrumentMeta {
    /// Account-currency value of one pip for one lot
    pub fn pip_value_per_lot(&self) -> f64 {
        self.tick_value / self.tick_size * self.pip_size
    }

    /// Convert a price distance to pips
    pub fn to_pips(&self, price_distance: f64) -> f64 {
        price_distance / self.pip_size
    }

    /// Convert pips to a price distance
    pub fn to_price(&self, pips: f64) -> f64 {
        pips * self.pip_size
    }
}

/// Read-only view of recent market data handed to the decision core.
///
/// The engine owns the underlying bar series; signal evaluation only ever
/// borrows them together with the latest quote.
#[derive(Debug, Clone, Copy)]
pub struct MarketSnapshot<'a> {
    /// Closed 1-minute bars, oldest first
    pub minute_bars: &'a [Bar],
    /// Closed 5-minute bars, oldest first
    pub five_minute_bars: &'a [Bar],
    /// Latest top-of-book quote
    pub tick: &'a Tick,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn bar(open: f64, high: f64, low: f64, close: f64) -> Bar {
        Bar {
            timestamp: Utc.with_ymd_and_hms(2025, 3, 10, 14, 0, 0).unwrap(),
            open,
            high,
            low,
            close,
            volume: 100,
        }
    }

    #[test]
    fn test_bar_body_and_typical() {
        let b = bar(2000.0, 2004.0, 1999.0, 2002.0);
        assert_eq!(b.body(), 2.0);
        assert!((b.typical_price() - 2001.6667).abs() < 1e-3);
    }

    #[test]
    fn test_true_range_uses_gap() {
        let b = bar(2000.0, 2001.0, 1999.5, 2000.5);
        // Prior close far below the bar: gap dominates the range
        assert_eq!(b.true_range(1995.0), 6.0);
    }

    #[test]
    fn test_pip_value_per_lot() {
        // Gold-style contract: tick 0.01 worth $0.10, pip 0.1
        let meta = InstrumentMeta {
            symbol: "XAUUSD".to_string(),
            pip_size: 0.1,
            tick_size: 0.01,
            tick_value: 0.1,
            volume_min: 0.01,
            volume_max: 50.0,
            volume_step: 0.01,
        };
        assert!((meta.pip_value_per_lot() - 1.0).abs() < 1e-9);
        assert_eq!(meta.to_pips(1.5), 15.0);
        assert_eq!(meta.to_price(20.0), 2.0);
    }
}
