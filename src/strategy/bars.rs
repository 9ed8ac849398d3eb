//! Bar bookkeeping for the decision core
//!
//! The market-data collaborator supplies closed 1-minute bars and ticks;
//! 5-minute bars are rolled up locally so both timeframes stay consistent
//! with each other. Windows are bounded - the engine never holds a full
//! session of history beyond what the indicators need.

use chrono::{DateTime, Duration, DurationRound, Utc};

use crate::types::{Bar, Tick};

/// Bounded window of closed bars, oldest first
#[derive(Debug, Clone)]
pub struct BarSeries {
    capacity: usize,
    bars: Vec<Bar>,
}

impl BarSeries {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            bars: Vec::with_capacity(capacity),
        }
    }

    /// Append a closed bar; out-of-order bars are dropped
    pub fn push(&mut self, bar: Bar) {
        if let Some(last) = self.bars.last() {
            if bar.timestamp <= last.timestamp {
                return;
            }
        }
        self.bars.push(bar);
        if self.bars.len() > self.capacity {
            self.bars.remove(0);
        }
    }

    pub fn bars(&self) -> &[Bar] {
        &self.bars
    }

    pub fn len(&self) -> usize {
        self.bars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bars.is_empty()
    }

    pub fn last(&self) -> Option<&Bar> {
        self.bars.last()
    }
}

/// Simple moving average of closes ending `back` bars from the end of the
/// window. `back = 0` is the most recently closed bar.
pub fn sma_at(bars: &[Bar], period: usize, back: usize) -> Option<f64> {
    if period == 0 {
        return None;
    }
    let end = bars.len().checked_sub(back)?;
    let start = end.checked_sub(period)?;
    let sum: f64 = bars[start..end].iter().map(|b| b.close).sum();
    Some(sum / period as f64)
}

/// Average true range over the last `period` bars (simple mean)
pub fn average_true_range(bars: &[Bar], period: usize) -> Option<f64> {
    if period == 0 || bars.len() < period + 1 {
        return None;
    }
    let window = &bars[bars.len() - period - 1..];
    let mut prev_close = window[0].close;
    let mut sum_tr = 0.0;
    for bar in &window[1..] {
        sum_tr += bar.true_range(prev_close);
        prev_close = bar.close;
    }
    Some(sum_tr / period as f64)
}

/// True when the last `count` bars form an unbroken run of the given
/// spacing - a missing bar invalidates range detection.
pub fn is_contiguous(bars: &[Bar], count: usize, spacing: Duration) -> bool {
    if bars.len() < count {
        return false;
    }
    let window = &bars[bars.len() - count..];
    window
        .windows(2)
        .all(|pair| pair[1].timestamp - pair[0].timestamp == spacing)
}

/// Rolls closed 1-minute bars up into closed 5-minute bars
#[derive(Debug, Default)]
pub struct FiveMinuteRoller {
    bucket_start: Option<DateTime<Utc>>,
    open: f64,
    high: f64,
    low: f64,
    close: f64,
    volume: u64,
}

impl FiveMinuteRoller {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a closed minute bar; returns the completed 5-minute bar when a
    /// new bucket starts.
    pub fn push(&mut self, bar: &Bar) -> Option<Bar> {
        let bucket = bar
            .timestamp
            .duration_trunc(Duration::minutes(5))
            .expect("5-minute truncation cannot fail for minute bars");

        let completed = match self.bucket_start {
            Some(current) if bucket > current => Some(Bar {
                timestamp: current,
                open: self.open,
                high: self.high,
                low: self.low,
                close: self.close,
                volume: self.volume,
            }),
            _ => None,
        };

        if self.bucket_start != Some(bucket) {
            self.bucket_start = Some(bucket);
            self.open = bar.open;
            self.high = bar.high;
            self.low = bar.low;
            self.close = bar.close;
            self.volume = bar.volume;
        } else {
            self.high = self.high.max(bar.high);
            self.low = self.low.min(bar.low);
            self.close = bar.close;
            self.volume += bar.volume;
        }

        completed
    }
}

/// Builds closed 1-minute bars from a tick stream.
///
/// Used by hosts that only have a quote feed (the paper runner); a real
/// bar feed bypasses this and pushes bars directly.
#[derive(Debug, Default)]
pub struct TickBarAggregator {
    minute_start: Option<DateTime<Utc>>,
    open: f64,
    high: f64,
    low: f64,
    close: f64,
    ticks: u64,
}

impl TickBarAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Process a tick; returns the completed minute bar when a new minute
    /// starts. Uses mid prices; tick count stands in for volume.
    pub fn process_tick(&mut self, tick: &Tick) -> Option<Bar> {
        let minute = tick
            .timestamp
            .duration_trunc(Duration::minutes(1))
            .expect("minute truncation cannot fail");
        let mid = tick.mid();

        let completed = match self.minute_start {
            Some(current) if minute > current => Some(Bar {
                timestamp: current,
                open: self.open,
                high: self.high,
                low: self.low,
                close: self.close,
                volume: self.ticks,
            }),
            _ => None,
        };

        if self.minute_start != Some(minute) {
            self.minute_start = Some(minute);
            self.open = mid;
            self.high = mid;
            self.low = mid;
            self.close = mid;
            self.ticks = 1;
        } else {
            self.high = self.high.max(mid);
            self.low = self.low.min(mid);
            self.close = mid;
            self.ticks += 1;
        }

        completed
    }
}
