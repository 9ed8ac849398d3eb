//! Tick-velocity burst gate
//!
//! Keeps a trailing window of tick timestamps and an exponentially smoothed
//! average of the window count. Entries require a burst materially above the
//! instrument's own recent baseline rather than any absolute tick rate, so
//! the gate self-calibrates across quiet and busy instruments.

use std::collections::VecDeque;

use chrono::{DateTime, Duration, Utc};

const SMOOTHING_ALPHA: f64 = 0.2;

#[derive(Debug)]
pub struct TickVelocity {
    window: Duration,
    burst_mult: f64,
    timestamps: VecDeque<DateTime<Utc>>,
    smoothed: f64,
}

impl TickVelocity {
    pub fn new(window_secs: i64, burst_mult: f64) -> Self {
        Self {
            window: Duration::seconds(window_secs),
            burst_mult,
            timestamps: VecDeque::new(),
            smoothed: 0.0,
        }
    }

    /// Record a tick and refresh the smoothed baseline
    pub fn on_tick(&mut self, now: DateTime<Utc>) {
        self.timestamps.push_back(now);
        self.prune(now);
        let current = self.timestamps.len() as f64;
        self.smoothed = (1.0 - SMOOTHING_ALPHA) * self.smoothed + SMOOTHING_ALPHA * current;
    }

    fn prune(&mut self, now: DateTime<Utc>) {
        let cutoff = now - self.window;
        while let Some(front) = self.timestamps.front() {
            if *front < cutoff {
                self.timestamps.pop_front();
            } else {
                break;
            }
        }
    }

    /// Current tick count inside the trailing window
    pub fn current_count(&self) -> usize {
        self.timestamps.len()
    }

    /// Smoothed window-count baseline
    pub fn average(&self) -> f64 {
        self.smoothed
    }

    /// Burst gate: baseline established and the current count clears the
    /// multiplier over it.
    pub fn is_bursting(&self) -> bool {
        self.smoothed >= 1.0 && self.current_count() as f64 > self.burst_mult * self.smoothed
    }
}
