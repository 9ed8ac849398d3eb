//! Per-instrument state bundle
//!
//! Everything one instrument needs between updates: configuration, venue
//! metadata, bar windows on both timeframes, session VWAP, the velocity
//! gate, cached bias and the lifecycle controller. Nothing in here is
//! shared across instruments.

use chrono::NaiveDate;

use super::bars::{BarSeries, FiveMinuteRoller};
use super::lifecycle::TradeLifecycleController;
use super::signal::{update_bias, Bias, SessionVwap};
use super::velocity::TickVelocity;
use crate::config::InstrumentConfig;
use crate::types::{Bar, InstrumentMeta, MarketSnapshot, Tick};

/// Window sizes leave headroom over the largest indicator lookback
const MINUTE_WINDOW: usize = 64;
const FIVE_MINUTE_WINDOW: usize = 64;

pub struct InstrumentContext {
    pub config: InstrumentConfig,
    pub meta: InstrumentMeta,
    pub minute_bars: BarSeries,
    pub five_minute_bars: BarSeries,
    pub roller: FiveMinuteRoller,
    pub vwap: SessionVwap,
    pub velocity: TickVelocity,
    pub bias: Bias,
    pub lifecycle: TradeLifecycleController,
    pub last_tick: Option<Tick>,
    /// Set when a position fully closed during the current update; entry
    /// evaluation defers to the next update.
    pub closed_this_cycle: bool,
}

impl InstrumentContext {
    pub fn new(config: InstrumentConfig, meta: InstrumentMeta) -> Self {
        let velocity = TickVelocity::new(config.tick_window_secs, config.tick_burst_mult);
        Self {
            config,
            meta,
            minute_bars: BarSeries::new(MINUTE_WINDOW),
            five_minute_bars: BarSeries::new(FIVE_MINUTE_WINDOW),
            roller: FiveMinuteRoller::new(),
            vwap: SessionVwap::new(),
            velocity,
            bias: Bias::Neutral,
            lifecycle: TradeLifecycleController::new(),
            last_tick: None,
            closed_this_cycle: false,
        }
    }

    /// Ingest a closed 1-minute bar: window push, VWAP accumulation,
    /// 5-minute roll-up and a bias refresh when a 5-minute bar completes.
    /// An indeterminate bias leaves the previous one standing.
    pub fn on_minute_bar(&mut self, bar: Bar) {
        self.vwap.on_bar(&bar);
        if let Some(five) = self.roller.push(&bar) {
            self.five_minute_bars.push(five);
            if let Some(bias) = update_bias(&self.config, self.five_minute_bars.bars()) {
                self.bias = bias;
            }
        }
        self.minute_bars.push(bar);
    }

    /// Read-only view over the current windows and quote
    pub fn snapshot<'a>(&'a self, tick: &'a Tick) -> MarketSnapshot<'a> {
        MarketSnapshot {
            minute_bars: self.minute_bars.bars(),
            five_minute_bars: self.five_minute_bars.bars(),
            tick,
        }
    }

    /// Seed indicator history at startup, oldest first. Only bars on the
    /// current trading day (at or after `day_start`) count toward VWAP.
    pub fn warmup(
        &mut self,
        minute_bars: Vec<Bar>,
        five_minute_bars: Vec<Bar>,
        day_start: chrono::DateTime<chrono::Utc>,
    ) {
        for bar in five_minute_bars {
            self.five_minute_bars.push(bar);
        }
        if let Some(bias) = update_bias(&self.config, self.five_minute_bars.bars()) {
            self.bias = bias;
        }
        for bar in minute_bars {
            if bar.timestamp >= day_start {
                self.vwap.on_bar(&bar);
            }
            self.minute_bars.push(bar);
        }
    }

    /// Day rollover: the session VWAP starts over
    pub fn on_day_rollover(&mut self, day: NaiveDate) {
        self.vwap.reset(day);
    }
}
