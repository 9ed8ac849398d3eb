//! Engine and per-instrument configuration
//!
//! All price-denominated gates are expressed in pips (instrument-normalized
//! price-step units); conversion to prices happens against the venue's
//! `InstrumentMeta` at evaluation time.

use anyhow::{bail, Context, Result};
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, TimeZone, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// A named intraday trading window in exchange-local time
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionWindow {
    pub label: String,
    pub start_hour: u32,
    pub start_minute: u32,
    pub end_hour: u32,
    pub end_minute: u32,
}

impl SessionWindow {
    /// Check if a local wall-clock time falls inside the window
    pub fn contains(&self, hour: u32, minute: u32) -> bool {
        let current = hour * 60 + minute;
        let start = self.start_hour * 60 + self.start_minute;
        let end = self.end_hour * 60 + self.end_minute;
        current >= start && current < end
    }
}

/// External advisory (override service) settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdvisoryConfig {
    pub enabled: bool,
    pub url: String,
    /// Minimum spacing between outbound refreshes
    pub interval_secs: u64,
    /// Per-request timeout; a slow advisory must never stall the tick path
    pub timeout_secs: u64,
    /// Risk multiplier clamp band applied to advisory responses
    pub mult_floor: f64,
    pub mult_ceiling: f64,
}

impl Default for AdvisoryConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            url: String::new(),
            interval_secs: 900,
            timeout_secs: 5,
            mult_floor: 0.25,
            mult_ceiling: 0.75,
        }
    }
}

/// Per-instrument strategy parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstrumentConfig {
    pub symbol: String,
    pub enabled: bool,

    /// Fast SMA period over closed 5-minute closes
    pub fast_ma_period: usize,
    /// Slow SMA period over closed 5-minute closes
    pub slow_ma_period: usize,
    /// ATR period over closed 1-minute bars
    pub atr_period: usize,

    /// 1-minute bars in the micro-range lookback
    pub range_bars: usize,
    /// Maximum micro-range width for a valid consolidation
    pub max_range_pips: f64,
    /// Excess beyond the range edge required for a breakout
    pub breakout_buffer_pips: f64,
    /// Breakout bar body cap as a multiple of ATR
    pub max_body_atr_mult: f64,
    /// Offset beyond the far range edge for the structural stop
    pub stop_buffer_pips: f64,

    /// VWAP distance tolerance for the bias-side check
    pub vwap_tolerance_pips: f64,

    pub min_sl_pips: f64,
    pub max_sl_pips: f64,
    pub max_spread_pips: f64,

    /// Trailing tick-count window for the velocity gate
    pub tick_window_secs: i64,
    /// Burst multiplier over the smoothed tick-count baseline
    pub tick_burst_mult: f64,

    /// Minimum spacing since this instrument's own last entry
    pub cooldown_secs: i64,
}

impl Default for InstrumentConfig {
    fn default() -> Self {
        Self {
            symbol: "XAUUSD".to_string(),
            enabled: true,
            fast_ma_period: 9,
            slow_ma_period: 21,
            atr_period: 14,
            range_bars: 6,
            max_range_pips: 40.0,
            breakout_buffer_pips: 3.0,
            max_body_atr_mult: 1.5,
            stop_buffer_pips: 2.0,
            vwap_tolerance_pips: 25.0,
            min_sl_pips: 10.0,
            max_sl_pips: 35.0,
            max_spread_pips: 4.5,
            tick_window_secs: 10,
            tick_burst_mult: 1.5,
            cooldown_secs: 300,
        }
    }
}

impl InstrumentConfig {
    /// Validate parameters; a failing instrument is disabled, not fatal
    pub fn validate(&self) -> Result<()> {
        if self.fast_ma_period == 0 || self.slow_ma_period == 0 {
            bail!("{}: moving-average periods must be non-zero", self.symbol);
        }
        if self.fast_ma_period >= self.slow_ma_period {
            bail!(
                "{}: fast MA period ({}) must be below slow ({})",
                self.symbol,
                self.fast_ma_period,
                self.slow_ma_period
            );
        }
        if self.range_bars < 2 {
            bail!("{}: micro-range needs at least 2 bars", self.symbol);
        }
        if self.min_sl_pips <= 0.0 || self.max_sl_pips < self.min_sl_pips {
            bail!(
                "{}: stop bounds invalid ({} / {})",
                self.symbol,
                self.min_sl_pips,
                self.max_sl_pips
            );
        }
        if self.tick_window_secs <= 0 || self.tick_burst_mult <= 0.0 {
            bail!("{}: tick velocity parameters invalid", self.symbol);
        }
        Ok(())
    }
}

/// Top-level engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Per-trade risk as percent of balance
    pub risk_percent: f64,
    /// First target as an R-multiple of the stop distance
    pub tp1_r: f64,
    /// Second (full-exit) target as an R-multiple
    pub tp2_r: f64,
    /// Offset beyond entry for the post-partial break-even stop
    pub break_even_buffer_pips: f64,
    /// Maximum position age before the time stop fires
    pub max_hold_secs: i64,
    /// Unrealized loss (percent of balance) forcing an emergency close
    pub emergency_loss_percent: f64,

    pub daily_loss_percent: f64,
    pub total_loss_percent: f64,
    /// Equity gain over start equity that stops trading for the session
    pub target_profit_percent: f64,
    pub max_consecutive_losses: u32,
    /// Minimum spacing since any instrument's last entry
    pub global_cooldown_secs: i64,
    pub max_lot_per_trade: f64,
    /// Maximum acceptable fill deviation, passed through to the venue
    pub max_slippage_pips: f64,

    /// Timezone the session windows are expressed in
    pub session_timezone: String,
    pub sessions: Vec<SessionWindow>,
    /// `"YYYY.MM.DD HH:MM-HH:MM;..."` in the session timezone
    pub news_blackouts: String,

    pub advisory: AdvisoryConfig,
    /// Risk-state snapshot file; `None` disables persistence
    pub snapshot_path: Option<PathBuf>,
    /// Cadence of the one-line status log
    pub status_interval_secs: i64,

    pub instruments: Vec<InstrumentConfig>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            risk_percent: 0.5,
            tp1_r: 2.0,
            tp2_r: 3.0,
            break_even_buffer_pips: 2.0,
            max_hold_secs: 1800,
            emergency_loss_percent: 2.0,
            daily_loss_percent: 4.0,
            total_loss_percent: 8.0,
            target_profit_percent: 8.0,
            max_consecutive_losses: 3,
            global_cooldown_secs: 120,
            max_lot_per_trade: 5.0,
            max_slippage_pips: 3.0,
            session_timezone: "America/New_York".to_string(),
            sessions: vec![
                SessionWindow {
                    label: "london".to_string(),
                    start_hour: 3,
                    start_minute: 0,
                    end_hour: 6,
                    end_minute: 30,
                },
                SessionWindow {
                    label: "newyork".to_string(),
                    start_hour: 9,
                    start_minute: 30,
                    end_hour: 12,
                    end_minute: 0,
                },
            ],
            news_blackouts: String::new(),
            advisory: AdvisoryConfig::default(),
            snapshot_path: None,
            status_interval_secs: 300,
            instruments: vec![InstrumentConfig::default()],
        }
    }
}

impl EngineConfig {
    /// Load configuration from a JSON file
    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        let config: EngineConfig = serde_json::from_str(&raw)
            .with_context(|| format!("Failed to parse config file {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    /// Validate engine-level parameters (instrument failures are per-instrument)
    pub fn validate(&self) -> Result<()> {
        if self.risk_percent <= 0.0 {
            bail!("risk_percent must be positive");
        }
        if self.tp1_r <= 0.0 || self.tp2_r <= self.tp1_r {
            bail!("targets must satisfy 0 < tp1_r < tp2_r");
        }
        if self.daily_loss_percent <= 0.0 || self.total_loss_percent <= 0.0 {
            bail!("loss limits must be positive");
        }
        self.timezone()?;
        Ok(())
    }

    pub fn timezone(&self) -> Result<Tz> {
        self.session_timezone
            .parse::<Tz>()
            .map_err(|e| anyhow::anyhow!("Unknown session timezone {}: {}", self.session_timezone, e))
    }

    /// Preset mirroring a typical 50K funded-account rule set
    pub fn funded_50k() -> Self {
        Self {
            daily_loss_percent: 4.0,
            total_loss_percent: 8.0,
            target_profit_percent: 8.0,
            max_consecutive_losses: 3,
            ..Default::default()
        }
    }

    /// Parse the news-blackout string into UTC intervals.
    ///
    /// Format: `"YYYY.MM.DD HH:MM-HH:MM"` entries separated by `;`, times in
    /// the session timezone. Malformed entries are rejected wholesale so a
    /// typo cannot silently drop a blackout.
    pub fn parse_news_blackouts(&self) -> Result<Vec<(DateTime<Utc>, DateTime<Utc>)>> {
        let tz = self.timezone()?;
        let mut intervals = Vec::new();

        for entry in self.news_blackouts.split(';') {
            let entry = entry.trim();
            if entry.is_empty() {
                continue;
            }

            let (date_part, times_part) = entry
                .split_once(' ')
                .with_context(|| format!("Blackout entry missing time range: '{}'", entry))?;
            let (start_part, end_part) = times_part
                .split_once('-')
                .with_context(|| format!("Blackout entry missing '-': '{}'", entry))?;

            let date = NaiveDate::parse_from_str(date_part, "%Y.%m.%d")
                .with_context(|| format!("Bad blackout date '{}'", date_part))?;
            let start_time = NaiveTime::parse_from_str(start_part.trim(), "%H:%M")
                .with_context(|| format!("Bad blackout start '{}'", start_part))?;
            let end_time = NaiveTime::parse_from_str(end_part.trim(), "%H:%M")
                .with_context(|| format!("Bad blackout end '{}'", end_part))?;

            if end_time <= start_time {
                bail!("Blackout end before start: '{}'", entry);
            }

            let start = local_to_utc(&tz, NaiveDateTime::new(date, start_time))?;
            let end = local_to_utc(&tz, NaiveDateTime::new(date, end_time))?;
            intervals.push((start, end));
        }

        intervals.sort_by_key(|(start, _)| *start);
        for pair in intervals.windows(2) {
            if pair[1].0 < pair[0].1 {
                bail!("Blackout intervals overlap");
            }
        }

        Ok(intervals)
    }
}

fn local_to_utc(tz: &Tz, naive: NaiveDateTime) -> Result<DateTime<Utc>> {
    tz.from_local_datetime(&naive)
        .earliest()
        .map(|dt| dt.with_timezone(&Utc))
        .with_context(|| format!("Nonexistent local time {}", naive))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_session_window() {
        let window = SessionWindow {
            label: "newyork".to_string(),
            start_hour: 9,
            start_minute: 30,
            end_hour: 12,
            end_minute: 0,
        };

        assert!(!window.contains(9, 29));
        assert!(window.contains(9, 30));
        assert!(window.contains(11, 59));
        assert!(!window.contains(12, 0));
    }

    #[test]
    fn test_instrument_validation() {
        let mut config = InstrumentConfig::default();
        assert!(config.validate().is_ok());

        config.fast_ma_period = 21;
        config.slow_ma_period = 9;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_engine_validation_rejects_inverted_targets() {
        let mut config = EngineConfig::default();
        config.tp2_r = 1.0; // below tp1_r
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_news_blackout_parsing() {
        let mut config = EngineConfig {
            session_timezone: "UTC".to_string(),
            ..Default::default()
        };
        config.news_blackouts = "2025.03.10 08:25-08:40;2025.03.10 14:00-14:30".to_string();

        let intervals = config.parse_news_blackouts().unwrap();
        assert_eq!(intervals.len(), 2);
        assert_eq!(
            intervals[0].0,
            Utc.with_ymd_and_hms(2025, 3, 10, 8, 25, 0).unwrap()
        );
        assert_eq!(
            intervals[1].1,
            Utc.with_ymd_and_hms(2025, 3, 10, 14, 30, 0).unwrap()
        );
    }

    #[test]
    fn test_news_blackout_rejects_malformed_entry() {
        let mut config = EngineConfig::default();
        config.news_blackouts = "2025.03.10 0825-0840".to_string();
        assert!(config.parse_news_blackouts().is_err());
    }
}
