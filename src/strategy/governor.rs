//! Account-level risk governance
//!
//! One `RiskState` instance is shared by every instrument and mutated only
//! here: daily rollover, drawdown refresh, loss-streak accounting and the
//! entry cooldown timestamps all happen at the top of the update cycle,
//! before any instrument is evaluated, so no instrument can act on stale
//! halt state within the same cycle.

use std::collections::HashMap;

use anyhow::Result;
use chrono::{DateTime, NaiveDate, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::config::{EngineConfig, SessionWindow};

/// The single highest-priority condition preventing new entries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HaltReason {
    TargetHit,
    DailyLoss,
    TotalLoss,
    ConsecutiveLosses,
    NewsBlackout,
    SessionClosed,
    AdvisoryPause,
}

impl std::fmt::Display for HaltReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            HaltReason::TargetHit => "TARGET_HIT",
            HaltReason::DailyLoss => "DAILY_LOSS",
            HaltReason::TotalLoss => "TOTAL_LOSS",
            HaltReason::ConsecutiveLosses => "CONSEC_LOSSES",
            HaltReason::NewsBlackout => "NEWS_BLACKOUT",
            HaltReason::SessionClosed => "SESSION_CLOSED",
            HaltReason::AdvisoryPause => "ADVISORY_PAUSE",
        };
        write!(f, "{}", label)
    }
}

/// Process-wide risk counters; serializable so a restart mid-session can
/// resume the day's accounting instead of starting fresh.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskState {
    pub start_equity: f64,
    pub daily_start_equity: f64,
    pub daily_start_date: NaiveDate,
    pub consecutive_losses: u32,
    pub trades_today: u32,
    pub wins_today: u32,
    pub daily_pnl: f64,
    /// Always <= 0
    pub daily_drawdown_pct: f64,
    /// Always <= 0
    pub total_drawdown_pct: f64,
    pub current_equity: f64,
    pub last_global_entry: Option<DateTime<Utc>>,
    pub last_entry_by_symbol: HashMap<String, DateTime<Utc>>,
}

impl RiskState {
    fn new(start_equity: f64, today: NaiveDate) -> Self {
        Self {
            start_equity,
            daily_start_equity: start_equity,
            daily_start_date: today,
            consecutive_losses: 0,
            trades_today: 0,
            wins_today: 0,
            daily_pnl: 0.0,
            daily_drawdown_pct: 0.0,
            total_drawdown_pct: 0.0,
            current_equity: start_equity,
            last_global_entry: None,
            last_entry_by_symbol: HashMap::new(),
        }
    }
}

/// Account-level gatekeeper; single writer of `RiskState`
pub struct RiskGovernor {
    state: RiskState,
    timezone: Tz,
    sessions: Vec<SessionWindow>,
    blackouts: Vec<(DateTime<Utc>, DateTime<Utc>)>,
    target_profit_percent: f64,
    daily_loss_percent: f64,
    total_loss_percent: f64,
    max_consecutive_losses: u32,
    global_cooldown_secs: i64,
}

impl RiskGovernor {
    pub fn new(config: &EngineConfig, start_equity: f64, now: DateTime<Utc>) -> Result<Self> {
        let timezone = config.timezone()?;
        let today = now.with_timezone(&timezone).date_naive();
        Self::with_state(config, RiskState::new(start_equity, today))
    }

    /// Resume from a persisted snapshot (same-day restart)
    pub fn with_state(config: &EngineConfig, state: RiskState) -> Result<Self> {
        Ok(Self {
            state,
            timezone: config.timezone()?,
            sessions: config.sessions.clone(),
            blackouts: config.parse_news_blackouts()?,
            target_profit_percent: config.target_profit_percent,
            daily_loss_percent: config.daily_loss_percent,
            total_loss_percent: config.total_loss_percent,
            max_consecutive_losses: config.max_consecutive_losses,
            global_cooldown_secs: config.global_cooldown_secs,
        })
    }

    pub fn state(&self) -> &RiskState {
        &self.state
    }

    /// Top-of-cycle bookkeeping: calendar-day rollover (exactly once per
    /// day change) and drawdown refresh against the supplied equity.
    /// Returns true when a rollover happened.
    pub fn begin_cycle(&mut self, now: DateTime<Utc>, equity: f64) -> bool {
        let today = now.with_timezone(&self.timezone).date_naive();
        let rolled = today != self.state.daily_start_date;

        if rolled {
            info!(
                "Day rollover {} -> {}: daily counters reset, start equity {:.2}",
                self.state.daily_start_date, today, equity
            );
            self.state.daily_start_date = today;
            self.state.daily_start_equity = equity;
            self.state.consecutive_losses = 0;
            self.state.trades_today = 0;
            self.state.wins_today = 0;
            self.state.daily_pnl = 0.0;
        }

        self.state.current_equity = equity;
        self.state.daily_drawdown_pct = drawdown_pct(equity, self.state.daily_start_equity);
        self.state.total_drawdown_pct = drawdown_pct(equity, self.state.start_equity);
        rolled
    }

    /// Read-only halt evaluation in fixed priority order; first match wins.
    /// Calling twice on unchanged state yields the same answer - nothing
    /// advances on evaluation.
    pub fn evaluate(&self, now: DateTime<Utc>, advisory_pause: bool) -> Option<HaltReason> {
        let state = &self.state;

        if state.current_equity
            >= state.start_equity * (1.0 + self.target_profit_percent / 100.0)
        {
            return Some(HaltReason::TargetHit);
        }
        if state.daily_drawdown_pct <= -self.daily_loss_percent {
            return Some(HaltReason::DailyLoss);
        }
        if state.total_drawdown_pct <= -self.total_loss_percent {
            return Some(HaltReason::TotalLoss);
        }
        if self.max_consecutive_losses > 0
            && state.consecutive_losses >= self.max_consecutive_losses
        {
            return Some(HaltReason::ConsecutiveLosses);
        }
        if self
            .blackouts
            .iter()
            .any(|(start, end)| now >= *start && now < *end)
        {
            return Some(HaltReason::NewsBlackout);
        }

        let local = now.with_timezone(&self.timezone);
        use chrono::Timelike;
        let in_session = self
            .sessions
            .iter()
            .any(|window| window.contains(local.hour(), local.minute()));
        if !in_session {
            return Some(HaltReason::SessionClosed);
        }

        if advisory_pause {
            return Some(HaltReason::AdvisoryPause);
        }

        None
    }

    /// Both spacing gates must pass before a new entry: the instrument's
    /// own spacing and the global spacing since any instrument's entry.
    pub fn cooldown_ok(
        &self,
        symbol: &str,
        now: DateTime<Utc>,
        instrument_cooldown_secs: i64,
    ) -> bool {
        if let Some(last) = self.state.last_global_entry {
            if (now - last).num_seconds() < self.global_cooldown_secs {
                return false;
            }
        }
        if let Some(last) = self.state.last_entry_by_symbol.get(symbol) {
            if (now - *last).num_seconds() < instrument_cooldown_secs {
                return false;
            }
        }
        true
    }

    /// Record a submitted entry for cooldown spacing
    pub fn record_entry(&mut self, symbol: &str, now: DateTime<Utc>) {
        self.state.last_global_entry = Some(now);
        self.state
            .last_entry_by_symbol
            .insert(symbol.to_string(), now);
        self.state.trades_today += 1;
    }

    /// Trade-closure notification. A realized loss extends the streak, a
    /// gain resets it, a flat scratch does neither.
    pub fn record_result(&mut self, pnl: f64) {
        self.state.daily_pnl += pnl;
        if pnl > 0.0 {
            self.state.wins_today += 1;
            self.state.consecutive_losses = 0;
        } else if pnl < 0.0 {
            self.state.consecutive_losses += 1;
            if self.max_consecutive_losses > 0
                && self.state.consecutive_losses >= self.max_consecutive_losses
            {
                warn!(
                    "Consecutive-loss limit reached ({} of {})",
                    self.state.consecutive_losses, self.max_consecutive_losses
                );
            }
        }
    }
}

fn drawdown_pct(equity: f64, reference: f64) -> f64 {
    if reference <= 0.0 {
        return 0.0;
    }
    ((equity - reference) / reference * 100.0).min(0.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn config() -> EngineConfig {
        EngineConfig {
            session_timezone: "UTC".to_string(),
            sessions: vec![SessionWindow {
                label: "all-day".to_string(),
                start_hour: 0,
                start_minute: 0,
                end_hour: 23,
                end_minute: 59,
            }],
            daily_loss_percent: 4.0,
            total_loss_percent: 8.0,
            target_profit_percent: 8.0,
            max_consecutive_losses: 3,
            global_cooldown_secs: 120,
            ..Default::default()
        }
    }

    fn at(day: u32, hour: u32, minute: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, day, hour, minute, 0).unwrap()
    }

    #[test]
    fn test_daily_loss_halt_scenario() {
        let mut governor = RiskGovernor::new(&config(), 25_000.0, at(10, 9, 0)).unwrap();
        governor.begin_cycle(at(10, 11, 0), 23_750.0);

        assert!((governor.state().daily_drawdown_pct + 5.0).abs() < 1e-9);
        assert_eq!(
            governor.evaluate(at(10, 11, 0), false),
            Some(HaltReason::DailyLoss)
        );
    }

    #[test]
    fn test_evaluate_is_idempotent() {
        let mut governor = RiskGovernor::new(&config(), 25_000.0, at(10, 9, 0)).unwrap();
        governor.begin_cycle(at(10, 11, 0), 23_750.0);

        let first = governor.evaluate(at(10, 11, 0), false);
        let second = governor.evaluate(at(10, 11, 0), false);
        assert_eq!(first, second);
        assert_eq!(governor.state().trades_today, 0);
    }

    #[test]
    fn test_priority_daily_loss_over_advisory() {
        let mut governor = RiskGovernor::new(&config(), 25_000.0, at(10, 9, 0)).unwrap();
        governor.begin_cycle(at(10, 11, 0), 23_750.0);

        // Both conditions hold; the earlier reason in the chain wins
        assert_eq!(
            governor.evaluate(at(10, 11, 0), true),
            Some(HaltReason::DailyLoss)
        );
    }

    #[test]
    fn test_target_hit_has_top_priority() {
        let mut governor = RiskGovernor::new(&config(), 25_000.0, at(10, 9, 0)).unwrap();
        governor.begin_cycle(at(10, 11, 0), 27_100.0); // +8.4%

        assert_eq!(
            governor.evaluate(at(10, 11, 0), true),
            Some(HaltReason::TargetHit)
        );
    }

    #[test]
    fn test_day_rollover_resets_once() {
        let mut governor = RiskGovernor::new(&config(), 25_000.0, at(10, 9, 0)).unwrap();
        governor.record_result(-150.0);
        governor.record_result(-80.0);
        assert_eq!(governor.state().consecutive_losses, 2);

        // Mid-day cycles do not reset
        assert!(!governor.begin_cycle(at(10, 15, 0), 24_770.0));
        assert_eq!(governor.state().consecutive_losses, 2);

        // Next calendar day resets exactly once
        assert!(governor.begin_cycle(at(11, 9, 0), 24_770.0));
        assert_eq!(governor.state().consecutive_losses, 0);
        assert_eq!(governor.state().daily_start_equity, 24_770.0);
        assert!(!governor.begin_cycle(at(11, 9, 1), 24_770.0));
    }

    #[test]
    fn test_consecutive_loss_accounting() {
        let mut governor = RiskGovernor::new(&config(), 25_000.0, at(10, 9, 0)).unwrap();

        governor.record_result(-100.0);
        governor.record_result(-100.0);
        // Exactly zero neither extends nor resets the streak
        governor.record_result(0.0);
        assert_eq!(governor.state().consecutive_losses, 2);

        governor.record_result(250.0);
        assert_eq!(governor.state().consecutive_losses, 0);
        assert_eq!(governor.state().wins_today, 1);

        governor.record_result(-100.0);
        governor.record_result(-100.0);
        governor.record_result(-100.0);
        governor.begin_cycle(at(10, 15, 0), 24_750.0);
        assert_eq!(
            governor.evaluate(at(10, 15, 0), false),
            Some(HaltReason::ConsecutiveLosses)
        );
    }

    #[test]
    fn test_global_and_instrument_cooldowns() {
        let mut governor = RiskGovernor::new(&config(), 25_000.0, at(10, 9, 0)).unwrap();
        governor.record_entry("XAUUSD", at(10, 10, 0));

        // Global spacing blocks every instrument, not just the one that traded
        assert!(!governor.cooldown_ok("EURUSD", at(10, 10, 1), 300));
        assert!(governor.cooldown_ok("EURUSD", at(10, 10, 3), 300));

        // Instrument spacing keeps blocking the traded one after the global gate clears
        assert!(!governor.cooldown_ok("XAUUSD", at(10, 10, 3), 300));
        assert!(governor.cooldown_ok("XAUUSD", at(10, 15, 0), 300));
    }

    #[test]
    fn test_news_blackout_window() {
        let mut cfg = config();
        cfg.news_blackouts = "2025.03.10 14:00-14:30".to_string();
        let mut governor = RiskGovernor::new(&cfg, 25_000.0, at(10, 9, 0)).unwrap();
        governor.begin_cycle(at(10, 14, 10), 25_000.0);

        assert_eq!(
            governor.evaluate(at(10, 14, 10), false),
            Some(HaltReason::NewsBlackout)
        );
        assert_eq!(governor.evaluate(at(10, 14, 30), false), None);
    }

    #[test]
    fn test_session_closed_and_advisory_pause() {
        let mut cfg = config();
        cfg.sessions = vec![SessionWindow {
            label: "morning".to_string(),
            start_hour: 9,
            start_minute: 30,
            end_hour: 12,
            end_minute: 0,
        }];
        let mut governor = RiskGovernor::new(&cfg, 25_000.0, at(10, 9, 0)).unwrap();
        governor.begin_cycle(at(10, 13, 0), 25_000.0);

        assert_eq!(
            governor.evaluate(at(10, 13, 0), false),
            Some(HaltReason::SessionClosed)
        );
        // Inside the session the advisory pause is the only remaining gate
        assert_eq!(
            governor.evaluate(at(10, 10, 0), true),
            Some(HaltReason::AdvisoryPause)
        );
        assert_eq!(governor.evaluate(at(10, 10, 0), false), None);
    }
}
