//! Engine orchestration
//!
//! Drives one update cycle per market event: governor bookkeeping first,
//! then lifecycle management of any open position, then - only for an
//! instrument that was already flat when the cycle started - entry
//! evaluation through the full gate chain. A position closed during an
//! update cannot reopen until the next one.

use std::path::PathBuf;

use anyhow::Result;
use chrono::{DateTime, TimeZone, Utc};
use tokio::sync::broadcast;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::bars::average_true_range;
use super::context::InstrumentContext;
use super::governor::{HaltReason, RiskGovernor, RiskState};
use super::lifecycle::LifecycleAction;
use super::signal::{detect_micro_range, evaluate_breakout, vwap_price_ok};
use super::sizing::compute_lot;
use super::stops::compute_stop;
use crate::advisory::AdvisoryClient;
use crate::config::EngineConfig;
use crate::execution::{EntryRequest, ExecutionPort, MarketDataPort};
use crate::persist;
use crate::types::{Bar, Direction, Tick};

/// Structured telemetry for the dashboard/log collaborators.
///
/// Every event carries the instrument, human-readable detail and the
/// daily drawdown at emission time.
#[derive(Debug, Clone)]
pub enum EngineEvent {
    Entry {
        symbol: String,
        direction: Direction,
        price: f64,
        volume: f64,
        stop: f64,
        tp1: f64,
        tp2: f64,
        drawdown_pct: f64,
    },
    /// TP1 partial exit
    PartialExit {
        symbol: String,
        price: f64,
        closed_volume: f64,
        pnl: f64,
        drawdown_pct: f64,
    },
    /// Full exit; `kind` is one of EMERGENCY / EXIT_SL / TP2 / TIME_EXIT
    Exit {
        symbol: String,
        kind: &'static str,
        price: f64,
        trade_pnl: f64,
        drawdown_pct: f64,
    },
    /// A triggered breakout was not traded
    Skip {
        symbol: String,
        reason: String,
        drawdown_pct: f64,
    },
    OrderFail {
        symbol: String,
        code: i32,
        message: String,
    },
    ExitFail {
        symbol: String,
        code: i32,
        message: String,
    },
    /// New-entry gating switched to halted (edge-triggered)
    Halted { reason: HaltReason },
    /// Halt condition cleared
    Resumed,
}

/// Orchestrator owning all per-instrument contexts and the risk governor
pub struct Engine {
    config: EngineConfig,
    governor: RiskGovernor,
    instruments: Vec<InstrumentContext>,
    balance: f64,
    event_tx: broadcast::Sender<EngineEvent>,
    last_halt: Option<HaltReason>,
    snapshot_path: Option<PathBuf>,
}

impl Engine {
    /// Build the engine: validate each instrument, pull its metadata and
    /// warmup history from the market-data port, and resume a prior risk
    /// snapshot when one is supplied. An instrument that fails setup is
    /// disabled alone; the rest keep trading.
    pub fn new(
        config: EngineConfig,
        starting_balance: f64,
        now: DateTime<Utc>,
        market: &dyn MarketDataPort,
        prior_state: Option<RiskState>,
    ) -> Result<Self> {
        config.validate()?;

        let governor = match prior_state {
            // A stale snapshot is harmless: the first begin_cycle rolls
            // the daily counters over to the current day.
            Some(state) => RiskGovernor::with_state(&config, state)?,
            None => RiskGovernor::new(&config, starting_balance, now)?,
        };

        let timezone = config.timezone()?;
        let local_midnight = now
            .with_timezone(&timezone)
            .date_naive()
            .and_hms_opt(0, 0, 0)
            .expect("midnight exists");
        let day_start = timezone
            .from_local_datetime(&local_midnight)
            .earliest()
            .map(|dt| dt.with_timezone(&Utc))
            .unwrap_or(now);

        let mut instruments = Vec::new();
        for instrument_config in config.instruments.iter().filter(|c| c.enabled) {
            if let Err(e) = instrument_config.validate() {
                warn!("Disabling instrument: {:#}", e);
                continue;
            }
            let meta = match market.instrument(&instrument_config.symbol) {
                Ok(meta) => meta,
                Err(e) => {
                    warn!("Disabling {}: {}", instrument_config.symbol, e);
                    continue;
                }
            };

            let mut context = InstrumentContext::new(instrument_config.clone(), meta);
            let minute = market
                .recent_bars(&instrument_config.symbol, 60, 64)
                .unwrap_or_default();
            let five_minute = market
                .recent_bars(&instrument_config.symbol, 300, 64)
                .unwrap_or_default();
            context.warmup(minute, five_minute, day_start);
            instruments.push(context);
        }

        let (event_tx, _) = broadcast::channel(1024);

        Ok(Self {
            snapshot_path: config.snapshot_path.clone(),
            config,
            governor,
            instruments,
            balance: starting_balance,
            event_tx,
            last_halt: None,
        })
    }

    /// Adopt venue-reported positions the engine does not recognize
    /// (restart recovery). Call once after startup.
    pub fn reconcile_positions(&mut self, venue: &dyn ExecutionPort) {
        for position in venue.open_positions() {
            let Some(context) = self
                .instruments
                .iter_mut()
                .find(|c| c.meta.symbol == position.symbol)
            else {
                warn!(
                    "Venue reports a position on untracked symbol {}; leaving it alone",
                    position.symbol
                );
                continue;
            };
            if context.lifecycle.is_flat() {
                let min_sl = context.config.min_sl_pips;
                context
                    .lifecycle
                    .adopt(&position, &context.meta, min_sl, &self.config);
            }
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.event_tx.subscribe()
    }

    pub fn balance(&self) -> f64 {
        self.balance
    }

    pub fn governor(&self) -> &RiskGovernor {
        &self.governor
    }

    pub fn instrument(&self, symbol: &str) -> Option<&InstrumentContext> {
        self.instruments.iter().find(|c| c.meta.symbol == symbol)
    }

    /// Balance plus unrealized P&L of every open position at last quotes
    pub fn equity(&self) -> f64 {
        let unrealized: f64 = self
            .instruments
            .iter()
            .filter_map(|c| {
                c.last_tick
                    .as_ref()
                    .map(|tick| c.lifecycle.unrealized_pnl(tick, &c.meta))
            })
            .sum();
        self.balance + unrealized
    }

    /// Ingest a closed 1-minute bar from the market-data collaborator
    pub fn on_bar(&mut self, symbol: &str, bar: Bar) {
        if let Some(context) = self
            .instruments
            .iter_mut()
            .find(|c| c.meta.symbol == symbol)
        {
            context.on_minute_bar(bar);
        }
    }

    /// One full update cycle for `symbol` driven by a fresh quote
    pub fn on_tick(
        &mut self,
        symbol: &str,
        tick: Tick,
        venue: &mut dyn ExecutionPort,
        advisory: &AdvisoryClient,
    ) {
        let Some(idx) = self
            .instruments
            .iter()
            .position(|c| c.meta.symbol == symbol)
        else {
            return;
        };

        let now = tick.timestamp;
        {
            let context = &mut self.instruments[idx];
            context.closed_this_cycle = false;
            context.velocity.on_tick(now);
            context.last_tick = Some(tick);
        }

        // Governor bookkeeping runs before any instrument logic so every
        // gate below sees this cycle's equity and day.
        let equity = self.equity();
        if self.governor.begin_cycle(now, equity) {
            let day = self.governor.state().daily_start_date;
            for context in &mut self.instruments {
                context.on_day_rollover(day);
            }
            self.save_snapshot();
        }

        self.manage_position(idx, &tick, venue);

        let flat_for_entry = {
            let context = &self.instruments[idx];
            context.lifecycle.is_flat() && !context.closed_this_cycle
        };
        if flat_for_entry {
            self.evaluate_entry(idx, &tick, venue, advisory);
        }
    }

    fn manage_position(&mut self, idx: usize, tick: &Tick, venue: &mut dyn ExecutionPort) {
        let balance = self.balance;
        let context = &mut self.instruments[idx];
        if context.lifecycle.is_flat() {
            return;
        }
        let symbol = context.meta.symbol.clone();

        let action = context.lifecycle.manage(
            tick,
            tick.timestamp,
            balance,
            &context.meta,
            &self.config,
            venue,
        );

        match action {
            LifecycleAction::None => {}
            LifecycleAction::PartialTaken {
                closed_volume,
                fill,
                pnl,
            } => {
                self.balance += pnl;
                let drawdown_pct = self.governor.state().daily_drawdown_pct;
                let _ = self.event_tx.send(EngineEvent::PartialExit {
                    symbol,
                    price: fill.price,
                    closed_volume,
                    pnl,
                    drawdown_pct,
                });
            }
            LifecycleAction::Closed {
                kind,
                fill,
                pnl,
                trade_pnl,
            } => {
                self.balance += pnl;
                self.instruments[idx].closed_this_cycle = true;
                self.governor.record_result(trade_pnl);
                let drawdown_pct = self.governor.state().daily_drawdown_pct;
                let _ = self.event_tx.send(EngineEvent::Exit {
                    symbol,
                    kind: kind.label(),
                    price: fill.price,
                    trade_pnl,
                    drawdown_pct,
                });
                self.save_snapshot();
            }
            LifecycleAction::ExitFailed { error, .. } => {
                let _ = self.event_tx.send(EngineEvent::ExitFail {
                    symbol,
                    code: error.code,
                    message: error.message,
                });
            }
            LifecycleAction::PartialFailed { error } => {
                let _ = self.event_tx.send(EngineEvent::ExitFail {
                    symbol,
                    code: error.code,
                    message: error.message,
                });
            }
        }
    }

    fn evaluate_entry(
        &mut self,
        idx: usize,
        tick: &Tick,
        venue: &mut dyn ExecutionPort,
        advisory: &AdvisoryClient,
    ) {
        let now = tick.timestamp;

        // Halt state gates new entries only; open positions above were
        // already managed regardless.
        let halt = self.governor.evaluate(now, advisory.pause_requested());
        self.note_halt_transition(halt);
        if halt.is_some() {
            return;
        }

        let context = &self.instruments[idx];
        let symbol = context.meta.symbol.clone();

        if !self
            .governor
            .cooldown_ok(&symbol, now, context.config.cooldown_secs)
        {
            debug!("{}: inside entry cooldown", symbol);
            return;
        }

        let spread_pips = context.meta.to_pips(tick.spread());
        if spread_pips > context.config.max_spread_pips {
            debug!("{}: spread {:.1} pips too wide", symbol, spread_pips);
            return;
        }

        // Indeterminate gates fail closed without telemetry; they are
        // non-signals, retried on the next update.
        let Some(direction) = context.bias.direction() else {
            return;
        };

        let snapshot = context.snapshot(tick);
        let range = detect_micro_range(&context.config, &context.meta, snapshot.minute_bars);
        if !range.valid {
            return;
        }

        let last_close = match snapshot.minute_bars.last() {
            Some(bar) => bar.close,
            None => return,
        };
        if !vwap_price_ok(
            &context.config,
            &context.meta,
            context.bias,
            context.vwap.value(),
            last_close,
        ) {
            debug!("{}: last close outside VWAP tolerance", symbol);
            return;
        }

        let atr = average_true_range(snapshot.minute_bars, context.config.atr_period);
        let Some(signal) = evaluate_breakout(
            &context.config,
            &context.meta,
            direction,
            &range,
            &snapshot,
            atr,
        ) else {
            return;
        };

        // From here the breakout has triggered; anything that blocks the
        // trade is a reportable skip.
        if !context.velocity.is_bursting() {
            self.emit_skip(&symbol, "tick velocity below burst threshold");
            return;
        }

        let Some(plan) = compute_stop(
            &context.config,
            &context.meta,
            direction,
            signal.entry_price,
            &range,
            self.config.tp1_r,
            self.config.tp2_r,
            self.config.break_even_buffer_pips,
        ) else {
            self.emit_skip(&symbol, "structural stop beyond maximum distance");
            return;
        };

        let risk_percent = advisory.effective_risk_percent(self.config.risk_percent);
        let volume = compute_lot(
            &context.meta,
            plan.stop_pips,
            risk_percent,
            self.balance,
            self.config.max_lot_per_trade,
        );
        if volume <= 0.0 {
            self.emit_skip(&symbol, "computed lot below venue minimum");
            return;
        }

        let request = EntryRequest {
            symbol: symbol.clone(),
            direction,
            volume,
            max_slippage_pips: self.config.max_slippage_pips,
            tag: format!("rb-{}", Uuid::new_v4()),
        };

        match venue.submit_entry(&request) {
            Ok(fill) => {
                // Re-anchor the plan to the actual fill; a fill slipped
                // past the stop cap keeps the signal-price plan.
                let live_plan = compute_stop(
                    &self.instruments[idx].config,
                    &self.instruments[idx].meta,
                    direction,
                    fill.price,
                    &range,
                    self.config.tp1_r,
                    self.config.tp2_r,
                    self.config.break_even_buffer_pips,
                )
                .unwrap_or(plan);

                let context = &mut self.instruments[idx];
                let state = context
                    .lifecycle
                    .open(direction, &fill, &live_plan, risk_percent);
                info!(
                    "ENTRY {}: {} {:.2} @ {:.2} | stop {:.2} ({:.1}p) | tp1 {:.2} tp2 {:.2}",
                    symbol,
                    direction,
                    fill.volume,
                    fill.price,
                    state.virtual_stop,
                    state.stop_pips,
                    state.tp1,
                    state.tp2
                );

                self.governor.record_entry(&symbol, now);
                let drawdown_pct = self.governor.state().daily_drawdown_pct;
                let _ = self.event_tx.send(EngineEvent::Entry {
                    symbol,
                    direction,
                    price: fill.price,
                    volume: fill.volume,
                    stop: live_plan.stop_price,
                    tp1: live_plan.tp1,
                    tp2: live_plan.tp2,
                    drawdown_pct,
                });
                self.save_snapshot();
            }
            Err(error) => {
                // No same-cycle retry; cooldown and risk gating govern
                // the next attempt.
                warn!("ORDER_FAIL {}: {}", symbol, error);
                let _ = self.event_tx.send(EngineEvent::OrderFail {
                    symbol,
                    code: error.code,
                    message: error.message,
                });
            }
        }
    }

    fn note_halt_transition(&mut self, halt: Option<HaltReason>) {
        match (self.last_halt, halt) {
            (previous, Some(reason)) if previous != Some(reason) => {
                info!("Trading halted: {}", reason);
                let _ = self.event_tx.send(EngineEvent::Halted { reason });
            }
            (Some(_), None) => {
                info!("Halt cleared, trading resumed");
                let _ = self.event_tx.send(EngineEvent::Resumed);
            }
            _ => {}
        }
        self.last_halt = halt;
    }

    fn emit_skip(&self, symbol: &str, reason: &str) {
        info!("SKIP {}: {}", symbol, reason);
        let _ = self.event_tx.send(EngineEvent::Skip {
            symbol: symbol.to_string(),
            reason: reason.to_string(),
            drawdown_pct: self.governor.state().daily_drawdown_pct,
        });
    }

    fn save_snapshot(&self) {
        if let Some(path) = &self.snapshot_path {
            if let Err(e) = persist::save_risk_state(path, self.governor.state()) {
                warn!("Snapshot write failed: {:#}", e);
            }
        }
    }

    /// One-line account summary for the periodic status log
    pub fn status(&self) -> String {
        let state = self.governor.state();
        let win_rate = if state.trades_today > 0 {
            state.wins_today as f64 / state.trades_today as f64 * 100.0
        } else {
            0.0
        };
        let open = self
            .instruments
            .iter()
            .filter(|c| !c.lifecycle.is_flat())
            .count();
        format!(
            "Balance: ${:.2} | Day P&L: ${:+.2} | DD: {:.2}% | Trades: {} | WR: {:.1}% | Open: {} | Halt: {}",
            self.balance,
            state.daily_pnl,
            state.daily_drawdown_pct,
            state.trades_today,
            win_rate,
            open,
            self.last_halt
                .map(|r| r.to_string())
                .unwrap_or_else(|| "none".to_string())
        )
    }
}
