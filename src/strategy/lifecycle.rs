//! Per-instrument trade lifecycle state machine
//!
//! Flat -> Open -> PartialTaken -> Flat. The protective exit level is a
//! *virtual* stop: tracked and enforced here on every update instead of
//! relying on a resting server-side order, which lets it move to break-even
//! after the partial exit without a broker round-trip.
//!
//! Every update re-evaluates all exit conditions from scratch against the
//! current quote, so a missed tick never leaves a position unmanaged beyond
//! the next one.

use chrono::{DateTime, Utc};
use tracing::{info, warn};
use uuid::Uuid;

use super::sizing::floor_to_step;
use super::stops::StopPlan;
use crate::config::EngineConfig;
use crate::execution::{ExecutionPort, Fill, VenueError, VenuePosition};
use crate::types::{Direction, InstrumentMeta, Tick};

/// Lifecycle phase of the instrument's position
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TradePhase {
    Open,
    PartialTaken,
}

/// Why a position was fully closed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitKind {
    Emergency,
    VirtualStop,
    TakeProfit2,
    TimeStop,
}

impl ExitKind {
    pub fn label(&self) -> &'static str {
        match self {
            ExitKind::Emergency => "EMERGENCY",
            ExitKind::VirtualStop => "EXIT_SL",
            ExitKind::TakeProfit2 => "TP2",
            ExitKind::TimeStop => "TIME_EXIT",
        }
    }
}

/// State of one open trade, owned exclusively by the controller
#[derive(Debug, Clone)]
pub struct TradeState {
    pub id: Uuid,
    pub phase: TradePhase,
    pub direction: Direction,
    pub entry_price: f64,
    pub volume: f64,
    pub virtual_stop: f64,
    pub tp1: f64,
    pub tp2: f64,
    pub break_even: f64,
    pub stop_pips: f64,
    pub risk_percent_used: f64,
    pub opened_at: DateTime<Utc>,
    /// Account-currency P&L already realized by partial exits
    pub realized_partial: f64,
    /// Adopted from the venue after a restart; stop levels are approximate
    pub recovered: bool,
}

/// Outcome of one management pass
#[derive(Debug)]
pub enum LifecycleAction {
    None,
    /// First target reached; roughly half the volume closed.
    /// `pnl` is the account-currency P&L realized by the closed chunk.
    PartialTaken {
        closed_volume: f64,
        fill: Fill,
        pnl: f64,
    },
    /// Position fully closed. `pnl` is the final chunk's realized P&L;
    /// `trade_pnl` includes earlier partial realizations and is what the
    /// loss-streak accounting sees.
    Closed {
        kind: ExitKind,
        fill: Fill,
        pnl: f64,
        trade_pnl: f64,
    },
    /// A close request was rejected; position remains open, retried next update
    ExitFailed { kind: ExitKind, error: VenueError },
    PartialFailed { error: VenueError },
}

/// Manages at most one open position for one instrument
#[derive(Debug, Default)]
pub struct TradeLifecycleController {
    state: Option<TradeState>,
}

impl TradeLifecycleController {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_flat(&self) -> bool {
        self.state.is_none()
    }

    pub fn state(&self) -> Option<&TradeState> {
        self.state.as_ref()
    }

    /// Record a filled entry
    pub fn open(
        &mut self,
        direction: Direction,
        fill: &Fill,
        plan: &StopPlan,
        risk_percent_used: f64,
    ) -> &TradeState {
        let state = TradeState {
            id: Uuid::new_v4(),
            phase: TradePhase::Open,
            direction,
            entry_price: fill.price,
            volume: fill.volume,
            virtual_stop: plan.stop_price,
            tp1: plan.tp1,
            tp2: plan.tp2,
            break_even: plan.break_even,
            stop_pips: plan.stop_pips,
            risk_percent_used,
            opened_at: fill.timestamp,
            realized_partial: 0.0,
            recovered: false,
        };
        self.state = Some(state);
        self.state.as_ref().expect("state just set")
    }

    /// Adopt a position the venue reports that this controller did not open
    /// (restart recovery). Reconstructs minimal safe state from the broker
    /// report, falling back to the instrument minimum stop distance when no
    /// server-side stop is resting.
    pub fn adopt(
        &mut self,
        position: &VenuePosition,
        meta: &InstrumentMeta,
        min_sl_pips: f64,
        config: &EngineConfig,
    ) {
        let stop_pips = position
            .stop_price
            .map(|stop| meta.to_pips((position.entry_price - stop).abs()))
            .filter(|pips| *pips > 0.0)
            .unwrap_or(min_sl_pips);
        let stop_distance = meta.to_price(stop_pips);
        let be_offset = meta.to_price(config.break_even_buffer_pips);

        let (virtual_stop, tp1, tp2, break_even) = match position.direction {
            Direction::Long => (
                position.entry_price - stop_distance,
                position.entry_price + stop_distance * config.tp1_r,
                position.entry_price + stop_distance * config.tp2_r,
                position.entry_price + be_offset,
            ),
            Direction::Short => (
                position.entry_price + stop_distance,
                position.entry_price - stop_distance * config.tp1_r,
                position.entry_price - stop_distance * config.tp2_r,
                position.entry_price - be_offset,
            ),
        };

        warn!(
            "Adopting unmanaged {} position on {}: {:.2} @ {:.2}, stop {:.2} ({})",
            position.direction,
            position.symbol,
            position.volume,
            position.entry_price,
            virtual_stop,
            if position.stop_price.is_some() {
                "venue stop"
            } else {
                "minimum-distance fallback"
            }
        );

        self.state = Some(TradeState {
            id: Uuid::new_v4(),
            phase: TradePhase::Open,
            direction: position.direction,
            entry_price: position.entry_price,
            volume: position.volume,
            virtual_stop,
            tp1,
            tp2,
            break_even,
            stop_pips,
            risk_percent_used: 0.0,
            opened_at: position.opened_at,
            realized_partial: 0.0,
            recovered: true,
        });
    }

    /// Unrealized P&L in account currency at the current quote
    pub fn unrealized_pnl(&self, tick: &Tick, meta: &InstrumentMeta) -> f64 {
        match &self.state {
            Some(state) => {
                let close_price = close_side_price(state.direction, tick);
                signed_pnl(state.direction, state.entry_price, close_price, state.volume, meta)
            }
            None => 0.0,
        }
    }

    /// One management pass. Exit conditions are checked in fixed priority:
    /// emergency loss, virtual stop, second target, time stop - first match
    /// wins and nothing is combined. The tp1 partial only runs when no full
    /// exit matched.
    pub fn manage(
        &mut self,
        tick: &Tick,
        now: DateTime<Utc>,
        balance: f64,
        meta: &InstrumentMeta,
        config: &EngineConfig,
        venue: &mut dyn ExecutionPort,
    ) -> LifecycleAction {
        let Some(state) = &self.state else {
            return LifecycleAction::None;
        };

        let close_price = close_side_price(state.direction, tick);
        let unrealized = signed_pnl(
            state.direction,
            state.entry_price,
            close_price,
            state.volume,
            meta,
        );

        let exit_kind = if unrealized <= -balance * config.emergency_loss_percent / 100.0 {
            Some(ExitKind::Emergency)
        } else if stop_crossed(state.direction, close_price, state.virtual_stop) {
            Some(ExitKind::VirtualStop)
        } else if target_reached(state.direction, close_price, state.tp2) {
            Some(ExitKind::TakeProfit2)
        } else if (now - state.opened_at).num_seconds() >= config.max_hold_secs {
            Some(ExitKind::TimeStop)
        } else {
            None
        };

        if let Some(kind) = exit_kind {
            return self.close_full(kind, meta, venue);
        }

        if state.phase == TradePhase::Open && target_reached(state.direction, close_price, state.tp1)
        {
            return self.take_partial(meta, venue);
        }

        LifecycleAction::None
    }

    fn close_full(
        &mut self,
        kind: ExitKind,
        meta: &InstrumentMeta,
        venue: &mut dyn ExecutionPort,
    ) -> LifecycleAction {
        let state = self.state.as_ref().expect("close_full with open state");
        let symbol = meta.symbol.clone();

        match venue.close_full(&symbol) {
            Ok(fill) => {
                let pnl = signed_pnl(
                    state.direction,
                    state.entry_price,
                    fill.price,
                    state.volume,
                    meta,
                );
                let trade_pnl = pnl + state.realized_partial;
                info!(
                    "{} {}: {} @ {:.2} | P&L ${:+.2} (trade ${:+.2})",
                    kind.label(),
                    symbol,
                    state.direction,
                    fill.price,
                    pnl,
                    trade_pnl
                );
                self.state = None;
                LifecycleAction::Closed {
                    kind,
                    fill,
                    pnl,
                    trade_pnl,
                }
            }
            Err(error) => {
                // Leave the position marked open; the same condition is
                // re-evaluated against fresh prices on the next update.
                warn!(
                    "EXIT_FAIL {}: {} close rejected ({})",
                    symbol,
                    kind.label(),
                    error
                );
                LifecycleAction::ExitFailed { kind, error }
            }
        }
    }

    fn take_partial(&mut self, meta: &InstrumentMeta, venue: &mut dyn ExecutionPort) -> LifecycleAction {
        let state = self.state.as_mut().expect("take_partial with open state");
        let symbol = meta.symbol.clone();

        let mut close_volume = floor_to_step(state.volume / 2.0, meta.volume_step);
        // Never strand a sub-minimum remainder at the venue
        if state.volume - close_volume + 1e-9 < meta.volume_min {
            close_volume = floor_to_step(state.volume - meta.volume_min, meta.volume_step);
        }

        if close_volume <= 0.0 {
            // Position too small to split: keep full size, still arm the
            // break-even stop so tp1 does not re-trigger.
            info!(
                "TP1 {}: volume {:.2} below splittable size, stop -> break-even",
                symbol, state.volume
            );
            state.phase = TradePhase::PartialTaken;
            state.virtual_stop = state.break_even;
            return LifecycleAction::None;
        }

        match venue.close_partial(&symbol, close_volume) {
            Ok(fill) => {
                let pnl = signed_pnl(
                    state.direction,
                    state.entry_price,
                    fill.price,
                    close_volume,
                    meta,
                );
                state.volume -= close_volume;
                state.phase = TradePhase::PartialTaken;
                state.virtual_stop = state.break_even;
                state.realized_partial += pnl;
                info!(
                    "TP1 {}: closed {:.2} @ {:.2} (${:+.2}), {:.2} runs, stop -> {:.2}",
                    symbol, close_volume, fill.price, pnl, state.volume, state.virtual_stop
                );
                LifecycleAction::PartialTaken {
                    closed_volume: close_volume,
                    fill,
                    pnl,
                }
            }
            Err(error) => {
                warn!("EXIT_FAIL {}: partial close rejected ({})", symbol, error);
                LifecycleAction::PartialFailed { error }
            }
        }
    }
}

/// Price the position would close at right now
fn close_side_price(direction: Direction, tick: &Tick) -> f64 {
    if direction.is_buy() {
        tick.bid
    } else {
        tick.ask
    }
}

/// Account-currency P&L for closing `volume` at `close_price`
fn signed_pnl(
    direction: Direction,
    entry_price: f64,
    close_price: f64,
    volume: f64,
    meta: &InstrumentMeta,
) -> f64 {
    let price_move = match direction {
        Direction::Long => close_price - entry_price,
        Direction::Short => entry_price - close_price,
    };
    meta.to_pips(price_move) * meta.pip_value_per_lot() * volume
}

fn stop_crossed(direction: Direction, price: f64, stop: f64) -> bool {
    match direction {
        Direction::Long => price <= stop,
        Direction::Short => price >= stop,
    }
}

fn target_reached(direction: Direction, price: f64, target: f64) -> bool {
    match direction {
        Direction::Long => price >= target,
        Direction::Short => price <= target,
    }
}
