//! Decision core - signal, sizing, lifecycle and risk governance
//!
//! This module contains the broker-agnostic strategy components:
//! - Bar windows and timeframe roll-up
//! - Bias / micro-range / VWAP / breakout signal checks
//! - Tick-velocity burst gate
//! - Risk-budget position sizing and stop/target computation
//! - Per-instrument trade lifecycle state machine
//! - Account-level risk governor
//! - Engine orchestration

pub mod bars;
pub mod context;
pub mod engine;
pub mod governor;
pub mod lifecycle;
pub mod signal;
pub mod sizing;
pub mod stops;
pub mod velocity;

// Re-export commonly used types
pub use bars::{average_true_range, sma_at, BarSeries, FiveMinuteRoller, TickBarAggregator};
pub use context::InstrumentContext;
pub use engine::{Engine, EngineEvent};
pub use governor::{HaltReason, RiskGovernor, RiskState};
pub use lifecycle::{ExitKind, LifecycleAction, TradeLifecycleController, TradePhase, TradeState};
pub use signal::{Bias, BreakoutSignal, RangeWindow, SessionVwap};
pub use sizing::compute_lot;
pub use stops::{compute_stop, StopPlan};
pub use velocity::TickVelocity;
