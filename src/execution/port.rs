//! Narrow venue interfaces the decision core depends on
//!
//! The strategy never talks to a broker API directly; it sees only these
//! two traits, which keeps the core host-independent and unit-testable
//! without a live venue.

use crate::types::{Bar, Direction, InstrumentMeta};
use chrono::{DateTime, Utc};

/// Error reported by the execution venue for a rejected request.
///
/// The venue's own error code is preserved so it can be logged verbatim in
/// `ORDER_FAIL`/`EXIT_FAIL` telemetry.
#[derive(Debug, Clone)]
pub struct VenueError {
    pub code: i32,
    pub message: String,
}

impl std::fmt::Display for VenueError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "venue error {}: {}", self.code, self.message)
    }
}

impl std::error::Error for VenueError {}

/// Market-order entry request
#[derive(Debug, Clone)]
pub struct EntryRequest {
    pub symbol: String,
    pub direction: Direction,
    pub volume: f64,
    /// Maximum acceptable fill deviation in pips; the venue rejects
    /// rather than fill beyond it
    pub max_slippage_pips: f64,
    /// Correlation tag carried through fills and telemetry
    pub tag: String,
}

/// Reported fill for an accepted entry
#[derive(Debug, Clone)]
pub struct Fill {
    pub price: f64,
    pub volume: f64,
    pub timestamp: DateTime<Utc>,
}

/// A position the venue reports as open (used for restart recovery)
#[derive(Debug, Clone)]
pub struct VenuePosition {
    pub symbol: String,
    pub direction: Direction,
    pub volume: f64,
    pub entry_price: f64,
    pub opened_at: DateTime<Utc>,
    /// Server-side protective stop, if one is resting
    pub stop_price: Option<f64>,
}

/// Instrument metadata and warmup history.
///
/// Live quotes are pushed into the engine by the host; this port only
/// covers what the engine pulls at startup.
pub trait MarketDataPort {
    /// Contract specification for a symbol
    fn instrument(&self, symbol: &str) -> Result<InstrumentMeta, VenueError>;

    /// Most recent closed bars for indicator warmup, oldest first.
    /// `timeframe_secs` is 60 or 300 here.
    fn recent_bars(
        &self,
        symbol: &str,
        timeframe_secs: u32,
        count: usize,
    ) -> Result<Vec<Bar>, VenueError>;
}

/// Order submission and position control.
///
/// Latency and slippage are the venue's concern; the engine accepts the
/// reported fill as truth.
pub trait ExecutionPort {
    /// Submit a market entry; returns the fill on acceptance
    fn submit_entry(&mut self, request: &EntryRequest) -> Result<Fill, VenueError>;

    /// Close part of an open position (partial profit-taking)
    fn close_partial(&mut self, symbol: &str, volume: f64) -> Result<Fill, VenueError>;

    /// Close the full open position for a symbol
    fn close_full(&mut self, symbol: &str) -> Result<Fill, VenueError>;

    /// Positions currently open at the venue
    fn open_positions(&self) -> Vec<VenuePosition>;
}
