//! Simulated execution venue for paper trading and tests
//!
//! Fills market requests at the current quote plus configured slippage and
//! tracks open positions the way a broker report would. Rejections can be
//! injected to exercise the order-failure paths.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use tracing::{debug, info};

use super::port::{
    EntryRequest, ExecutionPort, Fill, MarketDataPort, VenueError, VenuePosition,
};
use crate::types::{Bar, Direction, InstrumentMeta, Tick};

/// In-memory venue with instantaneous fills
pub struct SimVenue {
    instruments: HashMap<String, InstrumentMeta>,
    quotes: HashMap<String, Tick>,
    warmup_bars: HashMap<(String, u32), Vec<Bar>>,
    positions: HashMap<String, VenuePosition>,
    /// Slippage applied to every fill, in pips of the filled instrument
    slippage_pips: f64,
    inject_entry_error: Option<VenueError>,
    inject_close_error: Option<VenueError>,
}

impl SimVenue {
    pub fn new(instruments: Vec<InstrumentMeta>, slippage_pips: f64) -> Self {
        Self {
            instruments: instruments
                .into_iter()
                .map(|meta| (meta.symbol.clone(), meta))
                .collect(),
            quotes: HashMap::new(),
            warmup_bars: HashMap::new(),
            positions: HashMap::new(),
            slippage_pips,
            inject_entry_error: None,
            inject_close_error: None,
        }
    }

    /// Push the latest quote; fills reference the most recent one
    pub fn update_quote(&mut self, symbol: &str, tick: Tick) {
        self.quotes.insert(symbol.to_string(), tick);
    }

    /// Seed warmup history served through `MarketDataPort::recent_bars`
    pub fn seed_bars(&mut self, symbol: &str, timeframe_secs: u32, bars: Vec<Bar>) {
        self.warmup_bars
            .insert((symbol.to_string(), timeframe_secs), bars);
    }

    /// Pre-load an open position (restart-recovery scenarios)
    pub fn adopt_position(&mut self, position: VenuePosition) {
        self.positions.insert(position.symbol.clone(), position);
    }

    /// Reject the next entry with the given venue code
    pub fn fail_next_entry(&mut self, code: i32, message: &str) {
        self.inject_entry_error = Some(VenueError {
            code,
            message: message.to_string(),
        });
    }

    /// Reject the next close request with the given venue code
    pub fn fail_next_close(&mut self, code: i32, message: &str) {
        self.inject_close_error = Some(VenueError {
            code,
            message: message.to_string(),
        });
    }

    fn quote(&self, symbol: &str) -> Result<&Tick, VenueError> {
        self.quotes.get(symbol).ok_or_else(|| VenueError {
            code: 136,
            message: format!("no quote for {}", symbol),
        })
    }

    fn slippage_price(&self, symbol: &str) -> f64 {
        self.instruments
            .get(symbol)
            .map(|meta| meta.to_price(self.slippage_pips))
            .unwrap_or(0.0)
    }

    fn fill_at(&self, symbol: &str, direction: Direction, timestamp: DateTime<Utc>, volume: f64) -> Result<Fill, VenueError> {
        let tick = self.quote(symbol)?;
        let slip = self.slippage_price(symbol);
        // Buys pay up, sells pay down
        let price = if direction.is_buy() {
            tick.ask + slip
        } else {
            tick.bid - slip
        };
        Ok(Fill {
            price,
            volume,
            timestamp,
        })
    }
}

impl MarketDataPort for SimVenue {
    fn instrument(&self, symbol: &str) -> Result<InstrumentMeta, VenueError> {
        self.instruments.get(symbol).cloned().ok_or_else(|| VenueError {
            code: 4106,
            message: format!("unknown symbol {}", symbol),
        })
    }

    fn recent_bars(
        &self,
        symbol: &str,
        timeframe_secs: u32,
        count: usize,
    ) -> Result<Vec<Bar>, VenueError> {
        let bars = self
            .warmup_bars
            .get(&(symbol.to_string(), timeframe_secs))
            .cloned()
            .unwrap_or_default();
        let start = bars.len().saturating_sub(count);
        Ok(bars[start..].to_vec())
    }
}

impl ExecutionPort for SimVenue {
    fn submit_entry(&mut self, request: &EntryRequest) -> Result<Fill, VenueError> {
        if let Some(err) = self.inject_entry_error.take() {
            debug!("SimVenue rejecting entry for {}: {}", request.symbol, err);
            return Err(err);
        }
        if self.slippage_pips > request.max_slippage_pips {
            return Err(VenueError {
                code: 138,
                message: format!(
                    "fill deviation {:.1} pips exceeds allowed {:.1}",
                    self.slippage_pips, request.max_slippage_pips
                ),
            });
        }

        let tick = self.quote(&request.symbol)?;
        let timestamp = tick.timestamp;
        let fill = self.fill_at(&request.symbol, request.direction, timestamp, request.volume)?;

        self.positions.insert(
            request.symbol.clone(),
            VenuePosition {
                symbol: request.symbol.clone(),
                direction: request.direction,
                volume: request.volume,
                entry_price: fill.price,
                opened_at: fill.timestamp,
                stop_price: None,
            },
        );

        info!(
            "SIM FILL: {} {} {:.2} @ {:.2} [{}]",
            request.direction, request.symbol, request.volume, fill.price, request.tag
        );
        Ok(fill)
    }

    fn close_partial(&mut self, symbol: &str, volume: f64) -> Result<Fill, VenueError> {
        if let Some(err) = self.inject_close_error.take() {
            return Err(err);
        }

        let position = self.positions.get_mut(symbol).ok_or_else(|| VenueError {
            code: 4108,
            message: format!("no open position for {}", symbol),
        })?;
        if volume >= position.volume {
            return Err(VenueError {
                code: 131,
                message: "partial close volume exceeds position".to_string(),
            });
        }

        let direction = position.direction;
        position.volume -= volume;
        let timestamp = self.quote(symbol)?.timestamp;
        // Closing trades on the opposite side of the book
        self.fill_at(symbol, direction.opposite(), timestamp, volume)
    }

    fn close_full(&mut self, symbol: &str) -> Result<Fill, VenueError> {
        if let Some(err) = self.inject_close_error.take() {
            return Err(err);
        }

        let position = self.positions.remove(symbol).ok_or_else(|| VenueError {
            code: 4108,
            message: format!("no open position for {}", symbol),
        })?;
        let timestamp = self.quote(symbol)?.timestamp;
        self.fill_at(symbol, position.direction.opposite(), timestamp, position.volume)
    }

    fn open_positions(&self) -> Vec<VenuePosition> {
        self.positions.values().cloned().collect()
    }
}
