//! Venue interfaces and the simulated venue
//!
//! The decision core depends only on the two narrow ports defined here;
//! concrete broker adapters live behind them.

mod port;
mod sim;

pub use port::{
    EntryRequest, ExecutionPort, Fill, MarketDataPort, VenueError, VenuePosition,
};
pub use sim::SimVenue;
