// Library crate - exports the decision core, venue ports and adapters

pub mod advisory;
pub mod config;
pub mod execution;
pub mod persist;
pub mod strategy;
pub mod types;

// Re-export commonly used types
pub use config::{AdvisoryConfig, EngineConfig, InstrumentConfig, SessionWindow};
pub use strategy::{Engine, EngineEvent, HaltReason, RiskState};
pub use types::*;
