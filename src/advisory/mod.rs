//! External override (advisory) service adapter

mod client;
mod models;

pub use client::AdvisoryClient;
pub use models::{parse_response, AdvisoryRequest, AdvisoryState};
