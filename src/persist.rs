//! Risk-state snapshot persistence
//!
//! The in-memory risk counters are the only state worth surviving a
//! restart: open positions are recovered from the venue itself, but the
//! day's loss accounting would otherwise silently start from zero. The
//! snapshot is small JSON, written after every closure and rollover.

use std::path::Path;

use anyhow::{Context, Result};
use tracing::{info, warn};

use crate::strategy::RiskState;

pub fn save_risk_state(path: &Path, state: &RiskState) -> Result<()> {
    let json = serde_json::to_string_pretty(state).context("Failed to serialize risk state")?;
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create snapshot dir {}", parent.display()))?;
        }
    }
    std::fs::write(path, json)
        .with_context(|| format!("Failed to write snapshot {}", path.display()))
}

/// Load a prior snapshot. A missing file is a clean start, not an error;
/// an unreadable one is logged and ignored rather than blocking startup.
pub fn load_risk_state(path: &Path) -> Option<RiskState> {
    if !path.exists() {
        return None;
    }
    let result: Result<RiskState> = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read snapshot {}", path.display()))
        .and_then(|raw| {
            serde_json::from_str(&raw)
                .with_context(|| format!("Failed to parse snapshot {}", path.display()))
        });

    match result {
        Ok(state) => {
            info!(
                "Resuming risk state from {} (day {}, equity {:.2})",
                path.display(),
                state.daily_start_date,
                state.current_equity
            );
            Some(state)
        }
        Err(e) => {
            warn!("Ignoring unusable snapshot: {:#}", e);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use std::collections::HashMap;

    fn sample_state() -> RiskState {
        RiskState {
            start_equity: 25_000.0,
            daily_start_equity: 24_800.0,
            daily_start_date: NaiveDate::from_ymd_opt(2025, 3, 10).unwrap(),
            consecutive_losses: 2,
            trades_today: 4,
            wins_today: 1,
            daily_pnl: -200.0,
            daily_drawdown_pct: -0.8,
            total_drawdown_pct: -1.6,
            current_equity: 24_600.0,
            last_global_entry: None,
            last_entry_by_symbol: HashMap::new(),
        }
    }

    #[test]
    fn test_round_trip() {
        let dir = std::env::temp_dir().join("rangebreak-persist-test");
        let path = dir.join("risk_state.json");
        let _ = std::fs::remove_file(&path);

        let state = sample_state();
        save_risk_state(&path, &state).unwrap();

        let loaded = load_risk_state(&path).unwrap();
        assert_eq!(loaded.consecutive_losses, 2);
        assert_eq!(loaded.daily_start_date, state.daily_start_date);
        assert!((loaded.daily_pnl + 200.0).abs() < 1e-9);

        std::fs::remove_file(&path).unwrap();
    }

    #[test]
    fn test_missing_file_is_clean_start() {
        let path = std::env::temp_dir().join("rangebreak-no-such-snapshot.json");
        assert!(load_risk_state(&path).is_none());
    }

    #[test]
    fn test_corrupt_file_is_ignored() {
        let dir = std::env::temp_dir().join("rangebreak-persist-test");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("corrupt.json");
        std::fs::write(&path, "{not json").unwrap();

        assert!(load_risk_state(&path).is_none());
        std::fs::remove_file(&path).unwrap();
    }
}
