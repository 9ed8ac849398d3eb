//! Advisory (external override) client
//!
//! Periodic-refresh adapter around the remote override service. Refreshes
//! are rate-limited to the configured interval and carry a bounded
//! timeout; any failure keeps the previous cached state and never raises
//! a trading halt on its own.

use anyhow::{Context, Result};
use chrono::{DateTime, Duration, Utc};
use reqwest::Client;
use tracing::{debug, info, warn};

use super::models::{parse_response, AdvisoryRequest, AdvisoryState};
use crate::config::AdvisoryConfig;

pub struct AdvisoryClient {
    config: AdvisoryConfig,
    client: Client,
    state: AdvisoryState,
    last_attempt: Option<DateTime<Utc>>,
}

impl AdvisoryClient {
    pub fn new(config: AdvisoryConfig) -> Self {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(config.timeout_secs))
            .build()
            .expect("Failed to create HTTP client");
        Self {
            config,
            client,
            state: AdvisoryState::default(),
            last_attempt: None,
        }
    }

    pub fn state(&self) -> &AdvisoryState {
        &self.state
    }

    pub fn is_enabled(&self) -> bool {
        self.config.enabled && !self.config.url.is_empty()
    }

    /// Whether the pause override is currently requested
    pub fn pause_requested(&self) -> bool {
        self.is_enabled() && self.state.pause
    }

    /// Scale the configured per-trade risk by the cached multiplier,
    /// clamped into the configured band so a misbehaving response can
    /// neither eliminate nor explode position risk.
    pub fn effective_risk_percent(&self, base_risk_percent: f64) -> f64 {
        if !self.is_enabled() {
            return base_risk_percent;
        }
        let mult = self
            .state
            .risk_multiplier
            .clamp(self.config.mult_floor, self.config.mult_ceiling);
        base_risk_percent * mult
    }

    /// True when the refresh interval has elapsed since the last attempt
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        match self.last_attempt {
            Some(last) => now - last >= Duration::seconds(self.config.interval_secs as i64),
            None => true,
        }
    }

    /// Refresh the cached state if the interval has elapsed. Returns true
    /// when a successful refresh happened. Failures are logged and leave
    /// the cache untouched.
    pub async fn refresh_if_due(
        &mut self,
        now: DateTime<Utc>,
        equity: f64,
        daily_pnl: f64,
        drawdown_pct: f64,
    ) -> bool {
        if !self.is_enabled() || !self.is_due(now) {
            return false;
        }
        self.last_attempt = Some(now);

        match self.fetch(equity, daily_pnl, drawdown_pct).await {
            Ok((pause, risk_multiplier, regime)) => {
                if pause != self.state.pause || regime != self.state.regime {
                    info!(
                        "Advisory update: regime={} pause={} mult={:.2}",
                        regime, pause, risk_multiplier
                    );
                } else {
                    debug!("Advisory refresh: no change (regime={})", regime);
                }
                self.state.pause = pause;
                self.state.risk_multiplier = risk_multiplier;
                self.state.regime = regime;
                self.state.last_update = Some(now);
                true
            }
            Err(e) => {
                // Non-fatal: stale state is reused until the next interval
                warn!("Advisory refresh failed (keeping cached state): {:#}", e);
                false
            }
        }
    }

    async fn fetch(
        &self,
        equity: f64,
        daily_pnl: f64,
        drawdown_pct: f64,
    ) -> Result<(bool, f64, String)> {
        let request = AdvisoryRequest {
            equity,
            daily_pnl,
            dd: drawdown_pct,
        };

        let response = self
            .client
            .post(&self.config.url)
            .json(&request)
            .send()
            .await
            .context("Failed to send advisory request")?;

        let status = response.status();
        if !status.is_success() {
            anyhow::bail!("Advisory returned status {}", status);
        }

        let body = response
            .text()
            .await
            .context("Failed to read advisory response body")?;
        parse_response(&body).context("Advisory response is not a JSON object")
    }
}
