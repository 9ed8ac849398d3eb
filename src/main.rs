//! Paper-trading runner
//!
//! Drives the engine against a synthetic random-walk quote feed and the
//! simulated venue, so the whole decision path - signals, sizing,
//! lifecycle, governor, telemetry - runs without a vendor connection.

use anyhow::Result;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use clap::Parser;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::{Distribution, Normal};
use std::path::PathBuf;
use tracing::{info, warn};

use rangebreak::advisory::AdvisoryClient;
use rangebreak::config::{EngineConfig, SessionWindow};
use rangebreak::execution::SimVenue;
use rangebreak::persist;
use rangebreak::strategy::{Engine, EngineEvent, FiveMinuteRoller, TickBarAggregator};
use rangebreak::types::{Bar, InstrumentMeta, Tick};

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Engine configuration file (JSON); paper defaults when omitted
    #[arg(short, long, env = "RANGEBREAK_CONFIG")]
    config: Option<PathBuf>,

    /// Starting balance for the paper account
    #[arg(short, long, default_value = "25000.0")]
    balance: f64,

    /// Simulated session length in minutes
    #[arg(short, long, default_value = "120")]
    minutes: i64,

    /// Venue fill slippage in pips
    #[arg(long, default_value = "0.5")]
    slippage: f64,

    /// Random seed for a repeatable run
    #[arg(long)]
    seed: Option<u64>,
}

/// Random-walk quote generator for one instrument
struct SyntheticFeed {
    symbol: String,
    price: f64,
    half_spread: f64,
    step: Normal<f64>,
    rng: StdRng,
    aggregator: TickBarAggregator,
    /// Seconds of burst activity remaining
    burst: u32,
}

impl SyntheticFeed {
    fn new(symbol: &str, start_price: f64, half_spread: f64, seed: u64) -> Self {
        Self {
            symbol: symbol.to_string(),
            price: start_price,
            half_spread,
            step: Normal::new(0.0, 0.04).expect("valid distribution"),
            rng: StdRng::seed_from_u64(seed),
            aggregator: TickBarAggregator::new(),
            burst: 0,
        }
    }

    /// Ticks for one simulated second. Mostly a slow drip; occasionally a
    /// directional burst that gives the velocity gate something real.
    fn second(&mut self, at: DateTime<Utc>) -> Vec<Tick> {
        if self.burst == 0 && self.rng.gen_bool(0.01) {
            self.burst = 3;
        }

        let (count, drift) = if self.burst > 0 {
            self.burst -= 1;
            let direction = if self.rng.gen_bool(0.5) { 1.0 } else { -1.0 };
            (self.rng.gen_range(8..14), direction * 0.06)
        } else {
            (self.rng.gen_range(1..4), 0.0)
        };

        let mut ticks = Vec::with_capacity(count);
        for i in 0..count {
            self.price += self.step.sample(&mut self.rng) + drift;
            let timestamp = at + ChronoDuration::milliseconds((i * 1000 / count) as i64);
            ticks.push(Tick {
                timestamp,
                bid: self.price - self.half_spread,
                ask: self.price + self.half_spread,
            });
        }
        ticks
    }
}

/// Session-agnostic defaults for a demo run
fn paper_config() -> EngineConfig {
    EngineConfig {
        session_timezone: "UTC".to_string(),
        sessions: vec![SessionWindow {
            label: "paper".to_string(),
            start_hour: 0,
            start_minute: 0,
            end_hour: 23,
            end_minute: 59,
        }],
        ..EngineConfig::default()
    }
}

fn gold_meta(symbol: &str) -> InstrumentMeta {
    InstrumentMeta {
        symbol: symbol.to_string(),
        pip_size: 0.1,
        tick_size: 0.01,
        tick_value: 0.1,
        volume_min: 0.01,
        volume_max: 50.0,
        volume_step: 0.01,
    }
}

/// Generate warmup history by running the walk for `minutes` before `end`
fn warmup_bars(feed: &mut SyntheticFeed, end: DateTime<Utc>, minutes: i64) -> (Vec<Bar>, Vec<Bar>) {
    let mut minute_bars = Vec::new();
    let mut five_minute_bars = Vec::new();
    let mut roller = FiveMinuteRoller::new();
    let mut aggregator = TickBarAggregator::new();
    let start = end - ChronoDuration::minutes(minutes);

    for second in 0..minutes * 60 {
        let at = start + ChronoDuration::seconds(second);
        for tick in feed.second(at) {
            if let Some(bar) = aggregator.process_tick(&tick) {
                if let Some(five) = roller.push(&bar) {
                    five_minute_bars.push(five);
                }
                minute_bars.push(bar);
            }
        }
    }
    (minute_bars, five_minute_bars)
}

fn log_event(event: &EngineEvent) {
    match event {
        EngineEvent::Entry {
            symbol,
            direction,
            price,
            volume,
            stop,
            tp1,
            tp2,
            drawdown_pct,
        } => info!(
            "[ENTRY] {} {} {:.2} @ {:.2} stop {:.2} tp1 {:.2} tp2 {:.2} (dd {:.2}%)",
            symbol, direction, volume, price, stop, tp1, tp2, drawdown_pct
        ),
        EngineEvent::PartialExit {
            symbol,
            price,
            closed_volume,
            pnl,
            drawdown_pct,
        } => info!(
            "[TP1] {} closed {:.2} @ {:.2} for ${:+.2} (dd {:.2}%)",
            symbol, closed_volume, price, pnl, drawdown_pct
        ),
        EngineEvent::Exit {
            symbol,
            kind,
            price,
            trade_pnl,
            drawdown_pct,
        } => info!(
            "[{}] {} @ {:.2} for ${:+.2} (dd {:.2}%)",
            kind, symbol, price, trade_pnl, drawdown_pct
        ),
        EngineEvent::Skip {
            symbol,
            reason,
            drawdown_pct,
        } => info!("[SKIP] {}: {} (dd {:.2}%)", symbol, reason, drawdown_pct),
        EngineEvent::OrderFail {
            symbol,
            code,
            message,
        } => warn!("[ORDER_FAIL] {}: {} ({})", symbol, message, code),
        EngineEvent::ExitFail {
            symbol,
            code,
            message,
        } => warn!("[EXIT_FAIL] {}: {} ({})", symbol, message, code),
        EngineEvent::Halted { reason } => warn!("[HALT] {}", reason),
        EngineEvent::Resumed => info!("[RESUME] halt cleared"),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("rangebreak=info".parse().unwrap()),
        )
        .init();

    let args = Args::parse();

    let config = match &args.config {
        Some(path) => EngineConfig::from_file(path)?,
        None => paper_config(),
    };

    info!("Starting rangebreak paper session");
    info!(
        "Balance: ${:.2} | Instruments: {} | Duration: {} min",
        args.balance,
        config.instruments.len(),
        args.minutes
    );

    let now = Utc::now();
    let seed = args.seed.unwrap_or_else(|| now.timestamp() as u64);

    // One synthetic feed per enabled instrument, plus venue warmup history
    let mut feeds = Vec::new();
    let mut metas = Vec::new();
    for (i, instrument) in config.instruments.iter().filter(|c| c.enabled).enumerate() {
        metas.push(gold_meta(&instrument.symbol));
        feeds.push(SyntheticFeed::new(
            &instrument.symbol,
            2000.0,
            0.15,
            seed.wrapping_add(i as u64),
        ));
    }

    let mut venue = SimVenue::new(metas, args.slippage);
    for feed in &mut feeds {
        let symbol = feed.symbol.clone();
        let (minute, five) = warmup_bars(feed, now, 360);
        venue.seed_bars(&symbol, 60, minute);
        venue.seed_bars(&symbol, 300, five);
        let tick = Tick {
            timestamp: now,
            bid: feed.price - feed.half_spread,
            ask: feed.price + feed.half_spread,
        };
        venue.update_quote(&symbol, tick);
    }

    let prior_state = config
        .snapshot_path
        .as_deref()
        .and_then(persist::load_risk_state);

    let mut engine = Engine::new(config.clone(), args.balance, now, &venue, prior_state)?;
    engine.reconcile_positions(&venue);

    let mut advisory = AdvisoryClient::new(config.advisory.clone());
    let mut events = engine.subscribe();
    let status_every = config.status_interval_secs.max(1);

    for second in 0..args.minutes * 60 {
        let at = now + ChronoDuration::seconds(second);

        for feed in &mut feeds {
            let symbol = feed.symbol.clone();
            for tick in feed.second(at) {
                if let Some(bar) = feed.aggregator.process_tick(&tick) {
                    engine.on_bar(&symbol, bar);
                }
                venue.update_quote(&symbol, tick);
                engine.on_tick(&symbol, tick, &mut venue, &advisory);
            }
        }

        // The advisory refresh is the only path with external latency; it
        // runs outside the per-tick loop on its own rate limit.
        let (daily_pnl, drawdown_pct) = {
            let state = engine.governor().state();
            (state.daily_pnl, state.daily_drawdown_pct)
        };
        advisory
            .refresh_if_due(at, engine.equity(), daily_pnl, drawdown_pct)
            .await;

        while let Ok(event) = events.try_recv() {
            log_event(&event);
        }

        if second > 0 && second % status_every == 0 {
            info!("{}", engine.status());
        }
    }

    info!("Session complete");
    info!("{}", engine.status());
    Ok(())
}
