//! Engine configuration and shared market types.
//!
//! Every threshold the fusion engine consults is configuration with an env
//! override, never a hard-coded invariant. Defaults are the values the
//! engine was tuned with; override per deployment.

use serde::{Deserialize, Serialize};

#[derive(Clone)]
pub struct Config {
    /// Candidate symbol the fusion cycle trades
    pub symbol: String,
    /// Symbols covered by the cross-venue scanner (comma list in env)
    pub scan_symbols: Vec<String>,
    /// Venues with price feeds (comma list in env)
    pub venues: Vec<String>,
    pub tick_secs: u64,
    /// Simulation mode: full cycle runs but execution is never dispatched
    pub simulation: bool,
    pub kill_file: String,

    // Signal bus / liveness
    pub consensus_threshold: f64,
    pub readiness_ratio: f64,
    pub signal_freshness_secs: u64,
    pub liveness_timeout_secs: u64,

    // Capital allocator
    pub initial_equity: f64,
    pub min_reserve_ratio: f64,
    pub harvest_ratio: f64,
    pub max_position_pct: f64,
    pub target_confidence: f64,
    pub vol_floor: f64,
    pub min_trade_usd: f64,
    pub max_trade_usd: f64,
    pub max_open_positions: usize,

    // Exposure limiter
    pub heat_global_cap: f64,
    pub heat_group_cap: f64,

    // Position ledger
    pub take_profit_pct: f64,
    pub stop_loss_pct: f64,
    pub trailing_activation_pct: f64,
    pub trailing_distance_pct: f64,

    // Arbitrage scanner
    pub arb_min_spread_pct: f64,
    pub arb_min_net_pct: f64,
    pub price_ttl_secs: u64,
    pub venue_fee_pct: f64,
    pub arb_history_capacity: usize,

    // Decision gates (static base; the learning service may tighten them)
    pub coherence_threshold: f64,
    pub confidence_threshold: f64,
    pub strict_event_required: bool,

    // Persistence
    pub sqlite_path: String,
    pub persist_base_url: Option<String>,
    pub persist_queue_capacity: usize,
    pub persist_every_secs: u64,
}

fn env_list(key: &str, default: &str) -> Vec<String> {
    std::env::var(key)
        .unwrap_or_else(|_| default.to_string())
        .split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

impl Config {
    pub fn from_env() -> Self {
        Self {
            symbol: std::env::var("SYMBOL").unwrap_or_else(|_| "BTCUSDT".to_string()),
            scan_symbols: env_list("SCAN_SYMBOLS", "BTCUSDT,ETHUSDT"),
            venues: env_list("VENUES", "binance,kraken"),
            tick_secs: std::env::var("TICK_SECS").ok().and_then(|v| v.parse().ok()).unwrap_or(60),
            simulation: std::env::var("SIMULATION").map(|v| matches!(v.to_lowercase().as_str(), "1" | "true" | "yes")).unwrap_or(true),
            kill_file: std::env::var("KILL_FILE").unwrap_or_else(|_| "/tmp/STOP".to_string()),
            consensus_threshold: std::env::var("CONSENSUS_TH").ok().and_then(|v| v.parse().ok()).unwrap_or(0.3),
            readiness_ratio: std::env::var("READINESS_RATIO").ok().and_then(|v| v.parse().ok()).unwrap_or(0.6),
            signal_freshness_secs: std::env::var("SIGNAL_FRESH_SECS").ok().and_then(|v| v.parse().ok()).unwrap_or(90),
            liveness_timeout_secs: std::env::var("LIVENESS_TIMEOUT_SECS").ok().and_then(|v| v.parse().ok()).unwrap_or(180),
            initial_equity: std::env::var("INITIAL_EQUITY").ok().and_then(|v| v.parse().ok()).unwrap_or(10_000.0),
            min_reserve_ratio: std::env::var("MIN_RESERVE_RATIO").ok().and_then(|v| v.parse().ok()).unwrap_or(0.20),
            harvest_ratio: std::env::var("HARVEST_RATIO").ok().and_then(|v| v.parse().ok()).unwrap_or(0.10),
            max_position_pct: std::env::var("MAX_POS_PCT").ok().and_then(|v| v.parse().ok()).unwrap_or(0.25),
            target_confidence: std::env::var("TARGET_CONFIDENCE").ok().and_then(|v| v.parse().ok()).unwrap_or(0.70),
            vol_floor: std::env::var("VOL_FLOOR").ok().and_then(|v| v.parse().ok()).unwrap_or(0.25),
            min_trade_usd: std::env::var("MIN_TRADE_USD").ok().and_then(|v| v.parse().ok()).unwrap_or(10.0),
            max_trade_usd: std::env::var("MAX_TRADE_USD").ok().and_then(|v| v.parse().ok()).unwrap_or(2_500.0),
            max_open_positions: std::env::var("MAX_OPEN_POSITIONS").ok().and_then(|v| v.parse().ok()).unwrap_or(5),
            heat_global_cap: std::env::var("HEAT_GLOBAL_CAP").ok().and_then(|v| v.parse().ok()).unwrap_or(0.90),
            heat_group_cap: std::env::var("HEAT_GROUP_CAP").ok().and_then(|v| v.parse().ok()).unwrap_or(0.50),
            take_profit_pct: std::env::var("TAKE_PROFIT_PCT").ok().and_then(|v| v.parse().ok()).unwrap_or(0.03),
            stop_loss_pct: std::env::var("STOP_LOSS_PCT").ok().and_then(|v| v.parse().ok()).unwrap_or(0.015),
            trailing_activation_pct: std::env::var("TRAIL_ACTIVATION_PCT").ok().and_then(|v| v.parse().ok()).unwrap_or(0.02),
            trailing_distance_pct: std::env::var("TRAIL_DISTANCE_PCT").ok().and_then(|v| v.parse().ok()).unwrap_or(0.01),
            arb_min_spread_pct: std::env::var("ARB_MIN_SPREAD_PCT").ok().and_then(|v| v.parse().ok()).unwrap_or(0.002),
            arb_min_net_pct: std::env::var("ARB_MIN_NET_PCT").ok().and_then(|v| v.parse().ok()).unwrap_or(0.0005),
            price_ttl_secs: std::env::var("PRICE_TTL_SECS").ok().and_then(|v| v.parse().ok()).unwrap_or(30),
            venue_fee_pct: std::env::var("VENUE_FEE_PCT").ok().and_then(|v| v.parse().ok()).unwrap_or(0.001),
            arb_history_capacity: std::env::var("ARB_HISTORY_CAP").ok().and_then(|v| v.parse().ok()).unwrap_or(64),
            coherence_threshold: std::env::var("COHERENCE_TH").ok().and_then(|v| v.parse().ok()).unwrap_or(0.50),
            confidence_threshold: std::env::var("CONFIDENCE_TH").ok().and_then(|v| v.parse().ok()).unwrap_or(0.55),
            strict_event_required: std::env::var("STRICT_EVENT").map(|v| matches!(v.to_lowercase().as_str(), "1" | "true" | "yes")).unwrap_or(false),
            sqlite_path: std::env::var("SQLITE_PATH").unwrap_or_else(|_| "./quorumfx.sqlite".to_string()),
            persist_base_url: std::env::var("PERSIST_BASE_URL").ok(),
            persist_queue_capacity: std::env::var("PERSIST_QUEUE_CAP").ok().and_then(|v| v.parse().ok()).unwrap_or(256),
            persist_every_secs: std::env::var("PERSIST_SECS").ok().and_then(|v| v.parse().ok()).unwrap_or(300),
        }
    }

    pub fn sleep_until_next_tick(&self, now_ts: u64) -> u64 {
        let next = ((now_ts / self.tick_secs) + 1) * self.tick_secs;
        next.saturating_sub(now_ts)
    }
}

pub fn now_ts() -> u64 {
    chrono::Utc::now().timestamp() as u64
}

/// One cycle's view of the market for a symbol, supplied by the feed.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MarketSnapshot {
    pub price: f64,
    pub volume: f64,
    /// Normalized volatility estimate in [0, 1]
    pub volatility: f64,
    /// Signed momentum estimate, roughly in [-1, 1]
    pub momentum: f64,
    pub spread: f64,
    pub ts: u64,
}

impl MarketSnapshot {
    pub fn is_stale(&self, now_ts: u64, max_age_secs: u64) -> bool {
        if self.ts == 0 {
            return true;
        }
        now_ts.saturating_sub(self.ts) > max_age_secs
    }
}
