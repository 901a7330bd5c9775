// ===============================
// src/config.rs
// ===============================
//
// Every knob is a CLI flag and an environment variable with a sane
// default, so `cargo run` works bare and deployments can be driven
// entirely from the environment (.env is loaded first).

use clap::{Parser, ValueEnum};
use dotenvy::dotenv;

use crate::paper::PaperConfig;
use crate::selector::SelectorConfig;

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum FeedMode {
    /// Live public streams from the Extended exchange.
    Extended,
    /// Offline random-walk generator.
    Mock,
}

impl FeedMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            FeedMode::Extended => "extended",
            FeedMode::Mock => "mock",
        }
    }
}

#[derive(Debug, Parser)]
#[command(
    name = "extended-mm-bot",
    version,
    about = "paper market maker on Extended public streams"
)]
pub struct Cli {
    /// Comma-separated perpetual markets to stream and quote.
    #[arg(long, env = "MARKETS", value_delimiter = ',', default_value = "BTC-USD,ETH-USD,SOL-USD")]
    pub markets: Vec<String>,

    #[arg(long, env = "FEED_MODE", value_enum, ignore_case = true, default_value = "extended")]
    pub feed_mode: FeedMode,

    /// WebSocket host for the public streams.
    #[arg(long, env = "WS_HOST", default_value = "wss://api.starknet.extended.exchange")]
    pub ws_host: String,

    /// Order book depth to subscribe; only the best level is used.
    #[arg(long, env = "BOOK_DEPTH", default_value_t = 1)]
    pub book_depth: u32,

    #[arg(long, env = "USER_AGENT", default_value = "extended-mm-bot/0.3")]
    pub user_agent: String,

    /// Tick loop period in seconds.
    #[arg(long, env = "TICK_SECONDS", default_value_t = 1.0)]
    pub tick_seconds: f64,

    /// Emit stats and the PnL breakdown every N ticks.
    #[arg(long, env = "STATS_EVERY", default_value_t = 30)]
    pub stats_every: u64,

    /// Trades kept per market for activity and replay queries.
    #[arg(long, env = "TAPE_CAPACITY", default_value_t = 5000)]
    pub tape_capacity: usize,

    /// Window for trades-per-minute and buy-ratio, in seconds.
    #[arg(long, env = "ACTIVITY_WINDOW_SECS", default_value_t = 60.0)]
    pub activity_window_secs: f64,

    /// Minimum spread a market must show to be quotable, in bps.
    #[arg(long, env = "MIN_SPREAD_BPS", default_value_t = 1.0)]
    pub min_spread_bps: f64,

    /// Minimum trades-per-minute for a market to count as active.
    #[arg(long, env = "MIN_TPM", default_value_t = 5.0)]
    pub min_tpm: f64,

    /// Quote at most this many markets per tick.
    #[arg(long, env = "TOP_N", default_value_t = 3)]
    pub top_n: usize,

    /// Our quote offset from mid, per side, in bps.
    #[arg(long, env = "HALF_SPREAD_BPS", default_value_t = 5.0)]
    pub half_spread_bps: f64,

    /// Quoted size per side in USD notional.
    #[arg(long, env = "QUOTE_SIZE_USD", default_value_t = 100.0)]
    pub quote_size_usd: f64,

    /// Per-market absolute inventory bound in USD.
    #[arg(long, env = "MAX_INVENTORY_USD", default_value_t = 2000.0)]
    pub max_inventory_usd: f64,

    /// Recent fills kept in memory.
    #[arg(long, env = "FILL_HISTORY", default_value_t = 200)]
    pub fill_history: usize,

    /// JSONL event log path; recording is off when unset.
    #[arg(long, env = "RECORD_FILE")]
    pub record_file: Option<String>,

    #[arg(long, env = "METRICS_PORT", default_value_t = 9898)]
    pub metrics_port: u16,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub markets: Vec<String>,
    pub feed_mode: FeedMode,
    pub ws_host: String,
    pub book_depth: u32,
    pub user_agent: String,
    pub tick_seconds: f64,
    pub stats_every: u64,
    pub tape_capacity: usize,
    pub activity_window_secs: f64,
    pub selector: SelectorConfig,
    pub paper: PaperConfig,
    pub record_file: Option<String>,
    pub metrics_port: u16,
}

impl Config {
    pub fn from_cli(cli: Cli) -> Self {
        let mut markets: Vec<String> = cli
            .markets
            .iter()
            .map(|m| m.trim().to_ascii_uppercase())
            .filter(|m| !m.is_empty())
            .collect();
        if markets.is_empty() {
            markets = vec![
                "BTC-USD".to_string(),
                "ETH-USD".to_string(),
                "SOL-USD".to_string(),
            ];
        }
        Self {
            markets,
            feed_mode: cli.feed_mode,
            ws_host: cli.ws_host,
            book_depth: cli.book_depth.max(1),
            user_agent: cli.user_agent,
            tick_seconds: if cli.tick_seconds.is_finite() {
                cli.tick_seconds.max(0.05)
            } else {
                1.0
            },
            stats_every: cli.stats_every.max(1),
            tape_capacity: cli.tape_capacity.max(1),
            activity_window_secs: if cli.activity_window_secs.is_finite() {
                cli.activity_window_secs.max(1.0)
            } else {
                60.0
            },
            selector: SelectorConfig {
                min_spread_bps: cli.min_spread_bps,
                min_tpm: cli.min_tpm,
                top_n: cli.top_n,
            },
            paper: PaperConfig {
                half_spread_bps: cli.half_spread_bps,
                quote_size_usd: cli.quote_size_usd,
                max_inventory_usd: cli.max_inventory_usd,
                fill_history: cli.fill_history,
            },
            record_file: cli.record_file,
            metrics_port: cli.metrics_port,
        }
    }
}

pub fn load() -> Config {
    // .env first so the env-backed flags see it.
    let _ = dotenv();
    Config::from_cli(Cli::parse())
}
