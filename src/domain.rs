// ===============================
// src/domain.rs
// ===============================
use serde::{Deserialize, Serialize};

/// Aggressor side of a print, or our side of a paper fill.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    pub fn sign(&self) -> f64 {
        match self {
            Side::Buy => 1.0,
            Side::Sell => -1.0,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Side::Buy => "BUY",
            Side::Sell => "SELL",
        }
    }
}

/// One executed trade as reported by the venue's public tape.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Trade {
    pub ts_ms: i64,
    pub price: f64,
    pub qty: f64,
    pub side: Side,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BookLevel {
    pub px: f64,
    pub qty: f64,
}

/// Decoded top-of-book message. An absent side means the venue has no
/// resting quote there right now, not "unchanged".
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BookUpdate {
    pub market: String,
    pub bid: Option<BookLevel>,
    pub ask: Option<BookLevel>,
    pub ts_ms: Option<i64>,
    pub seq: Option<u64>,
}

/// Tick-scoped view of one market, built fresh from the stores every tick.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarketSnapshot {
    pub market: String,
    pub bid: Option<f64>,
    pub ask: Option<f64>,
    pub spread_bps: Option<f64>,
    pub tpm: f64,
    pub buy_ratio: Option<f64>,
}

/// Immutable record of one simulated execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FillEvent {
    pub id: u64,
    pub ts_ms: i64,
    pub tick: u64,
    pub market: String,
    pub side: Side,
    pub size: f64,
    pub price: f64,
    pub notional: f64,
    pub pos_after: f64,
    pub avg_price_after: f64,
    pub realized_pnl_trade: f64,
    pub realized_pnl_total: f64,
    pub cash_after: f64,
    pub equity_after: f64,
}

/// Running totals over every accepted paper fill, all markets together.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct TradeStats {
    pub fills: u64,
    /// Fills refused by the inventory cap.
    pub capped: u64,
    pub volume_base: f64,
    pub notional_usd: f64,
    pub buy_volume: f64,
    pub sell_volume: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PnlBreakdownRow {
    pub market: String,
    pub pos_base: f64,
    pub avg_price: f64,
    pub mid: Option<f64>,
    pub inventory_usd: f64,
    pub realized_pnl: f64,
}

/// Per-market equity decomposition, emitted on the stats cadence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PnlBreakdown {
    pub cash_usd: f64,
    pub equity_usd: f64,
    pub rows: Vec<PnlBreakdownRow>,
}

/// One-line account state published every tick. `focus_*` is the
/// market carrying the largest absolute position, if any.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TickSummary {
    pub cash_usd: f64,
    pub equity_usd: f64,
    pub selected: usize,
    pub focus_market: Option<String>,
    pub focus_pos: f64,
}

/// Envelope for the JSONL recorder. One object per line, tagged with
/// `kind` so the log is greppable by event type.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Event {
    Selection { tick: u64, picked: Vec<MarketSnapshot> },
    Fill(FillEvent),
    Tick { tick: u64, summary: TickSummary },
    Stats { tick: u64, stats: TradeStats },
    Breakdown { tick: u64, breakdown: PnlBreakdown },
    Note { text: String },
}
