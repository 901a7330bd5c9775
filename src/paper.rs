// ===============================
// src/paper.rs
// ===============================
//
// Paper market-making engine. One instance holds the whole simulated
// account: cash, per-market positions with volume-weighted entry
// prices, realized PnL, a bounded fill history, and running stats.
//
// Fill model: our quote is the passive side. A printed trade with
// aggressor BUY lifts our ask when the print is at or through it
// (ask_px <= trade px); aggressor SELL hits our bid when the print is
// at or below it (bid_px >= trade px). Fill size is the smaller of the
// quoted size and the printed size. The inventory cap is checked
// against the position as it stands before the fill, so one fill may
// overshoot the cap and the next one in that direction is blocked.

use std::collections::VecDeque;

use ahash::AHashMap;

use crate::domain::{FillEvent, PnlBreakdown, PnlBreakdownRow, Side, Trade, TradeStats};
use crate::metrics;

/// Position sizes below this are treated as flat.
pub const EPS: f64 = 1e-8;

#[derive(Debug, Clone)]
pub struct PaperConfig {
    /// Quote offset from mid, per side, in basis points.
    pub half_spread_bps: f64,
    /// Quoted size per side, in USD notional at the current mid.
    pub quote_size_usd: f64,
    /// Per-market absolute inventory bound in USD.
    pub max_inventory_usd: f64,
    /// How many recent fills to keep around.
    pub fill_history: usize,
}

/// A two-sided quote around the mid, sized in base units.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Quote {
    pub bid_px: f64,
    pub ask_px: f64,
    pub qty_base: f64,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct Position {
    pub pos_base: f64,
    /// Volume-weighted entry price. Zero while flat.
    pub avg_price: f64,
    pub realized_pnl: f64,
}

pub struct PaperMM {
    cfg: PaperConfig,
    cash_usd: f64,
    positions: AHashMap<String, Position>,
    fills: VecDeque<FillEvent>,
    stats: TradeStats,
    next_fill_id: u64,
}

/// Apply one fill to a position, returning the PnL realized by it.
///
/// Extending keeps a volume-weighted entry price. Reducing realizes
/// (px - avg) against the closed quantity without touching the entry
/// price. Closing flat resets the entry price to zero. Flipping
/// realizes the whole old position and opens the remainder at the
/// fill price.
fn apply_fill(pos: &mut Position, side: Side, qty: f64, px: f64) -> f64 {
    let signed = side.sign() * qty;
    let old = pos.pos_base;
    let mut realized = 0.0;

    if old.abs() < EPS {
        pos.pos_base = signed;
        pos.avg_price = px;
    } else if old.signum() == signed.signum() {
        let new = old + signed;
        pos.avg_price = (old.abs() * pos.avg_price + qty * px) / new.abs();
        pos.pos_base = new;
    } else {
        let closed = qty.min(old.abs());
        realized = (px - pos.avg_price) * old.signum() * closed;
        let new = old + signed;
        if new.abs() < EPS {
            pos.pos_base = 0.0;
            pos.avg_price = 0.0;
        } else if new.signum() == old.signum() {
            pos.pos_base = new;
        } else {
            pos.pos_base = new;
            pos.avg_price = px;
        }
    }

    pos.realized_pnl += realized;
    realized
}

impl PaperMM {
    pub fn new(cfg: PaperConfig) -> Self {
        Self {
            cfg,
            cash_usd: 0.0,
            positions: AHashMap::new(),
            fills: VecDeque::new(),
            stats: TradeStats::default(),
            next_fill_id: 0,
        }
    }

    /// Build the quote for one market. None when there is no usable mid.
    pub fn make_quote(&self, mid: f64) -> Option<Quote> {
        if !mid.is_finite() || mid <= 0.0 {
            return None;
        }
        let off = self.cfg.half_spread_bps / 10_000.0;
        Some(Quote {
            bid_px: mid * (1.0 - off),
            ask_px: mid * (1.0 + off),
            qty_base: self.cfg.quote_size_usd / mid,
        })
    }

    /// Replay one printed trade against our standing quote. Returns the
    /// resulting fill, or None when the print does not reach the quote,
    /// the inventory cap blocks it, or the sizes degenerate to zero.
    pub fn on_trade(
        &mut self,
        now_ms: i64,
        tick: u64,
        market: &str,
        trade: &Trade,
        quote: &Quote,
        mids: &AHashMap<String, f64>,
    ) -> Option<FillEvent> {
        if !(trade.price > 0.0 && trade.qty > 0.0) {
            return None;
        }

        // We take the passive side of the print.
        let (our_side, fill_px) = match trade.side {
            Side::Buy if quote.ask_px <= trade.price => (Side::Sell, quote.ask_px),
            Side::Sell if quote.bid_px >= trade.price => (Side::Buy, quote.bid_px),
            _ => return None,
        };

        let mid = 0.5 * (quote.bid_px + quote.ask_px);
        let pos_now = self.positions.get(market).map(|p| p.pos_base).unwrap_or(0.0);
        let blocked = match our_side {
            Side::Buy => pos_now * mid >= self.cfg.max_inventory_usd,
            Side::Sell => pos_now * mid <= -self.cfg.max_inventory_usd,
        };
        if blocked {
            self.stats.capped += 1;
            metrics::FILLS_CAPPED.with_label_values(&[market]).inc();
            return None;
        }

        let qty = quote.qty_base.min(trade.qty);
        if qty < EPS {
            return None;
        }

        let pos = self.positions.entry(market.to_string()).or_default();
        let realized_trade = apply_fill(pos, our_side, qty, fill_px);
        let pos_after = pos.pos_base;
        let avg_after = pos.avg_price;
        let realized_total = pos.realized_pnl;

        let notional = qty * fill_px;
        self.cash_usd -= our_side.sign() * notional;

        self.stats.fills += 1;
        self.stats.volume_base += qty;
        self.stats.notional_usd += notional;
        match our_side {
            Side::Buy => self.stats.buy_volume += qty,
            Side::Sell => self.stats.sell_volume += qty,
        }
        metrics::FILLS
            .with_label_values(&[market, our_side.as_str()])
            .inc();

        self.next_fill_id += 1;
        let fill = FillEvent {
            id: self.next_fill_id,
            ts_ms: now_ms,
            tick,
            market: market.to_string(),
            side: our_side,
            size: qty,
            price: fill_px,
            notional,
            pos_after,
            avg_price_after: avg_after,
            realized_pnl_trade: realized_trade,
            realized_pnl_total: realized_total,
            cash_after: self.cash_usd,
            equity_after: self.mark_to_market(mids),
        };

        if self.cfg.fill_history > 0 {
            if self.fills.len() >= self.cfg.fill_history {
                self.fills.pop_front();
            }
            self.fills.push_back(fill.clone());
        }
        Some(fill)
    }

    /// Cash plus inventory marked at the given mids. Markets without a
    /// mid contribute nothing rather than poisoning the total.
    pub fn mark_to_market(&self, mids: &AHashMap<String, f64>) -> f64 {
        let mut equity = self.cash_usd;
        for (market, pos) in &self.positions {
            if pos.pos_base.abs() < EPS {
                continue;
            }
            if let Some(mid) = mids.get(market) {
                equity += pos.pos_base * mid;
            }
        }
        equity
    }

    /// Per-market PnL rows, sorted by market for stable output. Markets
    /// that are flat with nothing realized are omitted.
    pub fn pnl_breakdown(&self, mids: &AHashMap<String, f64>) -> PnlBreakdown {
        let mut rows: Vec<PnlBreakdownRow> = self
            .positions
            .iter()
            .filter(|(_, p)| p.pos_base.abs() >= EPS || p.realized_pnl.abs() >= EPS)
            .map(|(market, pos)| {
                let mid = mids.get(market).copied();
                PnlBreakdownRow {
                    market: market.clone(),
                    pos_base: pos.pos_base,
                    avg_price: pos.avg_price,
                    mid,
                    inventory_usd: mid.map(|m| pos.pos_base * m).unwrap_or(0.0),
                    realized_pnl: pos.realized_pnl,
                }
            })
            .collect();
        rows.sort_by(|a, b| a.market.cmp(&b.market));
        PnlBreakdown {
            cash_usd: self.cash_usd,
            equity_usd: self.mark_to_market(mids),
            rows,
        }
    }

    pub fn cash_usd(&self) -> f64 {
        self.cash_usd
    }

    pub fn position(&self, market: &str) -> Option<&Position> {
        self.positions.get(market)
    }

    pub fn positions(&self) -> impl Iterator<Item = (&str, &Position)> {
        self.positions.iter().map(|(m, p)| (m.as_str(), p))
    }

    pub fn realized_pnl_total(&self) -> f64 {
        self.positions.values().map(|p| p.realized_pnl).sum()
    }

    pub fn positioned_markets(&self) -> impl Iterator<Item = &str> {
        self.positions
            .iter()
            .filter(|(_, p)| p.pos_base.abs() >= EPS)
            .map(|(m, _)| m.as_str())
    }

    pub fn stats(&self) -> TradeStats {
        self.stats
    }

    pub fn recent_fills(&self) -> impl Iterator<Item = &FillEvent> {
        self.fills.iter()
    }
}
