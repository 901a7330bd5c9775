// ===============================
// src/book.rs (top-of-book store)
// ===============================
//
// Latest best bid/ask for one market, depth=1 only. Every decoded book
// message replaces the stored levels wholesale; an empty side in the
// message clears that side instead of leaving a stale price.
//
// Written only by the market's book-feed task, read by the tick loop.

use crate::domain::BookUpdate;

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct TopOfBook {
    pub bid_px: Option<f64>,
    pub bid_qty: Option<f64>,
    pub ask_px: Option<f64>,
    pub ask_qty: Option<f64>,
    pub ts_ms: Option<i64>,
    pub seq: Option<u64>,
}

impl TopOfBook {
    /// Defined only when both sides are present.
    pub fn mid(&self) -> Option<f64> {
        match (self.bid_px, self.ask_px) {
            (Some(bid), Some(ask)) => Some(0.5 * (bid + ask)),
            _ => None,
        }
    }

    /// Spread in basis points of the mid; None for a one-sided or empty book.
    pub fn spread_bps(&self) -> Option<f64> {
        let mid = self.mid()?;
        let (bid, ask) = (self.bid_px?, self.ask_px?);
        Some((ask - bid) / mid * 10_000.0)
    }

    pub fn apply(&mut self, upd: &BookUpdate) {
        match upd.bid {
            Some(level) => {
                self.bid_px = Some(level.px);
                self.bid_qty = Some(level.qty);
            }
            None => {
                self.bid_px = None;
                self.bid_qty = None;
            }
        }
        match upd.ask {
            Some(level) => {
                self.ask_px = Some(level.px);
                self.ask_qty = Some(level.qty);
            }
            None => {
                self.ask_px = None;
                self.ask_qty = None;
            }
        }
        self.ts_ms = upd.ts_ms;
        self.seq = upd.seq;
    }
}
