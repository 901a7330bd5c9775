// ===============================
// src/tape.rs (bounded trade tape)
// ===============================
//
// Ring buffer of public prints for one market, oldest evicted first.
// Timestamps are trusted to arrive non-decreasing, which lets every
// windowed query scan newest-backward and stop at the first entry older
// than the cutoff. Each entry is stamped with an insertion sequence so
// the tick loop can replay "everything newer than what I already
// processed" without double-counting across overlapping windows.
//
// Written only by the market's trade-feed task, read by the tick loop.

use std::collections::VecDeque;

use crate::domain::{Side, Trade};

pub const DEFAULT_CAPACITY: usize = 5000;

#[derive(Debug, Clone, Copy)]
struct Entry {
    seq: u64,
    trade: Trade,
}

#[derive(Debug)]
pub struct TradeTape {
    entries: VecDeque<Entry>,
    capacity: usize,
    next_seq: u64,
    pub last_ts_ms: Option<i64>,
}

impl Default for TradeTape {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }
}

impl TradeTape {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            entries: VecDeque::with_capacity(capacity.min(DEFAULT_CAPACITY)),
            capacity: capacity.max(1),
            next_seq: 0,
            last_ts_ms: None,
        }
    }

    /// O(1) append; evicts the oldest entry once capacity is reached.
    /// Returns the sequence number assigned to this trade.
    pub fn add(&mut self, trade: Trade) -> u64 {
        if self.entries.len() == self.capacity {
            self.entries.pop_front();
        }
        self.next_seq += 1;
        let seq = self.next_seq;
        self.last_ts_ms = Some(trade.ts_ms);
        self.entries.push_back(Entry { seq, trade });
        seq
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Count of prints in the lookback window. With the usual one-minute
    /// lookback the raw count reads directly as trades-per-minute.
    pub fn trades_per_min(&self, now_ms: i64, lookback_ms: i64) -> f64 {
        let cutoff = now_ms - lookback_ms;
        let mut count = 0u64;
        for e in self.entries.iter().rev() {
            if e.trade.ts_ms < cutoff {
                break;
            }
            count += 1;
        }
        count as f64
    }

    /// Fraction of windowed prints whose aggressor was a buyer.
    /// None when the window is empty: "no data" is not 0.
    pub fn buy_ratio(&self, now_ms: i64, lookback_ms: i64) -> Option<f64> {
        let cutoff = now_ms - lookback_ms;
        let mut buys = 0u64;
        let mut sells = 0u64;
        for e in self.entries.iter().rev() {
            if e.trade.ts_ms < cutoff {
                break;
            }
            match e.trade.side {
                Side::Buy => buys += 1,
                Side::Sell => sells += 1,
            }
        }
        let total = buys + sells;
        if total == 0 {
            return None;
        }
        Some(buys as f64 / total as f64)
    }

    /// Prints from the last `seconds`, oldest first. Pure query: calling
    /// it every tick with an overlapping window returns the overlap again.
    pub fn recent(&self, seconds: f64, now_ms: i64) -> Vec<Trade> {
        let cutoff = now_ms - (seconds * 1000.0) as i64;
        let mut out: Vec<Trade> = Vec::new();
        for e in self.entries.iter().rev() {
            if e.trade.ts_ms < cutoff {
                break;
            }
            out.push(e.trade);
        }
        out.reverse();
        out
    }

    /// Windowed prints strictly newer (by insertion sequence) than
    /// `after_seq`, oldest first. The caller keeps the highest sequence
    /// it has seen and passes it back, so overlapping windows never
    /// replay the same print twice.
    pub fn recent_since(&self, after_seq: u64, seconds: f64, now_ms: i64) -> Vec<(u64, Trade)> {
        let cutoff = now_ms - (seconds * 1000.0) as i64;
        let mut out: Vec<(u64, Trade)> = Vec::new();
        for e in self.entries.iter().rev() {
            if e.trade.ts_ms < cutoff || e.seq <= after_seq {
                break;
            }
            out.push((e.seq, e.trade));
        }
        out.reverse();
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn trade(ts_ms: i64, price: f64, qty: f64, side: Side) -> Trade {
        Trade { ts_ms, price, qty, side }
    }

    #[test]
    fn add_evicts_oldest_at_capacity() {
        let mut tape = TradeTape::with_capacity(3);
        for i in 0..5 {
            tape.add(trade(1000 + i, 100.0 + i as f64, 1.0, Side::Buy));
        }
        assert_eq!(tape.len(), 3);
        let all = tape.recent(60.0, 2000);
        assert_eq!(all.len(), 3);
        assert_eq!(all[0].price, 102.0);
        assert_eq!(all[2].price, 104.0);
        assert_eq!(tape.last_ts_ms, Some(1004));
    }

    #[test]
    fn trades_per_min_honors_cutoff() {
        let mut tape = TradeTape::default();
        let now = 120_000;
        tape.add(trade(now - 90_000, 100.0, 1.0, Side::Buy)); // outside
        tape.add(trade(now - 50_000, 100.0, 1.0, Side::Sell));
        tape.add(trade(now - 10_000, 100.0, 1.0, Side::Buy));
        assert_eq!(tape.trades_per_min(now, 60_000), 2.0);
        assert_eq!(tape.trades_per_min(now, 5_000), 0.0);
    }

    #[test]
    fn buy_ratio_is_none_on_empty_window() {
        let mut tape = TradeTape::default();
        let now = 120_000;
        assert_eq!(tape.buy_ratio(now, 60_000), None);

        tape.add(trade(now - 90_000, 100.0, 1.0, Side::Buy)); // outside window
        assert_eq!(tape.buy_ratio(now, 60_000), None);

        tape.add(trade(now - 30_000, 100.0, 1.0, Side::Buy));
        tape.add(trade(now - 20_000, 100.0, 1.0, Side::Buy));
        tape.add(trade(now - 10_000, 100.0, 1.0, Side::Sell));
        let ratio = tape.buy_ratio(now, 60_000).unwrap();
        assert!((ratio - 2.0 / 3.0).abs() < 1e-12);
    }

    #[test]
    fn recent_is_oldest_first_and_repeats_overlap() {
        let mut tape = TradeTape::default();
        let now = 100_000;
        tape.add(trade(now - 5_000, 101.0, 1.0, Side::Buy));
        tape.add(trade(now - 3_000, 102.0, 1.0, Side::Sell));
        tape.add(trade(now - 1_000, 103.0, 1.0, Side::Buy));

        let window = tape.recent(4.0, now);
        assert_eq!(window.len(), 2);
        assert_eq!(window[0].price, 102.0);
        assert_eq!(window[1].price, 103.0);

        // Same call again sees the same prints: dedup is the caller's job.
        let again = tape.recent(4.0, now);
        assert_eq!(window, again);
    }

    #[test]
    fn recent_since_skips_already_seen_seqs() {
        let mut tape = TradeTape::default();
        let now = 100_000;
        tape.add(trade(now - 3_000, 101.0, 1.0, Side::Buy));
        tape.add(trade(now - 2_000, 102.0, 1.0, Side::Sell));

        let first = tape.recent_since(0, 10.0, now);
        assert_eq!(first.len(), 2);
        let hwm = first.last().map(|(seq, _)| *seq).unwrap();

        // Overlapping window, nothing new: no repeats.
        assert!(tape.recent_since(hwm, 10.0, now).is_empty());

        tape.add(trade(now - 500, 103.0, 1.0, Side::Buy));
        let next = tape.recent_since(hwm, 10.0, now);
        assert_eq!(next.len(), 1);
        assert_eq!(next[0].1.price, 103.0);
    }

    #[test]
    fn recent_since_still_bounded_by_window() {
        let mut tape = TradeTape::default();
        let now = 100_000;
        tape.add(trade(now - 50_000, 99.0, 1.0, Side::Sell));
        tape.add(trade(now - 1_000, 103.0, 1.0, Side::Buy));
        // Never-seen entry older than the window stays excluded.
        let got = tape.recent_since(0, 2.0, now);
        assert_eq!(got.len(), 1);
        assert_eq!(got[0].1.price, 103.0);
    }
}
