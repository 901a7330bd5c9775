// ===============================
// src/selector.rs
// ===============================
//
// Picks which markets to quote this tick. Pure function of the
// snapshots handed in, so the tick loop stays deterministic and the
// whole thing is trivially testable.

use crate::domain::MarketSnapshot;

#[derive(Debug, Clone)]
pub struct SelectorConfig {
    /// Markets with a tighter spread than this are not worth quoting.
    pub min_spread_bps: f64,
    /// Minimum trades-per-minute before a market counts as active.
    pub min_tpm: f64,
    /// How many markets to quote at once.
    pub top_n: usize,
}

/// Attractiveness score. Spread pays the quotes, flow fills them;
/// sqrt keeps one very busy market from drowning out the rest.
pub fn score(snap: &MarketSnapshot) -> f64 {
    let spread = snap.spread_bps.unwrap_or(0.0);
    spread * (1.0 + snap.tpm.max(0.0).sqrt())
}

/// Filter to quotable markets, rank by score descending, keep the top N.
/// The sort is stable, so equal scores keep their input order and the
/// same snapshots always produce the same picks.
pub fn select_markets(snaps: &[MarketSnapshot], cfg: &SelectorConfig) -> Vec<MarketSnapshot> {
    let mut picked: Vec<MarketSnapshot> = snaps
        .iter()
        .filter(|s| {
            let Some(spread) = s.spread_bps else {
                return false;
            };
            s.bid.is_some()
                && s.ask.is_some()
                && spread >= cfg.min_spread_bps
                && s.tpm >= cfg.min_tpm
        })
        .cloned()
        .collect();

    picked.sort_by(|a, b| {
        score(b)
            .partial_cmp(&score(a))
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    picked.truncate(cfg.top_n);
    picked
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snap(market: &str, spread_bps: Option<f64>, tpm: f64) -> MarketSnapshot {
        let two_sided = spread_bps.is_some();
        MarketSnapshot {
            market: market.to_string(),
            bid: two_sided.then_some(100.0),
            ask: two_sided.then_some(100.1),
            spread_bps,
            tpm,
            buy_ratio: None,
        }
    }

    fn cfg() -> SelectorConfig {
        SelectorConfig {
            min_spread_bps: 1.0,
            min_tpm: 5.0,
            top_n: 3,
        }
    }

    #[test]
    fn filters_out_one_sided_quiet_and_tight_markets() {
        let snaps = vec![
            snap("NOBOOK-USD", None, 50.0),
            snap("TIGHT-USD", Some(0.5), 50.0),
            snap("QUIET-USD", Some(10.0), 1.0),
            snap("GOOD-USD", Some(10.0), 50.0),
        ];
        let picked = select_markets(&snaps, &cfg());
        assert_eq!(picked.len(), 1);
        assert_eq!(picked[0].market, "GOOD-USD");
    }

    #[test]
    fn thresholds_are_inclusive() {
        let snaps = vec![snap("EDGE-USD", Some(1.0), 5.0)];
        assert_eq!(select_markets(&snaps, &cfg()).len(), 1);
    }

    #[test]
    fn ranks_by_score_descending_and_truncates() {
        let snaps = vec![
            snap("A-USD", Some(2.0), 9.0),  // 2*(1+3) = 8
            snap("B-USD", Some(5.0), 16.0), // 5*(1+4) = 25
            snap("C-USD", Some(4.0), 9.0),  // 4*(1+3) = 16
            snap("D-USD", Some(3.0), 9.0),  // 3*(1+3) = 12
        ];
        let picked = select_markets(&snaps, &cfg());
        let names: Vec<&str> = picked.iter().map(|s| s.market.as_str()).collect();
        assert_eq!(names, vec!["B-USD", "C-USD", "D-USD"]);
    }

    #[test]
    fn equal_scores_keep_input_order() {
        let snaps = vec![
            snap("FIRST-USD", Some(3.0), 9.0),
            snap("SECOND-USD", Some(3.0), 9.0),
            snap("THIRD-USD", Some(3.0), 9.0),
        ];
        let picked = select_markets(&snaps, &cfg());
        let names: Vec<&str> = picked.iter().map(|s| s.market.as_str()).collect();
        assert_eq!(names, vec!["FIRST-USD", "SECOND-USD", "THIRD-USD"]);
    }

    #[test]
    fn same_input_same_output() {
        let snaps = vec![
            snap("A-USD", Some(2.0), 9.0),
            snap("B-USD", Some(5.0), 16.0),
            snap("C-USD", Some(4.0), 9.0),
        ];
        let once = select_markets(&snaps, &cfg());
        let twice = select_markets(&snaps, &cfg());
        let a: Vec<&str> = once.iter().map(|s| s.market.as_str()).collect();
        let b: Vec<&str> = twice.iter().map(|s| s.market.as_str()).collect();
        assert_eq!(a, b);
    }

    #[test]
    fn empty_input_is_fine() {
        assert!(select_markets(&[], &cfg()).is_empty());
    }
}
