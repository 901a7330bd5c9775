// ===============================
// src/app.rs
// ===============================
//
// The tick loop. Once per period:
//   snapshots -> select markets -> quote each pick -> replay new
//   prints against the quote -> mark to market -> emit events.
//
// Replay keeps a per-market high-water mark over the tape's insertion
// sequence. The window itself is 2x the tick period, wide enough to
// survive a late tick, and the mark guarantees a print is replayed
// exactly once even though consecutive windows overlap.

use ahash::AHashMap;
use chrono::Utc;
use tokio::sync::watch;
use tokio::time::{interval, Duration, MissedTickBehavior};
use tracing::info;

use crate::config::Config;
use crate::domain::TickSummary;
use crate::feed::FeedSet;
use crate::metrics;
use crate::paper::PaperMM;
use crate::selector::select_markets;
use crate::sink::Sink;

pub struct App {
    cfg: Config,
    feeds: FeedSet,
    paper: PaperMM,
    sinks: Vec<Box<dyn Sink>>,
    /// Highest tape sequence already replayed, per market.
    hwm: AHashMap<String, u64>,
    ticks: u64,
}

impl App {
    pub fn new(cfg: Config, feeds: FeedSet, sinks: Vec<Box<dyn Sink>>) -> Self {
        let paper = PaperMM::new(cfg.paper.clone());
        Self {
            cfg,
            feeds,
            paper,
            sinks,
            hwm: AHashMap::new(),
            ticks: 0,
        }
    }

    pub fn paper(&self) -> &PaperMM {
        &self.paper
    }

    pub fn feeds_mut(&mut self) -> &mut FeedSet {
        &mut self.feeds
    }

    /// One pass of the loop at the given wall clock. Split out from
    /// run() so the whole tick is testable without a runtime.
    pub fn tick_once(&mut self, now_ms: i64) {
        self.ticks += 1;
        let tick = self.ticks;
        metrics::TICKS.inc();

        let lookback_ms = (self.cfg.activity_window_secs * 1000.0) as i64;
        let snaps = self.feeds.snapshots(now_ms, lookback_ms);
        let picked = select_markets(&snaps, &self.cfg.selector);
        metrics::MARKETS_SELECTED.set(picked.len() as i64);
        for s in self.sinks.iter_mut() {
            s.on_selection(tick, &picked);
        }

        // One consistent price view for the whole tick: quoting, the
        // cap check, and mark-to-market all use these mids.
        let mids = self.feeds.mids();
        let window_secs = 2.0 * self.cfg.tick_seconds;

        for snap in &picked {
            let Some(mid) = mids.get(&snap.market).copied() else {
                continue;
            };
            let Some(quote) = self.paper.make_quote(mid) else {
                continue;
            };
            let after = self.hwm.get(&snap.market).copied().unwrap_or(0);
            let prints = self
                .feeds
                .replay_window(&snap.market, after, window_secs, now_ms);
            if let Some((last_seq, _)) = prints.last() {
                // Every print in the window counts as seen, filled or not.
                self.hwm.insert(snap.market.clone(), *last_seq);
            }
            for (_seq, trade) in &prints {
                if let Some(fill) =
                    self.paper
                        .on_trade(now_ms, tick, &snap.market, trade, &quote, &mids)
                {
                    for s in self.sinks.iter_mut() {
                        s.on_fill(&fill);
                    }
                }
            }
        }

        let equity = self.paper.mark_to_market(&mids);
        metrics::CASH_USD.set(self.paper.cash_usd());
        metrics::EQUITY_USD.set(equity);
        metrics::PNL_REALIZED.set(self.paper.realized_pnl_total());

        let mut focus_market: Option<String> = None;
        let mut focus_pos = 0.0_f64;
        for (market, pos) in self.paper.positions() {
            metrics::POSITION_BASE
                .with_label_values(&[market])
                .set(pos.pos_base);
            if pos.pos_base.abs() > focus_pos.abs() {
                focus_pos = pos.pos_base;
                focus_market = Some(market.to_string());
            }
        }

        let summary = TickSummary {
            cash_usd: self.paper.cash_usd(),
            equity_usd: equity,
            selected: picked.len(),
            focus_market,
            focus_pos,
        };
        for s in self.sinks.iter_mut() {
            s.on_tick(tick, &summary);
        }

        if tick % self.cfg.stats_every == 0 {
            let stats = self.paper.stats();
            for s in self.sinks.iter_mut() {
                s.on_stats(tick, &stats);
            }
            let breakdown = self.paper.pnl_breakdown(&mids);
            for s in self.sinks.iter_mut() {
                s.on_pnl_breakdown(tick, &breakdown);
            }
        }
    }

    pub async fn run(&mut self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = interval(Duration::from_secs_f64(self.cfg.tick_seconds));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!(period_s = self.cfg.tick_seconds, "tick loop started");
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.tick_once(Utc::now().timestamp_millis());
                }
                changed = shutdown.changed() => {
                    // A dropped sender counts as a stop request.
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        info!(ticks = self.ticks, "tick loop stopped");
    }
}
