// ===============================
// src/sink.rs
// ===============================
//
// Where tick-loop output goes. The loop itself only talks to the Sink
// trait; LogSink turns events into tracing lines and RecorderSink
// forwards them to the JSONL writer task without ever blocking the
// tick.

use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::domain::{Event, FillEvent, MarketSnapshot, PnlBreakdown, TickSummary, TradeStats};
use crate::metrics;

pub trait Sink: Send {
    fn on_selection(&mut self, _tick: u64, _picked: &[MarketSnapshot]) {}
    fn on_fill(&mut self, _fill: &FillEvent) {}
    fn on_tick(&mut self, _tick: u64, _summary: &TickSummary) {}
    fn on_stats(&mut self, _tick: u64, _stats: &TradeStats) {}
    fn on_pnl_breakdown(&mut self, _tick: u64, _breakdown: &PnlBreakdown) {}
}

/// Human-readable activity log.
pub struct LogSink;

fn fmt_picked(picked: &[MarketSnapshot]) -> String {
    picked
        .iter()
        .map(|s| {
            format!(
                "{}({:.1}bps,{:.0}tpm)",
                s.market,
                s.spread_bps.unwrap_or(0.0),
                s.tpm
            )
        })
        .collect::<Vec<_>>()
        .join(" ")
}

impl Sink for LogSink {
    fn on_selection(&mut self, tick: u64, picked: &[MarketSnapshot]) {
        if picked.is_empty() {
            info!(tick, "no quotable markets this tick");
        } else {
            info!(tick, picked = %fmt_picked(picked), "markets selected");
        }
    }

    fn on_fill(&mut self, fill: &FillEvent) {
        info!(
            market = %fill.market,
            side = fill.side.as_str(),
            px = fill.price,
            qty = fill.size,
            pos = fill.pos_after,
            avg = fill.avg_price_after,
            realized = fill.realized_pnl_trade,
            cash = fill.cash_after,
            "paper fill"
        );
    }

    fn on_tick(&mut self, tick: u64, summary: &TickSummary) {
        info!(
            tick,
            cash = summary.cash_usd,
            equity = summary.equity_usd,
            selected = summary.selected,
            focus = summary.focus_market.as_deref().unwrap_or("-"),
            focus_pos = summary.focus_pos,
            "tick"
        );
    }

    fn on_stats(&mut self, tick: u64, stats: &TradeStats) {
        info!(
            tick,
            fills = stats.fills,
            capped = stats.capped,
            volume_base = stats.volume_base,
            notional_usd = stats.notional_usd,
            buy_volume = stats.buy_volume,
            sell_volume = stats.sell_volume,
            "trade stats"
        );
    }

    fn on_pnl_breakdown(&mut self, tick: u64, breakdown: &PnlBreakdown) {
        for row in &breakdown.rows {
            info!(
                tick,
                market = %row.market,
                pos = row.pos_base,
                avg = row.avg_price,
                mid = row.mid.unwrap_or(f64::NAN),
                inventory_usd = row.inventory_usd,
                realized = row.realized_pnl,
                "pnl row"
            );
        }
        info!(
            tick,
            cash = breakdown.cash_usd,
            equity = breakdown.equity_usd,
            markets = breakdown.rows.len(),
            "pnl breakdown"
        );
    }
}

/// Forwards events to the recorder channel. try_send keeps the tick
/// loop non-blocking; a full queue drops the event and counts it.
pub struct RecorderSink {
    tx: mpsc::Sender<Event>,
}

impl RecorderSink {
    pub fn new(tx: mpsc::Sender<Event>) -> Self {
        Self { tx }
    }

    fn send(&self, ev: Event) {
        if self.tx.try_send(ev).is_err() {
            metrics::RECORDER_QUEUE_DROPS.inc();
            warn!("recorder queue full, event dropped");
        }
    }
}

impl Sink for RecorderSink {
    fn on_selection(&mut self, tick: u64, picked: &[MarketSnapshot]) {
        self.send(Event::Selection {
            tick,
            picked: picked.to_vec(),
        });
    }

    fn on_fill(&mut self, fill: &FillEvent) {
        self.send(Event::Fill(fill.clone()));
    }

    fn on_tick(&mut self, tick: u64, summary: &TickSummary) {
        self.send(Event::Tick {
            tick,
            summary: summary.clone(),
        });
    }

    fn on_stats(&mut self, tick: u64, stats: &TradeStats) {
        self.send(Event::Stats {
            tick,
            stats: *stats,
        });
    }

    fn on_pnl_breakdown(&mut self, tick: u64, breakdown: &PnlBreakdown) {
        self.send(Event::Breakdown {
            tick,
            breakdown: breakdown.clone(),
        });
    }
}
