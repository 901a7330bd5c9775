// ===============================
// src/metrics.rs
// ===============================
use once_cell::sync::Lazy;
use prometheus::{
    Encoder, Gauge, GaugeVec, IntCounter, IntCounterVec, IntGauge, IntGaugeVec, Opts, Registry,
    TextEncoder,
};
use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream};
use std::thread;

// Single custom registry (we register everything here)
pub static REGISTRY: Lazy<Registry> = Lazy::new(Registry::new);

// -------- Tick loop --------
pub static TICKS: Lazy<IntCounter> =
    Lazy::new(|| IntCounter::new("ticks_total", "tick loop iterations").unwrap());

pub static MARKETS_SELECTED: Lazy<IntGauge> =
    Lazy::new(|| IntGauge::new("markets_selected", "markets picked on the last tick").unwrap());

// -------- Stream health --------
pub static BOOK_UPDATES: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("book_updates_total", "order book frames applied"),
        &["market"],
    )
    .unwrap()
});

pub static TRADES_INGESTED: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("trades_ingested_total", "public trades added to the tape"),
        &["market"],
    )
    .unwrap()
});

pub static MSGS_DROPPED: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new(
            "stream_msgs_dropped_total",
            "frames or records ignored by the decoder (labels: market, channel)",
        ),
        &["market", "channel"],
    )
    .unwrap()
});

pub static WS_CONNECTED: Lazy<IntGaugeVec> = Lazy::new(|| {
    IntGaugeVec::new(
        Opts::new(
            "ws_connected",
            "1 if the stream is connected, 0 otherwise (labels: market, channel)",
        ),
        &["market", "channel"],
    )
    .unwrap()
});

pub static WS_RECONNECTS: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new(
            "ws_reconnects_total",
            "reconnect attempts per stream (labels: market, channel)",
        ),
        &["market", "channel"],
    )
    .unwrap()
});

// -------- Paper engine --------
pub static FILLS: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("paper_fills_total", "paper fills (labels: market, side)"),
        &["market", "side"],
    )
    .unwrap()
});

pub static FILLS_CAPPED: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new(
            "paper_fills_capped_total",
            "fills refused by the inventory cap",
        ),
        &["market"],
    )
    .unwrap()
});

pub static CASH_USD: Lazy<Gauge> =
    Lazy::new(|| Gauge::new("paper_cash_usd", "simulated cash balance").unwrap());

pub static EQUITY_USD: Lazy<Gauge> =
    Lazy::new(|| Gauge::new("paper_equity_usd", "cash plus marked inventory").unwrap());

pub static PNL_REALIZED: Lazy<Gauge> =
    Lazy::new(|| Gauge::new("paper_realized_pnl_usd", "realized PnL, all markets").unwrap());

pub static POSITION_BASE: Lazy<GaugeVec> = Lazy::new(|| {
    GaugeVec::new(
        Opts::new("paper_position_base", "net position in base units"),
        &["market"],
    )
    .unwrap()
});

// -------- Recorder --------
pub static RECORDER_QUEUE_DROPS: Lazy<IntCounter> = Lazy::new(|| {
    IntCounter::new(
        "recorder_queue_drops_total",
        "events dropped because the recorder queue was full",
    )
    .unwrap()
});

// ---- Config visibility (feed mode / markets) ----
pub static CONFIG_FEED_MODE: Lazy<IntGaugeVec> = Lazy::new(|| {
    IntGaugeVec::new(
        Opts::new("config_feed_mode", "feed mode (label: mode)"),
        &["mode"],
    )
    .unwrap()
});

pub static CONFIG_MARKET: Lazy<IntGaugeVec> = Lazy::new(|| {
    IntGaugeVec::new(
        Opts::new("config_market", "configured markets (label: market)"),
        &["market"],
    )
    .unwrap()
});

pub fn init() {
    // Register all metrics to the custom registry
    for m in [
        REGISTRY.register(Box::new(TICKS.clone())),
        REGISTRY.register(Box::new(MARKETS_SELECTED.clone())),
        REGISTRY.register(Box::new(BOOK_UPDATES.clone())),
        REGISTRY.register(Box::new(TRADES_INGESTED.clone())),
        REGISTRY.register(Box::new(MSGS_DROPPED.clone())),
        REGISTRY.register(Box::new(WS_CONNECTED.clone())),
        REGISTRY.register(Box::new(WS_RECONNECTS.clone())),
        REGISTRY.register(Box::new(FILLS.clone())),
        REGISTRY.register(Box::new(FILLS_CAPPED.clone())),
        REGISTRY.register(Box::new(CASH_USD.clone())),
        REGISTRY.register(Box::new(EQUITY_USD.clone())),
        REGISTRY.register(Box::new(PNL_REALIZED.clone())),
        REGISTRY.register(Box::new(POSITION_BASE.clone())),
        REGISTRY.register(Box::new(RECORDER_QUEUE_DROPS.clone())),
        REGISTRY.register(Box::new(CONFIG_FEED_MODE.clone())),
        REGISTRY.register(Box::new(CONFIG_MARKET.clone())),
    ] {
        let _ = m;
    }
}

// Encode all metrics in Prometheus text format
fn encode_metrics() -> Vec<u8> {
    let encoder = TextEncoder::new();
    let families = REGISTRY.gather();
    let mut buf = Vec::new();
    if encoder.encode(&families, &mut buf).is_err() || buf.is_empty() {
        buf.extend_from_slice(b"# no metrics\n");
    }
    buf
}

// Serve one HTTP request (GET / or /metrics) — tiny HTTP 1.1 responder
fn handle_client(mut stream: TcpStream) {
    // Read a bit to consume headers (no full parse)
    let mut _req_buf = [0u8; 1024];
    let _ = stream.read(&mut _req_buf);

    let body = encode_metrics();
    let header = format!(
        "HTTP/1.1 200 OK\r\nContent-Type: text/plain; version=0.0.4; charset=utf-8\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
        body.len()
    );

    let _ = stream.write_all(header.as_bytes());
    let _ = stream.write_all(&body);
    let _ = stream.flush();
}

// Run the metrics server in a dedicated OS thread (keeps Tokio runtime clean)
pub async fn serve_metrics(port: u16) {
    thread::spawn(move || {
        let addr = format!("0.0.0.0:{port}");
        let listener = TcpListener::bind(&addr)
            .unwrap_or_else(|e| panic!("metrics bind {} failed: {}", addr, e));
        eprintln!("metrics listening on http://{addr}/ (and /metrics)");

        for conn in listener.incoming() {
            match conn {
                Ok(stream) => handle_client(stream),
                Err(e) => eprintln!("metrics accept error: {}", e),
            }
        }
    });
}
