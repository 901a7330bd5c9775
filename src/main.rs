// ===============================
// src/main.rs
// ===============================
//
// Wiring order: config (.env included) -> logging -> metrics ->
// recorder -> feeds -> tick loop. Ctrl-C flips a watch flag; the loop
// finishes its tick, trade feeds stop before book feeds, and the
// recorder drains before exit.

use tokio::sync::{mpsc, watch};
use tracing::info;
use tracing_subscriber::EnvFilter;

use extended_mm_bot::app::App;
use extended_mm_bot::config;
use extended_mm_bot::domain::Event;
use extended_mm_bot::feed::FeedSet;
use extended_mm_bot::metrics;
use extended_mm_bot::recorder;
use extended_mm_bot::sink::{LogSink, RecorderSink, Sink};

#[tokio::main]
async fn main() {
    // Config first: it loads .env, which may carry RUST_LOG.
    let cfg = config::load();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    // ---- Metrics ----
    metrics::init();
    tokio::spawn(metrics::serve_metrics(cfg.metrics_port));

    // ---- Startup info + export config to metrics ----
    info!(
        feed_mode = cfg.feed_mode.as_str(),
        markets = ?cfg.markets,
        ws_host = %cfg.ws_host,
        tick_seconds = cfg.tick_seconds,
        half_spread_bps = cfg.paper.half_spread_bps,
        quote_size_usd = cfg.paper.quote_size_usd,
        max_inventory_usd = cfg.paper.max_inventory_usd,
        min_spread_bps = cfg.selector.min_spread_bps,
        min_tpm = cfg.selector.min_tpm,
        top_n = cfg.selector.top_n,
        record_file = cfg.record_file.as_deref().unwrap_or("-"),
        "startup config"
    );
    metrics::CONFIG_FEED_MODE
        .with_label_values(&[cfg.feed_mode.as_str()])
        .set(1);
    for m in &cfg.markets {
        metrics::CONFIG_MARKET.with_label_values(&[m]).set(1);
    }

    // ---- Recorder (optional) ----
    let (rec_tx, rec_rx) = mpsc::channel::<Event>(8192);
    let recorder_task = cfg
        .record_file
        .clone()
        .map(|path| tokio::spawn(recorder::run(rec_rx, path)));

    let mut sinks: Vec<Box<dyn Sink>> = vec![Box::new(LogSink)];
    if recorder_task.is_some() {
        let _ = rec_tx.try_send(Event::Note {
            text: format!("session start, markets {:?}", cfg.markets),
        });
        sinks.push(Box::new(RecorderSink::new(rec_tx.clone())));
    }

    // ---- Feeds ----
    let mut feeds = FeedSet::new(&cfg.markets, cfg.tape_capacity);
    feeds.start_all(&cfg);

    // ---- Shutdown signal ----
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("ctrl-c received, shutting down");
            let _ = shutdown_tx.send(true);
        }
    });

    // ---- Tick loop ----
    let mut app = App::new(cfg, feeds, sinks);
    app.run(shutdown_rx).await;

    // ---- Orderly teardown ----
    app.feeds_mut().stop_all().await;
    let stats = app.paper().stats();
    info!(
        fills = stats.fills,
        capped = stats.capped,
        volume_base = stats.volume_base,
        notional_usd = stats.notional_usd,
        "final stats"
    );
    let _ = rec_tx.try_send(Event::Note {
        text: "session end".to_string(),
    });
    drop(app);
    drop(rec_tx);
    if let Some(task) = recorder_task {
        let _ = task.await;
    }
    info!("bye");
}
