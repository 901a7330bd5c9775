// ===============================
// src/feed.rs
// ===============================
//
// Market data plumbing. Each market gets two shared stores (top of
// book, trade tape) and up to two background tasks keeping them fresh:
// - run_book_feed  : depth-1 order book stream, reconnect with backoff
// - run_trade_feed : public trades stream, reconnect with backoff
// - run_mock_feed  : random-walk generator for offline runs
//
// The stores are std RwLocks; writers are the feed tasks, the tick
// loop only reads, and no guard is ever held across an await.

use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;

use ahash::AHashMap;
use chrono::Utc;
use futures_util::StreamExt;
use rand::Rng;
use tokio::net::TcpStream;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::{header, HeaderValue};
use tokio_tungstenite::tungstenite::Error as WsError;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{error, info, warn};
use url::Url;

use crate::book::TopOfBook;
use crate::config::{Config, FeedMode};
use crate::domain::{BookLevel, BookUpdate, MarketSnapshot, Side, Trade};
use crate::extended;
use crate::metrics;
use crate::tape::TradeTape;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Lock helpers that survive a poisoned lock instead of panicking the
/// whole task over a writer that already died.
pub(crate) fn read_lock<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(|p| p.into_inner())
}

pub(crate) fn write_lock<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(|p| p.into_inner())
}

#[derive(Debug, thiserror::Error)]
pub enum FeedError {
    #[error("stream closed by peer")]
    ClosedByPeer,
    #[error("stream error: {0}")]
    Stream(#[from] WsError),
}

/// Reconnect delay: 1s doubling to a 20s ceiling, reset after every
/// successful connect.
#[derive(Debug, Clone)]
pub struct Backoff {
    delay: Duration,
}

impl Backoff {
    const INITIAL: Duration = Duration::from_secs(1);
    const MAX: Duration = Duration::from_secs(20);

    pub fn new() -> Self {
        Self {
            delay: Self::INITIAL,
        }
    }

    pub fn reset(&mut self) {
        self.delay = Self::INITIAL;
    }

    /// Delay to sleep before the next attempt; doubles for the one after.
    pub fn next_delay(&mut self) -> Duration {
        let d = self.delay;
        self.delay = (self.delay * 2).min(Self::MAX);
        d
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Self::new()
    }
}

fn client_request(
    url: &Url,
    user_agent: &str,
) -> Result<tokio_tungstenite::tungstenite::handshake::client::Request, WsError> {
    let mut req = url.as_str().into_client_request()?;
    if let Ok(v) = HeaderValue::from_str(user_agent) {
        req.headers_mut().insert(header::USER_AGENT, v);
    }
    Ok(req)
}

/// One connected book session. Ok(()) only when the stop signal asked
/// us to leave; every other way out is an error the outer loop retries.
async fn book_session(
    mut ws: WsStream,
    market: &str,
    store: &RwLock<TopOfBook>,
    stop: &mut watch::Receiver<bool>,
) -> Result<(), FeedError> {
    loop {
        let frame = tokio::select! {
            f = ws.next() => f,
            _ = stop.changed() => {
                let _ = ws.close(None).await;
                return Ok(());
            }
        };
        match frame {
            None => return Err(FeedError::ClosedByPeer),
            Some(Err(e)) => return Err(FeedError::Stream(e)),
            Some(Ok(m)) if m.is_text() => {
                let Ok(txt) = m.into_text() else { continue };
                match extended::decode_book_frame(&txt, market) {
                    Some(upd) => {
                        write_lock(store).apply(&upd);
                        metrics::BOOK_UPDATES.with_label_values(&[market]).inc();
                    }
                    None => {
                        metrics::MSGS_DROPPED
                            .with_label_values(&[market, "book"])
                            .inc();
                    }
                }
            }
            Some(Ok(m)) if m.is_close() => return Err(FeedError::ClosedByPeer),
            Some(Ok(_)) => {}
        }
    }
}

async fn trade_session(
    mut ws: WsStream,
    market: &str,
    tape: &RwLock<TradeTape>,
    stop: &mut watch::Receiver<bool>,
) -> Result<(), FeedError> {
    loop {
        let frame = tokio::select! {
            f = ws.next() => f,
            _ = stop.changed() => {
                let _ = ws.close(None).await;
                return Ok(());
            }
        };
        match frame {
            None => return Err(FeedError::ClosedByPeer),
            Some(Err(e)) => return Err(FeedError::Stream(e)),
            Some(Ok(m)) if m.is_text() => {
                let Ok(txt) = m.into_text() else { continue };
                let mut dropped = 0u64;
                let trades = extended::decode_trade_frame(&txt, market, &mut dropped);
                if dropped > 0 {
                    metrics::MSGS_DROPPED
                        .with_label_values(&[market, "trades"])
                        .inc_by(dropped);
                }
                if !trades.is_empty() {
                    let n = trades.len() as u64;
                    {
                        let mut tape = write_lock(tape);
                        for t in trades {
                            tape.add(t);
                        }
                    }
                    metrics::TRADES_INGESTED
                        .with_label_values(&[market])
                        .inc_by(n);
                }
            }
            Some(Ok(m)) if m.is_close() => return Err(FeedError::ClosedByPeer),
            Some(Ok(_)) => {}
        }
    }
}

pub async fn run_book_feed(
    market: String,
    url: String,
    user_agent: String,
    store: Arc<RwLock<TopOfBook>>,
    mut stop: watch::Receiver<bool>,
) {
    let parsed = match Url::parse(&url) {
        Ok(u) => u,
        Err(e) => {
            error!(market = %market, %url, err = %e, "bad book stream url");
            return;
        }
    };
    info!(market = %market, %url, "book feed starting");

    let mut backoff = Backoff::new();
    loop {
        if *stop.borrow() {
            break;
        }
        let request = match client_request(&parsed, &user_agent) {
            Ok(r) => r,
            Err(e) => {
                error!(market = %market, err = %e, "bad book stream request");
                return;
            }
        };
        let connected = tokio::select! {
            r = connect_async(request) => r,
            _ = stop.changed() => break,
        };
        match connected {
            Ok((ws, _resp)) => {
                info!(market = %market, "book stream connected");
                metrics::WS_CONNECTED
                    .with_label_values(&[&market, "book"])
                    .set(1);
                backoff.reset();
                if let Err(e) = book_session(ws, &market, &store, &mut stop).await {
                    warn!(market = %market, err = %e, "book stream ended");
                }
                metrics::WS_CONNECTED
                    .with_label_values(&[&market, "book"])
                    .set(0);
            }
            Err(e) => error!(market = %market, err = %e, "book stream connect failed"),
        }
        if *stop.borrow() {
            break;
        }
        metrics::WS_RECONNECTS
            .with_label_values(&[&market, "book"])
            .inc();
        let delay = backoff.next_delay();
        tokio::select! {
            _ = sleep(delay) => {}
            _ = stop.changed() => break,
        }
    }
    metrics::WS_CONNECTED
        .with_label_values(&[&market, "book"])
        .set(0);
    info!(market = %market, "book feed stopped");
}

pub async fn run_trade_feed(
    market: String,
    url: String,
    user_agent: String,
    tape: Arc<RwLock<TradeTape>>,
    mut stop: watch::Receiver<bool>,
) {
    let parsed = match Url::parse(&url) {
        Ok(u) => u,
        Err(e) => {
            error!(market = %market, %url, err = %e, "bad trade stream url");
            return;
        }
    };
    info!(market = %market, %url, "trade feed starting");

    let mut backoff = Backoff::new();
    loop {
        if *stop.borrow() {
            break;
        }
        let request = match client_request(&parsed, &user_agent) {
            Ok(r) => r,
            Err(e) => {
                error!(market = %market, err = %e, "bad trade stream request");
                return;
            }
        };
        let connected = tokio::select! {
            r = connect_async(request) => r,
            _ = stop.changed() => break,
        };
        match connected {
            Ok((ws, _resp)) => {
                info!(market = %market, "trade stream connected");
                metrics::WS_CONNECTED
                    .with_label_values(&[&market, "trades"])
                    .set(1);
                backoff.reset();
                if let Err(e) = trade_session(ws, &market, &tape, &mut stop).await {
                    warn!(market = %market, err = %e, "trade stream ended");
                }
                metrics::WS_CONNECTED
                    .with_label_values(&[&market, "trades"])
                    .set(0);
            }
            Err(e) => error!(market = %market, err = %e, "trade stream connect failed"),
        }
        if *stop.borrow() {
            break;
        }
        metrics::WS_RECONNECTS
            .with_label_values(&[&market, "trades"])
            .inc();
        let delay = backoff.next_delay();
        tokio::select! {
            _ = sleep(delay) => {}
            _ = stop.changed() => break,
        }
    }
    metrics::WS_CONNECTED
        .with_label_values(&[&market, "trades"])
        .set(0);
    info!(market = %market, "trade feed stopped");
}

/// Random-walk book plus synthetic prints, for running without a
/// network. Prints land within ~10 bps of mid so default quotes get
/// crossed now and then.
pub async fn run_mock_feed(
    market: String,
    tob: Arc<RwLock<TopOfBook>>,
    tape: Arc<RwLock<TradeTape>>,
    mut stop: watch::Receiver<bool>,
) {
    info!(market = %market, "mock feed started");
    let mut mid = 100.0_f64;
    let mut seq = 0u64;
    loop {
        tokio::select! {
            _ = sleep(Duration::from_millis(50)) => {}
            _ = stop.changed() => break,
        }
        // ThreadRng must not be held across an await.
        let (step, print_off, qty, aggressor_buy, with_print) = {
            let mut rng = rand::thread_rng();
            (
                rng.gen_range(-10..=10) as f64 * 0.01,
                rng.gen_range(-10.0..=10.0) * 1e-4,
                rng.gen_range(0.05..2.0),
                rng.gen_bool(0.5),
                rng.gen_bool(0.4),
            )
        };
        mid = (mid + step).max(5.0);
        let half = (mid * 2.5e-4).max(0.01);
        let now = Utc::now().timestamp_millis();
        seq += 1;
        write_lock(&tob).apply(&BookUpdate {
            market: market.clone(),
            bid: Some(BookLevel {
                px: mid - half,
                qty: 1.0,
            }),
            ask: Some(BookLevel {
                px: mid + half,
                qty: 1.0,
            }),
            ts_ms: Some(now),
            seq: Some(seq),
        });
        metrics::BOOK_UPDATES.with_label_values(&[&market]).inc();
        if with_print {
            write_lock(&tape).add(Trade {
                ts_ms: now,
                price: mid * (1.0 + print_off),
                qty,
                side: if aggressor_buy { Side::Buy } else { Side::Sell },
            });
            metrics::TRADES_INGESTED.with_label_values(&[&market]).inc();
        }
    }
    info!(market = %market, "mock feed stopped");
}

/// Stores and stream tasks for one market. Trade and book tasks stop
/// on separate signals so shutdown can drain prints before the books
/// go away.
pub struct MarketFeed {
    pub market: String,
    pub tob: Arc<RwLock<TopOfBook>>,
    pub tape: Arc<RwLock<TradeTape>>,
    book_task: Option<JoinHandle<()>>,
    trade_task: Option<JoinHandle<()>>,
    stop_book_tx: watch::Sender<bool>,
    stop_trades_tx: watch::Sender<bool>,
}

impl MarketFeed {
    pub fn new(market: String, tape_capacity: usize) -> Self {
        let (stop_book_tx, _) = watch::channel(false);
        let (stop_trades_tx, _) = watch::channel(false);
        Self {
            market,
            tob: Arc::new(RwLock::new(TopOfBook::default())),
            tape: Arc::new(RwLock::new(TradeTape::with_capacity(tape_capacity))),
            book_task: None,
            trade_task: None,
            stop_book_tx,
            stop_trades_tx,
        }
    }

    /// Spawn both stream tasks. Idempotent while the tasks are live; a
    /// start after a stop re-arms the latched stop flag first, so the
    /// new tasks actually connect. `send_replace` because the plain
    /// send fails without updating once the old receivers are gone.
    pub fn start_extended(&mut self, host: &str, depth: u32, user_agent: &str) {
        if self.book_task.is_none() {
            let _ = self.stop_book_tx.send_replace(false);
            let url = extended::orderbook_url(host, &self.market, depth);
            self.book_task = Some(tokio::spawn(run_book_feed(
                self.market.clone(),
                url,
                user_agent.to_string(),
                Arc::clone(&self.tob),
                self.stop_book_tx.subscribe(),
            )));
        }
        if self.trade_task.is_none() {
            let _ = self.stop_trades_tx.send_replace(false);
            let url = extended::trades_url(host, &self.market);
            self.trade_task = Some(tokio::spawn(run_trade_feed(
                self.market.clone(),
                url,
                user_agent.to_string(),
                Arc::clone(&self.tape),
                self.stop_trades_tx.subscribe(),
            )));
        }
    }

    /// Spawn the offline generator instead. Idempotent, restartable.
    pub fn start_mock(&mut self) {
        if self.book_task.is_none() {
            let _ = self.stop_book_tx.send_replace(false);
            self.book_task = Some(tokio::spawn(run_mock_feed(
                self.market.clone(),
                Arc::clone(&self.tob),
                Arc::clone(&self.tape),
                self.stop_book_tx.subscribe(),
            )));
        }
    }

    pub async fn stop_trades(&mut self) {
        let _ = self.stop_trades_tx.send(true);
        if let Some(h) = self.trade_task.take() {
            let _ = h.await;
        }
    }

    pub async fn stop_book(&mut self) {
        let _ = self.stop_book_tx.send(true);
        if let Some(h) = self.book_task.take() {
            let _ = h.await;
        }
    }
}

/// All configured markets, in the order the config listed them. The
/// order is part of the contract: snapshots come out in it, so the
/// selector sees a deterministic input.
pub struct FeedSet {
    feeds: AHashMap<String, MarketFeed>,
    order: Vec<String>,
}

impl FeedSet {
    pub fn new(markets: &[String], tape_capacity: usize) -> Self {
        let mut feeds = AHashMap::new();
        let mut order = Vec::new();
        for m in markets {
            if feeds.contains_key(m) {
                continue;
            }
            feeds.insert(m.clone(), MarketFeed::new(m.clone(), tape_capacity));
            order.push(m.clone());
        }
        Self { feeds, order }
    }

    pub fn start_all(&mut self, cfg: &Config) {
        for m in &self.order {
            if let Some(feed) = self.feeds.get_mut(m) {
                match cfg.feed_mode {
                    FeedMode::Extended => {
                        feed.start_extended(&cfg.ws_host, cfg.book_depth, &cfg.user_agent)
                    }
                    FeedMode::Mock => feed.start_mock(),
                }
            }
        }
    }

    /// Trades first, then books, so the last replay window sees a
    /// settled tape.
    pub async fn stop_all(&mut self) {
        for m in self.order.clone() {
            if let Some(feed) = self.feeds.get_mut(&m) {
                feed.stop_trades().await;
            }
        }
        for m in self.order.clone() {
            if let Some(feed) = self.feeds.get_mut(&m) {
                feed.stop_book().await;
            }
        }
        info!("all feeds stopped");
    }

    pub fn get(&self, market: &str) -> Option<&MarketFeed> {
        self.feeds.get(market)
    }

    pub fn markets(&self) -> impl Iterator<Item = &str> {
        self.order.iter().map(|s| s.as_str())
    }

    pub fn mid(&self, market: &str) -> Option<f64> {
        let feed = self.feeds.get(market)?;
        read_lock(&feed.tob).mid()
    }

    /// Mids for every market with a two-sided book right now.
    pub fn mids(&self) -> AHashMap<String, f64> {
        let mut out = AHashMap::new();
        for (m, feed) in &self.feeds {
            if let Some(mid) = read_lock(&feed.tob).mid() {
                out.insert(m.clone(), mid);
            }
        }
        out
    }

    /// One selector input per market, in config order.
    pub fn snapshots(&self, now_ms: i64, lookback_ms: i64) -> Vec<MarketSnapshot> {
        let mut out = Vec::with_capacity(self.order.len());
        for m in &self.order {
            let Some(feed) = self.feeds.get(m) else {
                continue;
            };
            let tob = *read_lock(&feed.tob);
            let (tpm, buy_ratio) = {
                let tape = read_lock(&feed.tape);
                (
                    tape.trades_per_min(now_ms, lookback_ms),
                    tape.buy_ratio(now_ms, lookback_ms),
                )
            };
            out.push(MarketSnapshot {
                market: m.clone(),
                bid: tob.bid_px,
                ask: tob.ask_px,
                spread_bps: tob.spread_bps(),
                tpm,
                buy_ratio,
            });
        }
        out
    }

    /// Windowed prints for one market, skipping everything at or below
    /// `after_seq`.
    pub fn replay_window(
        &self,
        market: &str,
        after_seq: u64,
        seconds: f64,
        now_ms: i64,
    ) -> Vec<(u64, Trade)> {
        self.feeds
            .get(market)
            .map(|f| read_lock(&f.tape).recent_since(after_seq, seconds, now_ms))
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use tokio::time::timeout;

    use crate::paper::PaperConfig;
    use crate::selector::SelectorConfig;

    #[test]
    fn backoff_doubles_to_cap_and_resets() {
        let mut b = Backoff::new();
        let secs: Vec<u64> = (0..7).map(|_| b.next_delay().as_secs()).collect();
        assert_eq!(secs, vec![1, 2, 4, 8, 16, 20, 20]);
        b.reset();
        assert_eq!(b.next_delay().as_secs(), 1);
    }

    #[test]
    fn feed_set_dedupes_and_keeps_config_order() {
        let set = FeedSet::new(
            &["B-USD".to_string(), "A-USD".to_string(), "B-USD".to_string()],
            16,
        );
        let names: Vec<&str> = set.markets().collect();
        assert_eq!(names, vec!["B-USD", "A-USD"]);
    }

    #[test]
    fn snapshots_read_current_store_state() {
        let set = FeedSet::new(&["BTC-USD".to_string()], 16);
        let feed = set.get("BTC-USD").unwrap();
        write_lock(&feed.tob).apply(&BookUpdate {
            market: "BTC-USD".to_string(),
            bid: Some(BookLevel { px: 100.0, qty: 1.0 }),
            ask: Some(BookLevel { px: 100.1, qty: 1.0 }),
            ts_ms: Some(1_000),
            seq: Some(1),
        });
        {
            let mut tape = write_lock(&feed.tape);
            tape.add(Trade {
                ts_ms: 59_000,
                price: 100.05,
                qty: 1.0,
                side: Side::Buy,
            });
            tape.add(Trade {
                ts_ms: 60_000,
                price: 100.06,
                qty: 1.0,
                side: Side::Sell,
            });
        }

        let snaps = set.snapshots(60_000, 60_000);
        assert_eq!(snaps.len(), 1);
        let s = &snaps[0];
        assert_eq!(s.bid, Some(100.0));
        assert_eq!(s.ask, Some(100.1));
        let spread = s.spread_bps.unwrap();
        assert!(spread > 9.0 && spread < 11.0);
        assert!((s.tpm - 2.0).abs() < 1e-9);
        assert!((s.buy_ratio.unwrap() - 0.5).abs() < 1e-9);

        let mids = set.mids();
        assert!((mids["BTC-USD"] - 100.05).abs() < 1e-9);
    }

    #[test]
    fn replay_window_respects_high_water_mark() {
        let set = FeedSet::new(&["BTC-USD".to_string()], 16);
        let feed = set.get("BTC-USD").unwrap();
        {
            let mut tape = write_lock(&feed.tape);
            tape.add(Trade {
                ts_ms: 1_000,
                price: 100.0,
                qty: 1.0,
                side: Side::Buy,
            });
            tape.add(Trade {
                ts_ms: 1_500,
                price: 100.1,
                qty: 1.0,
                side: Side::Sell,
            });
        }
        let first = set.replay_window("BTC-USD", 0, 2.0, 2_000);
        assert_eq!(first.len(), 2);
        let hwm = first.last().map(|(s, _)| *s).unwrap();
        assert!(set.replay_window("BTC-USD", hwm, 2.0, 2_000).is_empty());
        assert!(set.replay_window("NOPE-USD", 0, 2.0, 2_000).is_empty());
    }

    fn test_config(host: &str) -> Config {
        Config {
            markets: vec!["BTC-USD".to_string()],
            feed_mode: FeedMode::Extended,
            ws_host: host.to_string(),
            book_depth: 1,
            user_agent: "test".to_string(),
            tick_seconds: 1.0,
            stats_every: 30,
            tape_capacity: 16,
            activity_window_secs: 60.0,
            selector: SelectorConfig {
                min_spread_bps: 1.0,
                min_tpm: 5.0,
                top_n: 3,
            },
            paper: PaperConfig {
                half_spread_bps: 5.0,
                quote_size_usd: 100.0,
                max_inventory_usd: 2000.0,
                fill_history: 200,
            },
            record_file: None,
            metrics_port: 0,
        }
    }

    async fn wait_for_mid(feed: &MarketFeed) -> Option<f64> {
        for _ in 0..200 {
            if let Some(mid) = read_lock(&feed.tob).mid() {
                return Some(mid);
            }
            sleep(Duration::from_millis(10)).await;
        }
        None
    }

    #[tokio::test]
    async fn mock_feed_restarts_after_stop() {
        let mut feed = MarketFeed::new("BTC-USD".to_string(), 16);
        feed.start_mock();
        assert!(wait_for_mid(&feed).await.is_some());

        feed.stop_book().await;
        assert!(feed.book_task.is_none());
        *write_lock(&feed.tob) = TopOfBook::default();

        // A start after a stop must come back up and publish again.
        feed.start_mock();
        assert!(wait_for_mid(&feed).await.is_some());
        feed.stop_book().await;
    }

    #[tokio::test]
    async fn extended_feed_restarts_after_stop() {
        let mut feed = MarketFeed::new("BTC-USD".to_string(), 16);
        // Nothing listens on port 1, so the tasks live in their
        // connect/backoff cycle until told to stop.
        feed.start_extended("ws://127.0.0.1:1", 1, "test");
        sleep(Duration::from_millis(50)).await;
        assert!(!feed.book_task.as_ref().unwrap().is_finished());
        assert!(!feed.trade_task.as_ref().unwrap().is_finished());

        feed.stop_trades().await;
        feed.stop_book().await;
        assert!(feed.book_task.is_none());
        assert!(feed.trade_task.is_none());

        feed.start_extended("ws://127.0.0.1:1", 1, "test");
        sleep(Duration::from_millis(200)).await;
        assert!(
            !feed.book_task.as_ref().unwrap().is_finished(),
            "restarted book task exited before any stop was sent"
        );
        assert!(
            !feed.trade_task.as_ref().unwrap().is_finished(),
            "restarted trade task exited before any stop was sent"
        );

        feed.stop_trades().await;
        feed.stop_book().await;
    }

    #[tokio::test]
    async fn stop_while_connect_is_pending_unwinds_the_tasks() {
        // A listener that never answers the websocket handshake keeps
        // both connection attempts pending forever.
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let host = format!("ws://{}", listener.local_addr().unwrap());
        let cfg = test_config(&host);

        let mut set = FeedSet::new(&cfg.markets, cfg.tape_capacity);
        set.start_all(&cfg);
        sleep(Duration::from_millis(100)).await;
        {
            let feed = set.get("BTC-USD").unwrap();
            assert!(!feed.book_task.as_ref().unwrap().is_finished());
            assert!(!feed.trade_task.as_ref().unwrap().is_finished());
        }

        let drained = timeout(Duration::from_secs(5), set.stop_all()).await;
        assert!(drained.is_ok(), "stop did not unwind the pending connects");
        let feed = set.get("BTC-USD").unwrap();
        assert!(feed.book_task.is_none());
        assert!(feed.trade_task.is_none());
    }
}
