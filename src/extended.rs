// ===============================
// src/extended.rs
// ===============================
//
// Wire adapter for the Extended exchange public streams.
//
// - Order book (depth=1): GET {host}/stream.extended.exchange/v1/orderbooks/{market}?depth=1
//   Frames look like:
//   {"ts":1701563440000,"type":"SNAPSHOT",
//    "data":{"m":"BTC-USD","b":[{"p":"25670","q":"0.1"}],"a":[{"p":"25770","q":"0.1"}]},
//    "seq":1}
// - Public trades: GET {host}/stream.extended.exchange/v1/publicTrades/{market}
//   Frames carry a "data" array of {T, p, q, S[, m]} records.
//
// Decoding happens here and only here: a frame either becomes a
// well-formed BookUpdate / Vec<Trade> or nothing. Frames for another
// market, frames with missing required fields, and unknown type tags
// are all dropped without error; the feed layer counts the drops.

use serde::Deserialize;

use crate::domain::{BookLevel, BookUpdate, Side, Trade};

pub fn orderbook_url(host: &str, market: &str, depth: u32) -> String {
    format!(
        "{}/stream.extended.exchange/v1/orderbooks/{}?depth={}",
        host.trim_end_matches('/'),
        market,
        depth
    )
}

pub fn trades_url(host: &str, market: &str) -> String {
    format!(
        "{}/stream.extended.exchange/v1/publicTrades/{}",
        host.trim_end_matches('/'),
        market
    )
}

// ---- Wire models (prices and sizes are decimal strings) ----

#[derive(Debug, Deserialize)]
struct WireLevel {
    #[serde(rename = "p")]
    px: String,
    #[serde(rename = "q")]
    qty: String,
}

#[derive(Debug, Default, Deserialize)]
struct BookPayload {
    #[serde(rename = "m", default)]
    market: Option<String>,
    #[serde(rename = "b", default)]
    bids: Vec<WireLevel>,
    #[serde(rename = "a", default)]
    asks: Vec<WireLevel>,
}

#[derive(Debug, Deserialize)]
struct BookFrame {
    #[serde(default)]
    ts: Option<i64>,
    #[serde(rename = "type", default)]
    msg_type: Option<String>,
    #[serde(default)]
    data: Option<BookPayload>,
    #[serde(default)]
    seq: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct WireTrade {
    #[serde(rename = "T", default)]
    ts_ms: Option<i64>,
    #[serde(rename = "p", default)]
    price: Option<String>,
    #[serde(rename = "q", default)]
    qty: Option<String>,
    #[serde(rename = "S", default)]
    side: Option<String>,
    #[serde(rename = "m", default)]
    market: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TradeFrame {
    #[serde(default)]
    data: Vec<WireTrade>,
}

fn parse_side(tag: &str) -> Option<Side> {
    if tag.eq_ignore_ascii_case("BUY") {
        Some(Side::Buy)
    } else if tag.eq_ignore_ascii_case("SELL") {
        Some(Side::Sell)
    } else {
        None
    }
}

fn top_level(levels: &[WireLevel]) -> Result<Option<BookLevel>, ()> {
    let Some(level) = levels.first() else {
        // Empty side on the wire means "no resting quote".
        return Ok(None);
    };
    let px = level.px.parse::<f64>().map_err(|_| ())?;
    let qty = level.qty.parse::<f64>().map_err(|_| ())?;
    Ok(Some(BookLevel { px, qty }))
}

/// Decode one book frame for `market`. None means "nothing to apply":
/// malformed JSON, another market, an unknown type tag, or unparsable
/// levels. depth=1 frames always carry the full best level, so the
/// caller replaces its stored top of book wholesale.
pub fn decode_book_frame(raw: &str, market: &str) -> Option<BookUpdate> {
    let frame: BookFrame = serde_json::from_str(raw).ok()?;

    if let Some(t) = frame.msg_type.as_deref() {
        if t != "SNAPSHOT" && t != "DELTA" {
            return None;
        }
    }

    let payload = frame.data.unwrap_or_default();
    if let Some(m) = payload.market.as_deref() {
        // The subscription is per-market; a mismatched tag is a
        // misrouted frame.
        if m != market {
            return None;
        }
    }

    let bid = top_level(&payload.bids).ok()?;
    let ask = top_level(&payload.asks).ok()?;

    Some(BookUpdate {
        market: market.to_string(),
        bid,
        ask,
        ts_ms: frame.ts,
        seq: frame.seq,
    })
}

/// Decode one trades frame for `market`, keeping wire order. Records
/// missing any of T/p/q/S, with unparsable numbers, with a side tag
/// outside BUY/SELL, or tagged with another market are skipped;
/// `dropped` reports how many.
pub fn decode_trade_frame(raw: &str, market: &str, dropped: &mut u64) -> Vec<Trade> {
    let Ok(frame) = serde_json::from_str::<TradeFrame>(raw) else {
        return Vec::new();
    };

    let mut out = Vec::with_capacity(frame.data.len());
    for rec in frame.data {
        if let Some(m) = rec.market.as_deref() {
            if m != market {
                *dropped += 1;
                continue;
            }
        }
        let parsed = (|| {
            let ts_ms = rec.ts_ms?;
            let price = rec.price.as_deref()?.parse::<f64>().ok()?;
            let qty = rec.qty.as_deref()?.parse::<f64>().ok()?;
            let side = parse_side(rec.side.as_deref()?)?;
            Some(Trade { ts_ms, price, qty, side })
        })();
        match parsed {
            Some(t) => out.push(t),
            None => *dropped += 1,
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    const BOOK_SNAPSHOT: &str = r#"{
        "ts": 1701563440000,
        "type": "SNAPSHOT",
        "data": {"m":"BTC-USD","b":[{"p":"25670","q":"0.1"}],"a":[{"p":"25770","q":"0.2"}]},
        "seq": 42
    }"#;

    #[test]
    fn decodes_two_sided_snapshot() {
        let upd = decode_book_frame(BOOK_SNAPSHOT, "BTC-USD").unwrap();
        assert_eq!(upd.bid, Some(BookLevel { px: 25670.0, qty: 0.1 }));
        assert_eq!(upd.ask, Some(BookLevel { px: 25770.0, qty: 0.2 }));
        assert_eq!(upd.ts_ms, Some(1701563440000));
        assert_eq!(upd.seq, Some(42));
    }

    #[test]
    fn empty_side_decodes_to_cleared() {
        let raw = r#"{"ts":1,"type":"DELTA","data":{"m":"BTC-USD","b":[],"a":[{"p":"100","q":"1"}]},"seq":2}"#;
        let upd = decode_book_frame(raw, "BTC-USD").unwrap();
        assert_eq!(upd.bid, None);
        assert!(upd.ask.is_some());
    }

    #[test]
    fn other_market_is_ignored() {
        assert!(decode_book_frame(BOOK_SNAPSHOT, "ETH-USD").is_none());
    }

    #[test]
    fn unknown_type_tag_is_ignored_without_applying() {
        let raw = r#"{"ts":1,"type":"HEARTBEAT","data":{"m":"BTC-USD","b":[],"a":[]},"seq":3}"#;
        assert!(decode_book_frame(raw, "BTC-USD").is_none());
    }

    #[test]
    fn malformed_book_frame_is_dropped() {
        assert!(decode_book_frame("not json", "BTC-USD").is_none());
        let bad_px = r#"{"type":"SNAPSHOT","data":{"m":"BTC-USD","b":[{"p":"oops","q":"1"}],"a":[]}}"#;
        assert!(decode_book_frame(bad_px, "BTC-USD").is_none());
    }

    #[test]
    fn trades_keep_wire_order_and_skip_bad_records() {
        let raw = r#"{"data":[
            {"T": 1, "p":"100.5", "q":"0.2", "S":"BUY"},
            {"T": 2, "p":"100.6", "q":"0.1", "S":"SELL", "m":"BTC-USD"},
            {"T": 3, "p":"100.7", "q":"0.1", "S":"HODL"},
            {"T": 4, "q":"0.1", "S":"BUY"},
            {"T": 5, "p":"100.8", "q":"0.3", "S":"SELL", "m":"ETH-USD"}
        ]}"#;
        let mut dropped = 0;
        let trades = decode_trade_frame(raw, "BTC-USD", &mut dropped);
        assert_eq!(trades.len(), 2);
        assert_eq!(dropped, 3);
        assert_eq!(trades[0].ts_ms, 1);
        assert_eq!(trades[0].side, Side::Buy);
        assert_eq!(trades[1].ts_ms, 2);
        assert_eq!(trades[1].side, Side::Sell);
    }

    #[test]
    fn non_list_or_malformed_trade_frames_yield_nothing() {
        let mut dropped = 0;
        assert!(decode_trade_frame(r#"{"data":{"k":"v"}}"#, "BTC-USD", &mut dropped).is_empty());
        assert!(decode_trade_frame("garbage", "BTC-USD", &mut dropped).is_empty());
        assert_eq!(dropped, 0);
    }

    #[test]
    fn stream_urls_match_venue_layout() {
        assert_eq!(
            orderbook_url("wss://api.starknet.extended.exchange/", "BTC-USD", 1),
            "wss://api.starknet.extended.exchange/stream.extended.exchange/v1/orderbooks/BTC-USD?depth=1"
        );
        assert_eq!(
            trades_url("wss://api.starknet.extended.exchange", "ETH-USD"),
            "wss://api.starknet.extended.exchange/stream.extended.exchange/v1/publicTrades/ETH-USD"
        );
    }
}
