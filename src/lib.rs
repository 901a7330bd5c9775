// ===============================
// src/lib.rs
// ===============================
//! Paper market maker on the Extended exchange public streams.
//!
//! Streams depth-1 order books and public trades for a set of
//! perpetual markets, picks the most attractive ones each tick,
//! quotes both sides around mid on paper, and replays real prints
//! against the quotes to track fills, inventory and PnL. Prometheus
//! metrics and an optional JSONL event log ride along.

pub mod app;
pub mod book;
pub mod config;
pub mod domain;
pub mod extended;
pub mod feed;
pub mod metrics;
pub mod paper;
pub mod recorder;
pub mod selector;
pub mod sink;
pub mod tape;
