//! CandleVault Core: resumable, batched historical candle extraction.
//!
//! This crate contains the extraction engine:
//! - Domain types (candles, intervals, series, jobs)
//! - Provider seam with a paginating Binance klines client and circuit breaker
//! - Date-range partitioning and the retrying batch fetcher
//! - Checkpoint and staging stores that make interrupted runs resumable
//! - Series validation and the multi-symbol outer-join merger
//! - The per-symbol state machine that drives all of it

pub mod data;
pub mod domain;
pub mod extract;
