//! Durable candle storage for the footprint candle engine.
//!
//! This crate handles:
//! - The storage interface used by backfill and the live flusher
//! - An in-memory store for tests and dry runs
//! - A SQLite store

pub mod memory;
pub mod sqlite;

use footprint_core::{CandleId, ClosedCandle, Interval, Result, TimestampMs, TimestampRange};
use std::collections::{BTreeMap, BTreeSet};

pub use memory::MemoryCandleStore;
pub use sqlite::SqliteCandleStore;

/// Storage engine for closed candles.
///
/// Candles are keyed by (exchange, symbol, interval, open time); writing
/// the same key twice replaces the earlier row.
pub trait CandleStore {
    /// Insert or replace candles. Returns the ids of every written candle.
    fn upsert_candles(&mut self, candles: &[ClosedCandle]) -> Result<Vec<CandleId>>;

    /// Stored candles of one series in ascending open time, optionally
    /// restricted to `[from_ms, to_ms]`.
    fn query_candles(
        &self,
        exchange: &str,
        symbol: &str,
        interval: Interval,
        from_ms: Option<TimestampMs>,
        to_ms: Option<TimestampMs>,
    ) -> Result<Vec<ClosedCandle>>;

    /// First and last stored open time per interval.
    fn timestamp_range(
        &self,
        exchange: &str,
        symbol: &str,
    ) -> Result<BTreeMap<Interval, TimestampRange>>;

    /// Open times present in storage within `range`.
    fn stored_open_times(
        &self,
        exchange: &str,
        symbol: &str,
        interval: Interval,
        range: TimestampRange,
    ) -> Result<BTreeSet<TimestampMs>> {
        Ok(self
            .query_candles(exchange, symbol, interval, Some(range.first), Some(range.last))?
            .into_iter()
            .map(|c| c.open_time_ms)
            .collect())
    }

    /// Keep only the newest `keep_per_series` candles of every series.
    /// Returns the number of deleted candles.
    fn prune_old(&mut self, keep_per_series: usize) -> Result<usize>;
}
