//! SQLite candle store.
//!
//! One `candles` table keyed by (exchange, symbol, interval, open_time).
//! Decimals are stored as text so no precision is lost; price levels are a
//! JSON array in a text column.

use crate::CandleStore;
use footprint_core::{
    CandleId, ClosedCandle, ClosedPriceLevel, Error, Interval, Price, Result, TimestampMs,
    TimestampRange,
};
use rusqlite::{params, Connection, Row};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use std::str::FromStr;
use std::time::Instant;
use tracing::{debug, info, warn};
use uuid::Uuid;

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS candles (
    id                    TEXT    NOT NULL,
    exchange              TEXT    NOT NULL,
    symbol                TEXT    NOT NULL,
    interval              TEXT    NOT NULL,
    open_time             INTEGER NOT NULL,
    close_time            INTEGER NOT NULL,
    aggressive_bid        TEXT    NOT NULL,
    aggressive_ask        TEXT    NOT NULL,
    volume                TEXT    NOT NULL,
    volume_delta          TEXT    NOT NULL,
    high                  TEXT    NOT NULL,
    low                   TEXT    NOT NULL,
    close                 TEXT    NOT NULL,
    trade_count           INTEGER NOT NULL,
    bid_imbalance_percent TEXT,
    price_levels          TEXT    NOT NULL,
    PRIMARY KEY (exchange, symbol, interval, open_time)
);
";

const UPSERT: &str = "
INSERT INTO candles (
    id, exchange, symbol, interval, open_time, close_time,
    aggressive_bid, aggressive_ask, volume, volume_delta,
    high, low, close, trade_count, bid_imbalance_percent, price_levels
) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16)
ON CONFLICT (exchange, symbol, interval, open_time) DO UPDATE SET
    id = excluded.id,
    close_time = excluded.close_time,
    aggressive_bid = excluded.aggressive_bid,
    aggressive_ask = excluded.aggressive_ask,
    volume = excluded.volume,
    volume_delta = excluded.volume_delta,
    high = excluded.high,
    low = excluded.low,
    close = excluded.close,
    trade_count = excluded.trade_count,
    bid_imbalance_percent = excluded.bid_imbalance_percent,
    price_levels = excluded.price_levels
";

const SELECT_COLUMNS: &str = "
SELECT id, exchange, symbol, interval, open_time, close_time,
       aggressive_bid, aggressive_ask, volume, volume_delta,
       high, low, close, trade_count, bid_imbalance_percent, price_levels
FROM candles
";

/// Price level as stored in the `price_levels` column.
#[derive(Debug, Serialize, Deserialize)]
struct StoredLevel {
    #[serde(with = "rust_decimal::serde::str")]
    price: Price,
    #[serde(with = "rust_decimal::serde::str")]
    bid: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    ask: Decimal,
    #[serde(with = "rust_decimal::serde::str_option")]
    imbalance: Option<Decimal>,
}

/// Row as read from SQLite, before decimal parsing.
struct RawCandle {
    id: String,
    exchange: String,
    symbol: String,
    interval: String,
    open_time_ms: i64,
    close_time_ms: i64,
    aggressive_bid: String,
    aggressive_ask: String,
    volume: String,
    volume_delta: String,
    high: String,
    low: String,
    close: String,
    trade_count: i64,
    bid_imbalance_percent: Option<String>,
    price_levels: String,
}

impl RawCandle {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            exchange: row.get(1)?,
            symbol: row.get(2)?,
            interval: row.get(3)?,
            open_time_ms: row.get(4)?,
            close_time_ms: row.get(5)?,
            aggressive_bid: row.get(6)?,
            aggressive_ask: row.get(7)?,
            volume: row.get(8)?,
            volume_delta: row.get(9)?,
            high: row.get(10)?,
            low: row.get(11)?,
            close: row.get(12)?,
            trade_count: row.get(13)?,
            bid_imbalance_percent: row.get(14)?,
            price_levels: row.get(15)?,
        })
    }

    fn into_candle(self) -> Result<ClosedCandle> {
        let id = Uuid::parse_str(&self.id)
            .map_err(|e| Error::storage(format!("bad candle id {:?}: {e}", self.id)))?;
        let levels: Vec<StoredLevel> = serde_json::from_str(&self.price_levels)?;
        let bid_imbalance_percent = self
            .bid_imbalance_percent
            .as_deref()
            .map(parse_decimal)
            .transpose()?;

        Ok(ClosedCandle {
            id: CandleId(id),
            exchange: self.exchange,
            symbol: self.symbol,
            interval: Interval::from_str(&self.interval)?,
            open_time_ms: self.open_time_ms,
            close_time_ms: self.close_time_ms,
            aggressive_bid: parse_decimal(&self.aggressive_bid)?,
            aggressive_ask: parse_decimal(&self.aggressive_ask)?,
            volume: parse_decimal(&self.volume)?,
            volume_delta: parse_decimal(&self.volume_delta)?,
            high: parse_decimal(&self.high)?,
            low: parse_decimal(&self.low)?,
            close: parse_decimal(&self.close)?,
            trade_count: u64::try_from(self.trade_count).unwrap_or_default(),
            bid_imbalance_percent,
            price_levels: levels
                .into_iter()
                .map(|level| {
                    (
                        level.price,
                        ClosedPriceLevel {
                            vol_sum_bid: level.bid,
                            vol_sum_ask: level.ask,
                            imbalance_percent: level.imbalance,
                        },
                    )
                })
                .collect(),
            did_persist_to_store: true,
        })
    }
}

fn parse_decimal(text: &str) -> Result<Decimal> {
    Decimal::from_str(text).map_err(|e| Error::storage(format!("bad decimal {text:?}: {e}")))
}

fn sql_err(e: rusqlite::Error) -> Error {
    Error::storage(e.to_string())
}

fn encode_levels(candle: &ClosedCandle) -> Result<String> {
    let levels: Vec<StoredLevel> = candle
        .price_levels
        .iter()
        .map(|(price, level)| StoredLevel {
            price: *price,
            bid: level.vol_sum_bid,
            ask: level.vol_sum_ask,
            imbalance: level.imbalance_percent,
        })
        .collect();
    Ok(serde_json::to_string(&levels)?)
}

/// Candle store backed by a SQLite database.
pub struct SqliteCandleStore {
    conn: Connection,
}

impl SqliteCandleStore {
    /// Open (or create) a database file.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let conn = Connection::open(path).map_err(sql_err)?;
        // Some filesystems do not support WAL; the database still works.
        match enable_wal(&conn) {
            Ok(mode) if mode.eq_ignore_ascii_case("wal") => {}
            Ok(mode) => warn!(path = %path.display(), %mode, "WAL journal not available"),
            Err(e) => warn!(path = %path.display(), error = %e, "Failed to enable WAL journal"),
        }
        Self::with_connection(conn)
    }

    /// Private in-memory database.
    pub fn open_in_memory() -> Result<Self> {
        Self::with_connection(Connection::open_in_memory().map_err(sql_err)?)
    }

    /// Journal mode currently in effect.
    pub fn journal_mode(&self) -> Result<String> {
        self.conn
            .pragma_query_value(None, "journal_mode", |row| row.get(0))
            .map_err(sql_err)
    }

    fn with_connection(conn: Connection) -> Result<Self> {
        conn.execute_batch(SCHEMA).map_err(sql_err)?;
        Ok(Self { conn })
    }
}

/// Switch to WAL and return the journal mode SQLite settled on.
fn enable_wal(conn: &Connection) -> rusqlite::Result<String> {
    conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))
}

impl CandleStore for SqliteCandleStore {
    fn upsert_candles(&mut self, candles: &[ClosedCandle]) -> Result<Vec<CandleId>> {
        if candles.is_empty() {
            return Ok(Vec::new());
        }
        let start = Instant::now();
        let tx = self.conn.transaction().map_err(sql_err)?;
        let mut ids = Vec::with_capacity(candles.len());
        {
            let mut stmt = tx.prepare_cached(UPSERT).map_err(sql_err)?;
            for candle in candles {
                stmt.execute(params![
                    candle.id.to_string(),
                    candle.exchange,
                    candle.symbol,
                    candle.interval.as_str(),
                    candle.open_time_ms,
                    candle.close_time_ms,
                    candle.aggressive_bid.to_string(),
                    candle.aggressive_ask.to_string(),
                    candle.volume.to_string(),
                    candle.volume_delta.to_string(),
                    candle.high.to_string(),
                    candle.low.to_string(),
                    candle.close.to_string(),
                    i64::try_from(candle.trade_count).unwrap_or(i64::MAX),
                    candle.bid_imbalance_percent.map(|d| d.to_string()),
                    encode_levels(candle)?,
                ])
                .map_err(sql_err)?;
                ids.push(candle.id);
            }
        }
        tx.commit().map_err(sql_err)?;

        debug!(
            count = ids.len(),
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Upserted candles"
        );
        Ok(ids)
    }

    fn query_candles(
        &self,
        exchange: &str,
        symbol: &str,
        interval: Interval,
        from_ms: Option<TimestampMs>,
        to_ms: Option<TimestampMs>,
    ) -> Result<Vec<ClosedCandle>> {
        let query = format!(
            "{SELECT_COLUMNS} WHERE exchange = ?1 AND symbol = ?2 AND interval = ?3 \
             AND (?4 IS NULL OR open_time >= ?4) AND (?5 IS NULL OR open_time <= ?5) \
             ORDER BY open_time ASC"
        );
        let mut stmt = self.conn.prepare_cached(&query).map_err(sql_err)?;
        let rows = stmt
            .query_map(
                params![exchange, symbol, interval.as_str(), from_ms, to_ms],
                RawCandle::from_row,
            )
            .map_err(sql_err)?;

        let mut candles = Vec::new();
        for row in rows {
            candles.push(row.map_err(sql_err)?.into_candle()?);
        }
        Ok(candles)
    }

    fn timestamp_range(
        &self,
        exchange: &str,
        symbol: &str,
    ) -> Result<BTreeMap<Interval, TimestampRange>> {
        let mut stmt = self
            .conn
            .prepare_cached(
                "SELECT interval, MIN(open_time), MAX(open_time) FROM candles \
                 WHERE exchange = ?1 AND symbol = ?2 GROUP BY interval",
            )
            .map_err(sql_err)?;
        let rows = stmt
            .query_map(params![exchange, symbol], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, i64>(1)?,
                    row.get::<_, i64>(2)?,
                ))
            })
            .map_err(sql_err)?;

        let mut ranges = BTreeMap::new();
        for row in rows {
            let (interval, first, last) = row.map_err(sql_err)?;
            ranges.insert(Interval::from_str(&interval)?, TimestampRange { first, last });
        }
        Ok(ranges)
    }

    fn stored_open_times(
        &self,
        exchange: &str,
        symbol: &str,
        interval: Interval,
        range: TimestampRange,
    ) -> Result<BTreeSet<TimestampMs>> {
        let mut stmt = self
            .conn
            .prepare_cached(
                "SELECT open_time FROM candles WHERE exchange = ?1 AND symbol = ?2 \
                 AND interval = ?3 AND open_time >= ?4 AND open_time <= ?5",
            )
            .map_err(sql_err)?;
        let rows = stmt
            .query_map(
                params![exchange, symbol, interval.as_str(), range.first, range.last],
                |row| row.get::<_, i64>(0),
            )
            .map_err(sql_err)?;

        let mut open_times = BTreeSet::new();
        for row in rows {
            open_times.insert(row.map_err(sql_err)?);
        }
        Ok(open_times)
    }

    fn prune_old(&mut self, keep_per_series: usize) -> Result<usize> {
        let deleted = self
            .conn
            .execute(
                "DELETE FROM candles WHERE rowid IN ( \
                     SELECT rowid FROM ( \
                         SELECT rowid, ROW_NUMBER() OVER ( \
                             PARTITION BY exchange, symbol, interval ORDER BY open_time DESC \
                         ) AS rn FROM candles \
                     ) WHERE rn > ?1 \
                 )",
                params![i64::try_from(keep_per_series).unwrap_or(i64::MAX)],
            )
            .map_err(sql_err)?;
        if deleted > 0 {
            info!(deleted, keep_per_series, "Pruned stored candles");
        }
        Ok(deleted)
    }
}
