//! Historical trade archives.
//!
//! Reads extracted daily aggregate-trade CSV files into timestamp-ordered
//! trades. Download and decompression happen elsewhere.

use chrono::NaiveDate;
use footprint_core::{Error, Result, Trade};
use rust_decimal::Decimal;
use serde::Deserialize;
use std::fs::File;
use std::io::Read;
use std::path::Path;
use std::str::FromStr;
use tracing::warn;

/// One row of an aggTrades archive.
#[derive(Debug, Clone, Deserialize)]
pub struct AggTradeRecord {
    pub agg_trade_id: u64,
    /// Kept as text so no precision is lost before decimal parsing.
    pub price: String,
    pub quantity: String,
    pub first_trade_id: u64,
    pub last_trade_id: u64,
    pub transact_time: i64,
    pub is_buyer_maker: bool,
}

impl AggTradeRecord {
    /// Convert into a trade for the given exchange and symbol.
    pub fn into_trade(self, exchange: &str, symbol: &str) -> Result<Trade> {
        let price = Decimal::from_str(self.price.trim()).map_err(|e| {
            Error::archive(format!("trade {}: bad price {:?}: {e}", self.agg_trade_id, self.price))
        })?;
        let quantity = Decimal::from_str(self.quantity.trim()).map_err(|e| {
            Error::archive(format!(
                "trade {}: bad quantity {:?}: {e}",
                self.agg_trade_id, self.quantity
            ))
        })?;

        Ok(Trade {
            exchange: exchange.to_string(),
            symbol: symbol.to_string(),
            price,
            quantity,
            is_buyer_maker: self.is_buyer_maker,
            timestamp_ms: self.transact_time,
        })
    }
}

/// File name of the extracted archive for one day.
pub fn archive_file_name(symbol: &str, day: NaiveDate) -> String {
    format!("{symbol}-aggTrades-{}.csv", day.format("%Y-%m-%d"))
}

/// Parse a whole archive. Any malformed row fails the archive.
pub fn read_archive<R: Read>(reader: R, exchange: &str, symbol: &str) -> Result<Vec<Trade>> {
    let mut csv_reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .trim(csv::Trim::All)
        .from_reader(reader);

    let mut trades = Vec::new();
    for record in csv_reader.deserialize::<AggTradeRecord>() {
        let record = record.map_err(|e| Error::archive(e.to_string()))?;
        trades.push(record.into_trade(exchange, symbol)?);
    }

    if !trades.windows(2).all(|w| w[0].timestamp_ms <= w[1].timestamp_ms) {
        warn!(symbol, rows = trades.len(), "Archive rows out of order, sorting by time");
        trades.sort_by_key(|t| t.timestamp_ms);
    }

    Ok(trades)
}

/// Open and parse an archive file.
pub fn read_archive_file(
    path: impl AsRef<Path>,
    exchange: &str,
    symbol: &str,
) -> Result<Vec<Trade>> {
    let path = path.as_ref();
    let file = File::open(path)
        .map_err(|e| Error::archive(format!("unable to open {}: {e}", path.display())))?;
    read_archive(file, exchange, symbol)
}
