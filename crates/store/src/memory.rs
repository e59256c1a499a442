//! In-memory candle store.

use crate::CandleStore;
use footprint_core::{
    CandleId, CandleKey, ClosedCandle, Interval, Result, TimestampMs, TimestampRange,
};
use std::collections::{BTreeMap, HashMap};
use std::ops::RangeInclusive;

/// Candle store backed by an ordered map.
#[derive(Debug, Default)]
pub struct MemoryCandleStore {
    candles: BTreeMap<CandleKey, ClosedCandle>,
}

impl MemoryCandleStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Total stored candles.
    pub fn len(&self) -> usize {
        self.candles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.candles.is_empty()
    }
}

fn key(exchange: &str, symbol: &str, interval: Interval, open_time_ms: TimestampMs) -> CandleKey {
    CandleKey {
        exchange: exchange.to_string(),
        symbol: symbol.to_string(),
        interval,
        open_time_ms,
    }
}

fn key_range(
    exchange: &str,
    symbol: &str,
    first: (Interval, TimestampMs),
    last: (Interval, TimestampMs),
) -> RangeInclusive<CandleKey> {
    key(exchange, symbol, first.0, first.1)..=key(exchange, symbol, last.0, last.1)
}

impl CandleStore for MemoryCandleStore {
    fn upsert_candles(&mut self, candles: &[ClosedCandle]) -> Result<Vec<CandleId>> {
        let mut ids = Vec::with_capacity(candles.len());
        for candle in candles {
            let mut stored = candle.clone();
            stored.did_persist_to_store = true;
            ids.push(stored.id);
            self.candles.insert(stored.key(), stored);
        }
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
        let from_ms = from_ms.unwrap_or(TimestampMs::MIN);
        let to_ms = to_ms.unwrap_or(TimestampMs::MAX);
        if from_ms > to_ms {
            return Ok(Vec::new());
        }
        let range = key_range(exchange, symbol, (interval, from_ms), (interval, to_ms));
        Ok(self.candles.range(range).map(|(_, c)| c.clone()).collect())
    }

    fn timestamp_range(
        &self,
        exchange: &str,
        symbol: &str,
    ) -> Result<BTreeMap<Interval, TimestampRange>> {
        let range = key_range(
            exchange,
            symbol,
            (Interval::M1, TimestampMs::MIN),
            (Interval::MN1, TimestampMs::MAX),
        );

        let mut ranges: BTreeMap<Interval, TimestampRange> = BTreeMap::new();
        for key in self.candles.range(range).map(|(k, _)| k) {
            ranges
                .entry(key.interval)
                .and_modify(|r| r.last = key.open_time_ms)
                .or_insert(TimestampRange {
                    first: key.open_time_ms,
                    last: key.open_time_ms,
                });
        }
        Ok(ranges)
    }

    fn prune_old(&mut self, keep_per_series: usize) -> Result<usize> {
        let mut series_len: HashMap<(String, String, Interval), usize> = HashMap::new();
        for key in self.candles.keys() {
            *series_len
                .entry((key.exchange.clone(), key.symbol.clone(), key.interval))
                .or_default() += 1;
        }

        let before = self.candles.len();
        // Keys are ascending within a series, so the oldest come first.
        let mut seen: HashMap<(String, String, Interval), usize> = HashMap::new();
        self.candles.retain(|key, _| {
            let series = (key.exchange.clone(), key.symbol.clone(), key.interval);
            let total = series_len.get(&series).copied().unwrap_or(0);
            let index = seen.entry(series).or_default();
            *index += 1;
            total.saturating_sub(*index) < keep_per_series
        });
        Ok(before - self.candles.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use footprint_core::OpenCandle;

    fn candle(symbol: &str, interval: Interval, open_ms: TimestampMs) -> ClosedCandle {
        OpenCandle::new("binance", symbol, interval, open_ms).into_closed()
    }

    #[test]
    fn test_upsert_returns_ids_and_marks_persisted() {
        let mut store = MemoryCandleStore::new();
        let candles = vec![
            candle("BTCUSDT", Interval::M1, 0),
            candle("BTCUSDT", Interval::M1, 60_000),
        ];
        let ids = store.upsert_candles(&candles).unwrap();

        assert_eq!(ids, vec![candles[0].id, candles[1].id]);
        let stored = store.query_candles("binance", "BTCUSDT", Interval::M1, None, None).unwrap();
        assert_eq!(stored.len(), 2);
        assert!(stored.iter().all(|c| c.did_persist_to_store));
    }

    #[test]
    fn test_upsert_is_idempotent_on_key() {
        let mut store = MemoryCandleStore::new();
        store.upsert_candles(&[candle("BTCUSDT", Interval::M1, 0)]).unwrap();
        let replacement = candle("BTCUSDT", Interval::M1, 0);
        store.upsert_candles(&[replacement.clone()]).unwrap();

        assert_eq!(store.len(), 1);
        let stored = store.query_candles("binance", "BTCUSDT", Interval::M1, None, None).unwrap();
        assert_eq!(stored[0].id, replacement.id);
    }

    #[test]
    fn test_query_filters_series_and_time() {
        let mut store = MemoryCandleStore::new();
        let candles: Vec<ClosedCandle> = (0..10)
            .map(|m| candle("BTCUSDT", Interval::M1, m * 60_000))
            .chain([candle("ETHUSDT", Interval::M1, 0), candle("BTCUSDT", Interval::M5, 0)])
            .collect();
        store.upsert_candles(&candles).unwrap();

        let stored = store
            .query_candles("binance", "BTCUSDT", Interval::M1, Some(120_000), Some(300_000))
            .unwrap();
        let opens: Vec<TimestampMs> = stored.iter().map(|c| c.open_time_ms).collect();
        assert_eq!(opens, vec![120_000, 180_000, 240_000, 300_000]);
    }

    #[test]
    fn test_timestamp_range_per_interval() {
        let mut store = MemoryCandleStore::new();
        let candles = vec![
            candle("BTCUSDT", Interval::M1, 60_000),
            candle("BTCUSDT", Interval::M1, 600_000),
            candle("BTCUSDT", Interval::M1, 0),
            candle("BTCUSDT", Interval::H1, 3_600_000),
            candle("ETHUSDT", Interval::M1, 0),
        ];
        store.upsert_candles(&candles).unwrap();

        let ranges = store.timestamp_range("binance", "BTCUSDT").unwrap();
        assert_eq!(ranges.len(), 2);
        assert_eq!(ranges[&Interval::M1], TimestampRange { first: 0, last: 600_000 });
        assert_eq!(ranges[&Interval::H1], TimestampRange { first: 3_600_000, last: 3_600_000 });
    }

    #[test]
    fn test_prune_keeps_newest_per_series() {
        let mut store = MemoryCandleStore::new();
        let candles: Vec<ClosedCandle> = (0..5)
            .map(|m| candle("BTCUSDT", Interval::M1, m * 60_000))
            .chain((0..2).map(|m| candle("ETHUSDT", Interval::M1, m * 60_000)))
            .collect();
        store.upsert_candles(&candles).unwrap();

        assert_eq!(store.prune_old(3).unwrap(), 2);
        let btc = store.query_candles("binance", "BTCUSDT", Interval::M1, None, None).unwrap();
        assert_eq!(btc.first().map(|c| c.open_time_ms), Some(120_000));
        let eth = store
            .query_candles("binance", "ETHUSDT", Interval::M1, None, None)
            .unwrap();
        assert_eq!(eth.len(), 2);
    }
}
