//! Pre-flight diagnostics run before a backfill.

use chrono::DateTime;
use footprint_core::{Interval, Result, TimestampMs, TimestampRange};
use footprint_store::CandleStore;
use footprint_timeframes::{Gap, GapDetector};
use std::collections::BTreeMap;
use tracing::info;

/// Gap lists above this size are only summarized.
const GAP_DETAIL_LIMIT: usize = 10;

fn format_ts(ts_ms: TimestampMs) -> String {
    DateTime::from_timestamp_millis(ts_ms)
        .map(|dt| dt.format("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_else(|| ts_ms.to_string())
}

/// Log the stored first/last open time of every interval.
pub fn log_stored_ranges(
    symbol: &str,
    ranges: &BTreeMap<Interval, TimestampRange>,
) {
    if ranges.is_empty() {
        info!(symbol, "No stored candles");
        return;
    }
    for (interval, range) in ranges {
        info!(
            symbol,
            %interval,
            first = %format_ts(range.first),
            last = %format_ts(range.last),
            "Stored range"
        );
    }
}

/// Find gaps in every stored interval of a series.
///
/// Totals are always logged; individual gaps only when there are few.
pub fn gap_report<S: CandleStore>(
    store: &S,
    exchange: &str,
    symbol: &str,
) -> Result<BTreeMap<Interval, Vec<Gap>>> {
    let ranges = store.timestamp_range(exchange, symbol)?;
    let mut report = BTreeMap::new();

    for (interval, range) in ranges {
        let present = store.stored_open_times(exchange, symbol, interval, range)?;
        let gaps = GapDetector::new(interval).find_gaps(range, &present);

        info!(
            symbol,
            %interval,
            gaps = gaps.len(),
            missing = GapDetector::total_missing(&gaps),
            "Gap check"
        );
        if gaps.len() < GAP_DETAIL_LIMIT {
            for gap in &gaps {
                info!(
                    symbol,
                    %interval,
                    start = %format_ts(gap.start_ms),
                    end = %format_ts(gap.end_ms),
                    missing = gap.missing,
                    "Gap"
                );
            }
        }
        report.insert(interval, gaps);
    }

    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use footprint_core::interval::HOUR_MS;
    use footprint_core::{ClosedCandle, OpenCandle};
    use footprint_store::MemoryCandleStore;

    // 2024-01-01 00:00:00 UTC
    const JAN_1_2024: TimestampMs = 1_704_067_200_000;

    #[test]
    fn test_report_per_interval() {
        let mut store = MemoryCandleStore::new();
        let hours: Vec<ClosedCandle> = (0..24)
            .filter(|h| *h != 7)
            .map(|h| {
                OpenCandle::new("binance", "BTCUSDT", Interval::H1, JAN_1_2024 + h * HOUR_MS)
                    .into_closed()
            })
            .collect();
        store.upsert_candles(&hours).unwrap();
        let day = OpenCandle::new("binance", "BTCUSDT", Interval::D1, JAN_1_2024).into_closed();
        store.upsert_candles(&[day]).unwrap();

        let report = gap_report(&store, "binance", "BTCUSDT").unwrap();
        assert_eq!(report.len(), 2);
        assert_eq!(report[&Interval::H1].len(), 1);
        assert_eq!(report[&Interval::H1][0].start_ms, JAN_1_2024 + 7 * HOUR_MS);
        assert!(report[&Interval::D1].is_empty());
    }

    #[test]
    fn test_empty_store_has_no_report() {
        let store = MemoryCandleStore::new();
        assert!(gap_report(&store, "binance", "BTCUSDT").unwrap().is_empty());
    }

    #[test]
    fn test_format_ts() {
        assert_eq!(format_ts(JAN_1_2024), "2024-01-01 00:00:00");
    }
}
