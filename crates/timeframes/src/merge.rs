//! Merging consecutive candles into one higher-interval candle.

use footprint_core::{ClosedCandle, Error, Interval, OpenCandle, Result};

/// Merge consecutive candles of one series into a single `target` candle.
///
/// The inputs must share exchange, symbol and interval and be contiguous in
/// ascending time. Volumes and price levels are summed over every input;
/// high, low and close come from the inputs that saw trades. The result gets
/// a fresh id and freshly derived imbalance percentages.
pub fn merge_candles<'a, I>(candles: I, target: Interval) -> Result<ClosedCandle>
where
    I: IntoIterator<Item = &'a ClosedCandle>,
{
    let mut iter = candles.into_iter();
    let first = iter
        .next()
        .ok_or_else(|| Error::data(format!("no candles to merge into {target}")))?;

    let mut merged = OpenCandle::new(
        first.exchange.clone(),
        first.symbol.clone(),
        target,
        first.open_time_ms,
    );
    absorb(&mut merged, first);

    let mut last = first;
    for candle in iter {
        check_follows(last, candle)?;
        absorb(&mut merged, candle);
        last = candle;
    }
    merged.close_time_ms = last.close_time_ms;

    Ok(merged.into_closed())
}

fn check_follows(prev: &ClosedCandle, next: &ClosedCandle) -> Result<()> {
    if prev.exchange != next.exchange
        || prev.symbol != next.symbol
        || prev.interval != next.interval
    {
        return Err(Error::data(format!(
            "cannot merge {}/{}/{} with {}/{}/{}",
            prev.exchange, prev.symbol, prev.interval, next.exchange, next.symbol, next.interval
        )));
    }
    if prev.close_time_ms + 1 != next.open_time_ms {
        return Err(Error::data(format!(
            "{} {} candles not contiguous: {} then {}",
            next.symbol, next.interval, prev.open_time_ms, next.open_time_ms
        )));
    }
    Ok(())
}

fn absorb(merged: &mut OpenCandle, candle: &ClosedCandle) {
    merged.aggressive_bid += candle.aggressive_bid;
    merged.aggressive_ask += candle.aggressive_ask;
    merged.volume += candle.volume;
    merged.volume_delta += candle.volume_delta;

    for (price, level) in &candle.price_levels {
        let entry = merged.price_levels.entry(*price).or_default();
        entry.vol_sum_bid += level.vol_sum_bid;
        entry.vol_sum_ask += level.vol_sum_ask;
    }

    // Empty candles carry placeholder prices.
    if !candle.is_empty() {
        merged.extend_range(candle.high, candle.low);
        merged.close = candle.close;
        merged.trade_count += candle.trade_count;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use footprint_core::{AggressorSide, TimestampMs};
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;

    const MINUTE: TimestampMs = 60_000;

    fn minute(index: i64, trades: &[(AggressorSide, Decimal, Decimal)]) -> ClosedCandle {
        let mut candle = OpenCandle::new("binance", "BTCUSDT", Interval::M1, index * MINUTE);
        for (side, qty, price) in trades {
            candle.add_trade(*side, *qty, *price, *price);
        }
        candle.into_closed()
    }

    #[test]
    fn test_merge_sums_and_extremes() {
        use AggressorSide::{Ask, Bid};
        let candles = vec![
            minute(0, &[(Bid, dec!(1), dec!(100)), (Ask, dec!(2), dec!(99))]),
            minute(1, &[(Bid, dec!(3), dec!(104))]),
            minute(2, &[(Ask, dec!(1), dec!(101)), (Bid, dec!(1), dec!(100))]),
            minute(3, &[(Ask, dec!(0.5), dec!(98))]),
            minute(4, &[(Bid, dec!(0.5), dec!(102))]),
        ];

        let merged = merge_candles(&candles, Interval::M5).unwrap();

        assert_eq!(merged.interval, Interval::M5);
        assert_eq!(merged.open_time_ms, 0);
        assert_eq!(merged.close_time_ms, 5 * MINUTE - 1);
        assert_eq!(merged.volume, dec!(9));
        assert_eq!(merged.aggressive_bid, dec!(5.5));
        assert_eq!(merged.aggressive_ask, dec!(3.5));
        assert_eq!(merged.volume_delta, dec!(2));
        assert_eq!(merged.high, dec!(104));
        assert_eq!(merged.low, dec!(98));
        assert_eq!(merged.close, dec!(102));
        assert_eq!(merged.trade_count, 7);
        assert_eq!(merged.price_levels.len(), 6);
        assert_eq!(merged.price_levels[&dec!(100)].vol_sum_bid, dec!(2));
        assert_eq!(merged.bid_imbalance_percent, Some(dec!(61.11)));
        assert!(candles.iter().all(|c| c.id != merged.id));
        assert!(!merged.did_persist_to_store);
    }

    #[test]
    fn test_empty_inputs_do_not_touch_range() {
        use AggressorSide::Bid;
        let candles = vec![
            minute(0, &[]),
            minute(1, &[(Bid, dec!(1), dec!(250))]),
            minute(2, &[]),
        ];

        let merged = merge_candles(&candles, Interval::M5).unwrap();
        assert_eq!(merged.low, dec!(250));
        assert_eq!(merged.high, dec!(250));
        assert_eq!(merged.close, dec!(250));
        assert_eq!(merged.trade_count, 1);
    }

    #[test]
    fn test_all_empty_inputs() {
        let candles: Vec<ClosedCandle> = (0..5).map(|i| minute(i, &[])).collect();
        let merged = merge_candles(&candles, Interval::M5).unwrap();

        assert!(merged.is_empty());
        assert_eq!(merged.volume, dec!(0));
        assert_eq!(merged.high, dec!(0));
        assert_eq!(merged.bid_imbalance_percent, None);
    }

    #[test]
    fn test_no_input_is_error() {
        let candles: Vec<ClosedCandle> = Vec::new();
        assert!(matches!(merge_candles(&candles, Interval::M5), Err(Error::Data(_))));
    }

    #[test]
    fn test_gap_is_error() {
        let candles = vec![minute(0, &[]), minute(2, &[])];
        assert!(matches!(merge_candles(&candles, Interval::M5), Err(Error::Data(_))));
    }

    #[test]
    fn test_mixed_symbols_is_error() {
        let mut other = minute(1, &[]);
        other.symbol = "ETHUSDT".to_string();
        let candles = vec![minute(0, &[]), other];
        assert!(matches!(merge_candles(&candles, Interval::M5), Err(Error::Data(_))));
    }
}
