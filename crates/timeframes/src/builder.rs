//! Multi-resolution candle builder.
//!
//! Keeps a short history of closed candles per interval and, whenever a
//! close lands on a higher interval's boundary, merges the matching window
//! into the higher candle. Produced candles are fed back in, so a single
//! 1m close at midnight can cascade all the way to the daily candle.

use crate::merge::merge_candles;
use crate::rules::{rules_for, MergeRule};
use footprint_core::{ClosedCandle, Interval};
use std::collections::VecDeque;
use tracing::{debug, info, warn};

/// Builds higher-interval candles out of closed lower-interval candles.
#[derive(Debug)]
pub struct MultiResolutionBuilder {
    /// Recent closed candles per interval, oldest first.
    buffers: [VecDeque<ClosedCandle>; Interval::COUNT],
    /// History needed by the widest rule reading each interval.
    capacity: [usize; Interval::COUNT],
}

impl Default for MultiResolutionBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl MultiResolutionBuilder {
    pub fn new() -> Self {
        let capacity = Interval::ALL.map(|interval| {
            rules_for(interval)
                .iter()
                .map(MergeRule::max_required_base_count)
                .max()
                .unwrap_or(0)
        });
        Self {
            buffers: std::array::from_fn(|_| VecDeque::new()),
            capacity,
        }
    }

    /// Preload history, e.g. stored daily candles so that weekly and monthly
    /// candles can complete after a restart.
    pub fn seed(&mut self, candles: impl IntoIterator<Item = ClosedCandle>) {
        let mut candles: Vec<ClosedCandle> = candles.into_iter().collect();
        candles.sort_by_key(|c| (c.interval, c.open_time_ms));
        let count = candles.len();
        for candle in candles {
            self.remember(candle);
        }
        debug!(count, "Seeded builder history");
    }

    /// Record a closed candle and build every higher candle it completes.
    ///
    /// Returns the produced candles in the order they were built. Windows
    /// with missing history are skipped.
    pub fn on_candle_closed(&mut self, closed: &ClosedCandle) -> Vec<ClosedCandle> {
        let mut produced = Vec::new();
        let mut work = vec![closed.clone()];

        while let Some(candle) = work.pop() {
            if !self.remember(candle.clone()) {
                continue;
            }

            let next_open_ms = candle.close_time_ms + 1;
            for rule in rules_for(candle.interval) {
                if !rule.is_boundary(next_open_ms) {
                    continue;
                }
                if let Some(merged) = self.build(rule, &candle) {
                    info!(
                        symbol = %merged.symbol,
                        interval = %merged.interval,
                        open_time_ms = merged.open_time_ms,
                        volume = %merged.volume,
                        "Built higher-interval candle"
                    );
                    produced.push(merged.clone());
                    work.push(merged);
                }
            }
        }

        produced
    }

    /// Buffered history of one interval, oldest first.
    pub fn history(&self, interval: Interval) -> &VecDeque<ClosedCandle> {
        &self.buffers[interval.index()]
    }

    /// Drop all buffered history.
    pub fn clear(&mut self) {
        for buffer in &mut self.buffers {
            buffer.clear();
        }
    }

    /// Append to the interval's buffer. Returns false for stale candles.
    fn remember(&mut self, candle: ClosedCandle) -> bool {
        let index = candle.interval.index();
        let capacity = self.capacity[index];
        let buffer = &mut self.buffers[index];

        match buffer.back() {
            Some(last) if last.open_time_ms == candle.open_time_ms => {
                buffer.pop_back();
            }
            Some(last) if last.open_time_ms > candle.open_time_ms => {
                warn!(
                    symbol = %candle.symbol,
                    interval = %candle.interval,
                    open_time_ms = candle.open_time_ms,
                    latest_ms = last.open_time_ms,
                    "Ignoring candle older than buffered history"
                );
                return false;
            }
            _ => {}
        }

        if capacity > 0 {
            buffer.push_back(candle);
            while buffer.len() > capacity {
                buffer.pop_front();
            }
        }
        true
    }

    fn build(&self, rule: &MergeRule, closed: &ClosedCandle) -> Option<ClosedCandle> {
        let next_open_ms = closed.close_time_ms + 1;
        let target_open_ms = rule.target_open(next_open_ms);
        let required = rule.required_base_count(next_open_ms);
        let buffer = &self.buffers[rule.base.index()];

        if required == 0 || buffer.len() < required {
            debug!(
                symbol = %closed.symbol,
                target = %rule.target,
                required,
                buffered = buffer.len(),
                "Not enough history for higher-interval candle"
            );
            return None;
        }

        let window = buffer.range(buffer.len() - required..);
        let first_open_ms = buffer[buffer.len() - required].open_time_ms;
        if first_open_ms != target_open_ms {
            warn!(
                symbol = %closed.symbol,
                target = %rule.target,
                expected_ms = target_open_ms,
                found_ms = first_open_ms,
                "Window does not start at target open, skipping"
            );
            return None;
        }

        match merge_candles(window, rule.target) {
            Ok(merged) => Some(merged),
            Err(e) => {
                warn!(
                    symbol = %closed.symbol,
                    target = %rule.target,
                    error = %e,
                    "Skipping higher-interval candle"
                );
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use footprint_core::interval::{DAY_MS, HOUR_MS, MINUTE_MS};
    use footprint_core::{AggressorSide, OpenCandle, TimestampMs};
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;

    // 2024-01-01 00:00:00 UTC (a Monday)
    const JAN_1_2024: TimestampMs = 1_704_067_200_000;

    fn candle(interval: Interval, open_ms: TimestampMs, price: Decimal) -> ClosedCandle {
        let mut candle = OpenCandle::new("binance", "BTCUSDT", interval, open_ms);
        candle.add_trade(AggressorSide::Bid, dec!(1), price, price);
        candle.into_closed()
    }

    #[test]
    fn test_sixty_minutes_build_one_hour() {
        let mut builder = MultiResolutionBuilder::new();
        let mut produced = Vec::new();
        for m in 0..60 {
            let price = Decimal::from(100 + m);
            let minute = candle(Interval::M1, JAN_1_2024 + m * MINUTE_MS, price);
            produced.extend(builder.on_candle_closed(&minute));
        }

        let hours: Vec<&ClosedCandle> = produced
            .iter()
            .filter(|c| c.interval == Interval::H1)
            .collect();
        assert_eq!(hours.len(), 1);
        let hour = hours[0];
        assert_eq!(hour.open_time_ms, JAN_1_2024);
        assert_eq!(hour.close_time_ms, JAN_1_2024 + HOUR_MS - 1);
        assert_eq!(hour.volume, dec!(60));
        assert_eq!(hour.trade_count, 60);
        assert_eq!(hour.low, dec!(100));
        assert_eq!(hour.high, dec!(159));
        assert_eq!(hour.close, dec!(159));

        let count = |interval| produced.iter().filter(|c| c.interval == interval).count();
        assert_eq!(count(Interval::M5), 12);
        assert_eq!(count(Interval::M15), 4);
        assert_eq!(count(Interval::M30), 2);
        assert_eq!(count(Interval::H2), 0);
    }

    #[test]
    fn test_partial_window_skipped() {
        let mut builder = MultiResolutionBuilder::new();
        // Starts mid-way through a 5m bucket.
        let mut produced = Vec::new();
        for m in 2..5 {
            let minute = candle(Interval::M1, JAN_1_2024 + m * MINUTE_MS, dec!(1));
            produced.extend(builder.on_candle_closed(&minute));
        }
        assert!(produced.is_empty());

        for m in 5..10 {
            let minute = candle(Interval::M1, JAN_1_2024 + m * MINUTE_MS, dec!(1));
            produced.extend(builder.on_candle_closed(&minute));
        }
        assert_eq!(produced.len(), 1);
        assert_eq!(produced[0].open_time_ms, JAN_1_2024 + 5 * MINUTE_MS);
    }

    #[test]
    fn test_missing_minute_skips_window() {
        let mut builder = MultiResolutionBuilder::new();
        let mut produced = Vec::new();
        for m in [0, 1, 3, 4] {
            let minute = candle(Interval::M1, JAN_1_2024 + m * MINUTE_MS, dec!(1));
            produced.extend(builder.on_candle_closed(&minute));
        }
        assert!(produced.is_empty());
    }

    #[test]
    fn test_day_cascades_to_week_and_month() {
        let mut builder = MultiResolutionBuilder::new();
        let mut produced = Vec::new();
        // All of January 2024, then February 1st.
        for d in 0..31 {
            let day = candle(Interval::D1, JAN_1_2024 + d * DAY_MS, dec!(5));
            produced.extend(builder.on_candle_closed(&day));
        }

        let weeks = produced.iter().filter(|c| c.interval == Interval::W1).count();
        assert_eq!(weeks, 4);
        let months: Vec<&ClosedCandle> = produced
            .iter()
            .filter(|c| c.interval == Interval::MN1)
            .collect();
        assert_eq!(months.len(), 1);
        assert_eq!(months[0].open_time_ms, JAN_1_2024);
        assert_eq!(months[0].close_time_ms, JAN_1_2024 + 31 * DAY_MS - 1);
        assert_eq!(months[0].volume, dec!(31));
    }

    #[test]
    fn test_seeded_days_complete_week() {
        let mut builder = MultiResolutionBuilder::new();
        builder.seed((0..6).map(|d| candle(Interval::D1, JAN_1_2024 + d * DAY_MS, dec!(1))));
        assert_eq!(builder.history(Interval::D1).len(), 6);

        let sunday = candle(Interval::D1, JAN_1_2024 + 6 * DAY_MS, dec!(1));
        let produced = builder.on_candle_closed(&sunday);
        assert_eq!(produced.len(), 1);
        assert_eq!(produced[0].interval, Interval::W1);
        assert_eq!(produced[0].volume, dec!(7));
    }

    #[test]
    fn test_history_is_bounded() {
        let mut builder = MultiResolutionBuilder::new();
        for m in 0..20 {
            builder.on_candle_closed(&candle(Interval::M1, JAN_1_2024 + m * MINUTE_MS, dec!(1)));
        }
        assert_eq!(builder.history(Interval::M1).len(), 5);
        // Nothing reads weekly candles.
        assert!(builder.history(Interval::W1).is_empty());
    }

    #[test]
    fn test_stale_candle_ignored() {
        let mut builder = MultiResolutionBuilder::new();
        builder.on_candle_closed(&candle(Interval::M1, JAN_1_2024 + 3 * MINUTE_MS, dec!(1)));
        let produced = builder.on_candle_closed(&candle(Interval::M1, JAN_1_2024, dec!(1)));
        assert!(produced.is_empty());
        assert_eq!(builder.history(Interval::M1).len(), 1);
    }
}
