//! Per-symbol pipeline from trades to every interval.
//!
//! Ties one base-interval aggregator to a multi-resolution builder. Live
//! ingestion and backfill replay drive the same pipeline; they only differ
//! in where `now` comes from.

use crate::builder::MultiResolutionBuilder;
use crate::rules::history_range;
use footprint_core::{AggregatorConfig, ClosedCandle, Interval, Result, TimestampMs, Trade};
use footprint_ingestion::{CandleQueue, OrderFlowAggregator};
use footprint_store::CandleStore;
use tracing::{debug, info, warn};

/// Aggregates one symbol's trades and cascades closed candles upward.
pub struct SymbolPipeline {
    aggregator: OrderFlowAggregator,
    builder: MultiResolutionBuilder,
    max_trade_lead_ms: i64,
}

impl SymbolPipeline {
    pub fn new(
        exchange: impl Into<String>,
        symbol: impl Into<String>,
        base_interval: Interval,
        config: &AggregatorConfig,
    ) -> Result<Self> {
        Self::with_queue(exchange, symbol, base_interval, config, CandleQueue::from_config(config))
    }

    /// Pipeline whose candles (base and higher) go to `queue`.
    pub fn with_queue(
        exchange: impl Into<String>,
        symbol: impl Into<String>,
        base_interval: Interval,
        config: &AggregatorConfig,
        queue: CandleQueue,
    ) -> Result<Self> {
        let aggregator =
            OrderFlowAggregator::with_queue(exchange, symbol, base_interval, config, queue)?;
        Ok(Self {
            aggregator,
            builder: MultiResolutionBuilder::new(),
            max_trade_lead_ms: config.max_trade_lead_ms,
        })
    }

    /// Open the first candle for the bucket containing `now_ms`.
    pub fn start(&mut self, now_ms: TimestampMs) {
        self.aggregator.set_simulated_clock(now_ms);
        self.aggregator.open_next_candle(Some(now_ms));
    }

    /// Whether a candle is open.
    pub fn is_started(&self) -> bool {
        self.aggregator.active_candle().is_some()
    }

    /// Open time of the candle after the active one.
    pub fn next_boundary_ms(&self) -> Option<TimestampMs> {
        self.aggregator
            .active_candle()
            .map(|candle| candle.close_time_ms + 1)
    }

    /// Close every candle whose end lies at or before `now_ms`.
    ///
    /// Each close happens with the clock set to the boundary it crosses, so
    /// a long silence produces one (possibly empty) candle per interval.
    /// Returns the closed base candles followed by what they cascaded into.
    pub fn advance_to(&mut self, now_ms: TimestampMs) -> Vec<ClosedCandle> {
        let mut closed = Vec::new();
        while let Some(boundary_ms) = self.next_boundary_ms() {
            if now_ms < boundary_ms {
                break;
            }
            closed.extend(self.close_at(boundary_ms));
        }
        closed
    }

    /// Apply a trade to the active candle without checking boundaries.
    #[inline]
    pub fn apply_trade(&mut self, trade: &Trade) {
        self.aggregator.process(trade);
    }

    /// Route a trade, first closing candles that ended before it.
    ///
    /// A trade stamped more than `max_trade_lead_ms` past the active
    /// candle's close is dropped with a warning and closes nothing.
    pub fn on_trade(&mut self, trade: &Trade) -> Vec<ClosedCandle> {
        if !self.is_started() {
            self.start(trade.timestamp_ms);
        }
        if let Some(boundary_ms) = self.next_boundary_ms() {
            if trade.timestamp_ms - boundary_ms >= self.max_trade_lead_ms {
                warn!(
                    symbol = %trade.symbol,
                    trade_ms = trade.timestamp_ms,
                    boundary_ms,
                    max_lead_ms = self.max_trade_lead_ms,
                    "Dropping trade too far ahead of the active candle"
                );
                return Vec::new();
            }
        }
        let closed = self.advance_to(trade.timestamp_ms);
        if let Some(active) = self.aggregator.active_candle() {
            if trade.timestamp_ms < active.open_time_ms {
                debug!(
                    symbol = %trade.symbol,
                    trade_ms = trade.timestamp_ms,
                    open_time_ms = active.open_time_ms,
                    "Late trade applied to active candle"
                );
            }
        }
        self.apply_trade(trade);
        closed
    }

    /// Preload builder history (e.g. stored daily candles).
    pub fn seed(&mut self, candles: impl IntoIterator<Item = ClosedCandle>) {
        self.builder.seed(candles);
    }

    /// Load the stored candles of every higher window still open at
    /// `start_ms`, so a restarted pipeline completes them. Returns the
    /// number of seeded candles.
    pub fn seed_from_store<S>(&mut self, store: &S, start_ms: TimestampMs) -> Result<usize>
    where
        S: CandleStore + ?Sized,
    {
        let start_ms = self.aggregator.interval().floor(start_ms);
        let mut candles = Vec::new();
        for interval in Interval::ALL {
            let Some((from_ms, to_ms)) = history_range(interval, start_ms) else {
                continue;
            };
            candles.extend(store.query_candles(
                self.aggregator.exchange(),
                self.aggregator.symbol(),
                interval,
                Some(from_ms),
                Some(to_ms),
            )?);
        }

        let count = candles.len();
        self.builder.seed(candles);
        info!(symbol = %self.symbol(), start_ms, count, "Seeded pipeline from storage");
        Ok(count)
    }

    pub fn aggregator(&self) -> &OrderFlowAggregator {
        &self.aggregator
    }

    pub fn builder(&self) -> &MultiResolutionBuilder {
        &self.builder
    }

    /// Queue receiving every closed candle.
    pub fn queue(&self) -> &CandleQueue {
        self.aggregator.queue()
    }

    pub fn symbol(&self) -> &str {
        self.aggregator.symbol()
    }

    fn close_at(&mut self, boundary_ms: TimestampMs) -> Vec<ClosedCandle> {
        self.aggregator.set_simulated_clock(boundary_ms);
        let Some(base) = self.aggregator.close_and_advance() else {
            return Vec::new();
        };

        let higher = self.builder.on_candle_closed(&base);
        for candle in &higher {
            self.aggregator.queue().enqueue(candle.clone());
        }

        let mut closed = Vec::with_capacity(1 + higher.len());
        closed.push(base);
        closed.extend(higher);
        closed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use footprint_core::interval::{DAY_MS, HOUR_MS, MINUTE_MS};
    use footprint_store::MemoryCandleStore;
    use rust_decimal_macros::dec;

    // 2024-01-01 00:00:00 UTC
    const JAN_1_2024: TimestampMs = 1_704_067_200_000;

    fn pipeline() -> SymbolPipeline {
        SymbolPipeline::new("binance", "BTCUSDT", Interval::M1, &AggregatorConfig::default())
            .unwrap()
    }

    fn trade(timestamp_ms: TimestampMs, is_buyer_maker: bool) -> Trade {
        Trade {
            exchange: "binance".to_string(),
            symbol: "BTCUSDT".to_string(),
            price: dec!(42000),
            quantity: dec!(0.5),
            is_buyer_maker,
            timestamp_ms,
        }
    }

    #[test]
    fn test_first_trade_starts_pipeline() {
        let mut pipeline = pipeline();
        assert!(!pipeline.is_started());

        let closed = pipeline.on_trade(&trade(JAN_1_2024 + 30_000, false));
        assert!(closed.is_empty());
        assert_eq!(pipeline.next_boundary_ms(), Some(JAN_1_2024 + MINUTE_MS));
        assert_eq!(pipeline.aggregator().active_candle().unwrap().volume, dec!(0.5));
    }

    #[test]
    fn test_trade_after_boundary_closes_candle() {
        let mut pipeline = pipeline();
        pipeline.on_trade(&trade(JAN_1_2024 + 1_000, false));
        let closed = pipeline.on_trade(&trade(JAN_1_2024 + MINUTE_MS, true));

        assert_eq!(closed.len(), 1);
        assert_eq!(closed[0].open_time_ms, JAN_1_2024);
        assert_eq!(closed[0].aggressive_bid, dec!(0.5));
        let active = pipeline.aggregator().active_candle().unwrap();
        assert_eq!(active.open_time_ms, JAN_1_2024 + MINUTE_MS);
        assert_eq!(active.aggressive_ask, dec!(0.5));
    }

    #[test]
    fn test_silence_closes_each_interval() {
        let mut pipeline = pipeline();
        pipeline.start(JAN_1_2024);

        let closed = pipeline.advance_to(JAN_1_2024 + 3 * MINUTE_MS + 5);
        let opens: Vec<TimestampMs> = closed.iter().map(|c| c.open_time_ms).collect();
        assert_eq!(opens, vec![JAN_1_2024, JAN_1_2024 + MINUTE_MS, JAN_1_2024 + 2 * MINUTE_MS]);
        assert!(closed.iter().all(|c| c.is_empty()));
        assert_eq!(pipeline.next_boundary_ms(), Some(JAN_1_2024 + 4 * MINUTE_MS));
    }

    #[test]
    fn test_hour_of_trades_cascades_to_hour() {
        let mut pipeline = pipeline();
        pipeline.start(JAN_1_2024);
        for m in 0..60 {
            pipeline.on_trade(&trade(JAN_1_2024 + m * MINUTE_MS + 10_000, m % 2 == 0));
        }
        let closed = pipeline.advance_to(JAN_1_2024 + HOUR_MS);

        let hour = closed.iter().find(|c| c.interval == Interval::H1).unwrap();
        assert_eq!(hour.volume, dec!(30));
        assert_eq!(hour.trade_count, 60);
        assert_eq!(hour.volume_delta, dec!(0));

        // 60 base + 12 + 4 + 2 + 1 higher candles.
        assert_eq!(pipeline.queue().len(), 79);
    }

    #[test]
    fn test_advance_before_boundary_is_noop() {
        let mut pipeline = pipeline();
        pipeline.start(JAN_1_2024);
        assert!(pipeline.advance_to(JAN_1_2024 + MINUTE_MS - 1).is_empty());
        assert!(pipeline.queue().is_empty());
    }

    #[test]
    fn test_far_future_trade_dropped() {
        let mut pipeline = pipeline();
        pipeline.start(JAN_1_2024);

        // Microseconds instead of milliseconds.
        let closed = pipeline.on_trade(&trade(JAN_1_2024 * 1_000, false));
        assert!(closed.is_empty());
        assert!(pipeline.queue().is_empty());
        assert_eq!(pipeline.next_boundary_ms(), Some(JAN_1_2024 + MINUTE_MS));
        assert!(pipeline.aggregator().active_candle().unwrap().is_empty());

        // A trade within the lead is still applied.
        let closed = pipeline.on_trade(&trade(JAN_1_2024 + HOUR_MS, false));
        assert_eq!(closed.iter().filter(|c| c.interval == Interval::M1).count(), 60);
    }

    #[test]
    fn test_restart_completes_open_windows_from_store() {
        // Sunday 2024-01-07 23:58:30, the last minutes of the first week.
        let restart_ms = JAN_1_2024 + 7 * DAY_MS - 2 * MINUTE_MS + 30_000;
        let week_end = JAN_1_2024 + 7 * DAY_MS;

        let mut before = pipeline();
        before.start(JAN_1_2024);
        before.on_trade(&trade(JAN_1_2024 + 1_000, false));
        before.advance_to(restart_ms);
        let mut store = MemoryCandleStore::new();
        store.upsert_candles(&before.queue().all_candles()).unwrap();

        let mut after = pipeline();
        // 3 minutes, 2 five-minute, 15m, 30m, 1h, 2 two-hour, 2 four-hour,
        // 12h and six days.
        assert_eq!(after.seed_from_store(&store, restart_ms).unwrap(), 19);
        after.start(restart_ms);
        let mut closed = after.on_trade(&trade(week_end - 30_000, true));
        closed.extend(after.advance_to(week_end));

        let day = closed.iter().find(|c| c.interval == Interval::D1).unwrap();
        assert_eq!(day.open_time_ms, week_end - DAY_MS);
        assert_eq!(day.volume, dec!(0.5));
        let week = closed.iter().find(|c| c.interval == Interval::W1).unwrap();
        assert_eq!(week.open_time_ms, JAN_1_2024);
        assert_eq!(week.volume, dec!(1));
        assert_eq!(week.trade_count, 2);

        // Without the stored history the week never completes.
        let mut cold = pipeline();
        cold.start(restart_ms);
        let closed = cold.advance_to(week_end);
        assert!(closed.iter().all(|c| c.interval != Interval::W1));
    }
}
