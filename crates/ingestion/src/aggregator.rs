//! Per-symbol footprint candle aggregation.
//!
//! Folds trades into a single open candle per (exchange, symbol, interval) and
//! retires it into the persistence queue once per interval tick. The
//! aggregator has no internal locking: callers must serialize trades and
//! interval ticks for the same symbol.

use crate::queue::CandleQueue;
use chrono::Utc;
use footprint_core::{
    AggregatorConfig, AggressorSide, ClosedCandle, Interval, OpenCandle, Price, Quantity, Result,
    TimestampMs, Trade,
};
use rust_decimal::RoundingStrategy;
use tracing::debug;

/// Streaming footprint aggregator for one symbol and interval.
pub struct OrderFlowAggregator {
    exchange: String,
    symbol: String,
    interval: Interval,
    interval_size_ms: i64,
    /// Decimal places for price-level grouping.
    price_precision_dp: Option<u32>,
    /// Candle currently building.
    active_candle: Option<OpenCandle>,
    /// Closed candles that may not have reached storage yet.
    queue: CandleQueue,
    /// Replaces the wall clock when set (backfill).
    simulated_clock_ms: Option<TimestampMs>,
}

impl OrderFlowAggregator {
    /// Create an aggregator with its own persistence queue.
    ///
    /// Fails for intervals without a fixed millisecond size.
    pub fn new(
        exchange: impl Into<String>,
        symbol: impl Into<String>,
        interval: Interval,
        config: &AggregatorConfig,
    ) -> Result<Self> {
        Self::with_queue(exchange, symbol, interval, config, CandleQueue::from_config(config))
    }

    /// Create an aggregator that retires candles into an existing queue.
    pub fn with_queue(
        exchange: impl Into<String>,
        symbol: impl Into<String>,
        interval: Interval,
        config: &AggregatorConfig,
        queue: CandleQueue,
    ) -> Result<Self> {
        let interval_size_ms = interval.require_fixed_size_ms()?;
        Ok(Self {
            exchange: exchange.into(),
            symbol: symbol.into(),
            interval,
            interval_size_ms,
            price_precision_dp: config.price_precision_dp,
            active_candle: None,
            queue,
            simulated_clock_ms: None,
        })
    }

    /// Use a simulated clock instead of wall-clock time for new candles.
    pub fn set_simulated_clock(&mut self, clock_ms: TimestampMs) {
        self.simulated_clock_ms = Some(clock_ms);
    }

    /// Return to wall-clock time.
    pub fn clear_simulated_clock(&mut self) {
        self.simulated_clock_ms = None;
    }

    /// Apply a trade to the open candle, opening one first if needed.
    pub fn process_trade(&mut self, is_buyer_maker: bool, quantity: Quantity, price: Price) {
        let level_price = self.level_price(price);
        let side = AggressorSide::from_buyer_maker(is_buyer_maker);
        self.active_or_open().add_trade(side, quantity, price, level_price);
    }

    /// Apply a trade record.
    #[inline]
    pub fn process(&mut self, trade: &Trade) {
        self.process_trade(trade.is_buyer_maker, trade.quantity, trade.price);
    }

    /// Retire the open candle into the queue.
    ///
    /// Returns `None` (and leaves the queue untouched) when no candle is open.
    pub fn close_active_candle(&mut self) -> Option<ClosedCandle> {
        let candle = self.active_candle.take()?.into_closed();

        debug!(
            symbol = %self.symbol,
            interval = %self.interval,
            open_time_ms = candle.open_time_ms,
            trades = candle.trade_count,
            volume = %candle.volume,
            "Closed candle"
        );

        self.queue.enqueue(candle.clone());
        Some(candle)
    }

    /// Open a fresh candle for the bucket containing the current time.
    ///
    /// The time is `clock_ms` if given, else the simulated clock, else the
    /// wall clock, floored to the interval grid.
    pub fn open_next_candle(&mut self, clock_ms: Option<TimestampMs>) {
        self.active_candle = Some(self.new_candle(clock_ms));
    }

    /// Close the open candle and immediately open the next one.
    pub fn close_and_advance(&mut self) -> Option<ClosedCandle> {
        let closed = self.close_active_candle();
        self.open_next_candle(None);
        closed
    }

    /// Candle currently building.
    pub fn active_candle(&self) -> Option<&OpenCandle> {
        self.active_candle.as_ref()
    }

    /// Persistence queue handle.
    pub fn queue(&self) -> &CandleQueue {
        &self.queue
    }

    pub fn exchange(&self) -> &str {
        &self.exchange
    }

    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    pub fn interval(&self) -> Interval {
        self.interval
    }

    pub fn interval_size_ms(&self) -> i64 {
        self.interval_size_ms
    }

    fn active_or_open(&mut self) -> &mut OpenCandle {
        let candle = match self.active_candle.take() {
            Some(candle) => candle,
            None => self.new_candle(None),
        };
        self.active_candle.insert(candle)
    }

    fn new_candle(&self, clock_ms: Option<TimestampMs>) -> OpenCandle {
        let now_ms = clock_ms
            .or(self.simulated_clock_ms)
            .unwrap_or_else(|| Utc::now().timestamp_millis());

        let candle = OpenCandle::new(
            self.exchange.clone(),
            self.symbol.clone(),
            self.interval,
            now_ms,
        );
        debug!(
            symbol = %self.symbol,
            interval = %self.interval,
            open_time_ms = candle.open_time_ms,
            "Opened candle"
        );
        candle
    }

    fn level_price(&self, price: Price) -> Price {
        match self.price_precision_dp {
            Some(dp) => price.round_dp_with_strategy(dp, RoundingStrategy::MidpointAwayFromZero),
            None => price,
        }
    }
}
