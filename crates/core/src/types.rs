//! Core data types for the footprint candle engine.

use crate::Interval;
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use uuid::Uuid;

/// Timestamp in milliseconds since Unix epoch (UTC).
pub type TimestampMs = i64;

/// Price type (exact decimal, usable as a map key).
pub type Price = Decimal;

/// Size/quantity type.
pub type Quantity = Decimal;

/// A single trade (print) from the exchange.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trade {
    /// Exchange name.
    pub exchange: String,
    /// Trading symbol (e.g., "BTCUSDT").
    pub symbol: String,
    /// Trade price.
    pub price: Price,
    /// Trade size in base asset.
    pub quantity: Quantity,
    /// True when the resting (maker) order was the buy side.
    pub is_buyer_maker: bool,
    /// Execution timestamp in milliseconds.
    pub timestamp_ms: TimestampMs,
}

impl Trade {
    /// Side that took liquidity.
    #[inline]
    pub fn aggressor(&self) -> AggressorSide {
        AggressorSide::from_buyer_maker(self.is_buyer_maker)
    }

    /// Signed size (positive for aggressive buys, negative for aggressive sells).
    #[inline]
    pub fn signed_quantity(&self) -> Quantity {
        self.quantity * self.aggressor().sign()
    }
}

/// Market-taking side of a trade.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AggressorSide {
    /// Buyer crossed the spread (resting order was a sell).
    Bid,
    /// Seller crossed the spread (resting order was a buy).
    Ask,
}

impl AggressorSide {
    /// If the buyer is the maker, the seller hit the bid with a market order.
    #[inline]
    pub fn from_buyer_maker(is_buyer_maker: bool) -> Self {
        if is_buyer_maker {
            AggressorSide::Ask
        } else {
            AggressorSide::Bid
        }
    }

    /// +1 for aggressive bids, -1 for aggressive asks.
    #[inline]
    pub fn sign(self) -> Decimal {
        match self {
            AggressorSide::Bid => Decimal::ONE,
            AggressorSide::Ask => Decimal::NEGATIVE_ONE,
        }
    }
}

/// Opaque unique candle identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct CandleId(pub Uuid);

impl CandleId {
    /// Allocate a fresh random id.
    pub fn new() -> Self {
        CandleId(Uuid::new_v4())
    }
}

impl Default for CandleId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for CandleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Natural key of a stored candle.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct CandleKey {
    pub exchange: String,
    pub symbol: String,
    pub interval: Interval,
    pub open_time_ms: TimestampMs,
}

/// `100 * bid / (bid + ask)` rounded to 2dp, `None` when both sides are zero.
pub fn imbalance_percent(bid: Decimal, ask: Decimal) -> Option<Decimal> {
    let total = bid + ask;
    if total.is_zero() {
        return None;
    }
    Some(
        (Decimal::ONE_HUNDRED * bid / total)
            .round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero),
    )
}

/// Bid/ask volume traded at one price.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriceLevel {
    /// Volume from aggressive buyers.
    pub vol_sum_bid: Quantity,
    /// Volume from aggressive sellers.
    pub vol_sum_ask: Quantity,
}

impl PriceLevel {
    /// Attribute `quantity` to the aggressor's side.
    #[inline]
    pub fn add(&mut self, side: AggressorSide, quantity: Quantity) {
        match side {
            AggressorSide::Bid => self.vol_sum_bid += quantity,
            AggressorSide::Ask => self.vol_sum_ask += quantity,
        }
    }

    /// Total volume at this level.
    #[inline]
    pub fn total(&self) -> Quantity {
        self.vol_sum_bid + self.vol_sum_ask
    }

    /// Freeze into a closed level.
    pub fn close(self) -> ClosedPriceLevel {
        ClosedPriceLevel {
            vol_sum_bid: self.vol_sum_bid,
            vol_sum_ask: self.vol_sum_ask,
            imbalance_percent: imbalance_percent(self.vol_sum_bid, self.vol_sum_ask),
        }
    }
}

/// Price level of a closed candle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClosedPriceLevel {
    pub vol_sum_bid: Quantity,
    pub vol_sum_ask: Quantity,
    /// Bid share of the level volume in percent.
    pub imbalance_percent: Option<Decimal>,
}

impl ClosedPriceLevel {
    /// Strip the derived field, e.g. to re-aggregate levels.
    #[inline]
    pub fn volumes(&self) -> PriceLevel {
        PriceLevel {
            vol_sum_bid: self.vol_sum_bid,
            vol_sum_ask: self.vol_sum_ask,
        }
    }
}

/// Candle that is still accumulating trades.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OpenCandle {
    pub id: CandleId,
    pub exchange: String,
    pub symbol: String,
    pub interval: Interval,
    /// Aligned bucket start.
    pub open_time_ms: TimestampMs,
    /// Inclusive bucket end.
    pub close_time_ms: TimestampMs,
    pub aggressive_bid: Quantity,
    pub aggressive_ask: Quantity,
    pub volume: Quantity,
    pub volume_delta: Quantity,
    pub high: Price,
    pub low: Price,
    pub close: Price,
    /// Number of trades applied.
    pub trade_count: u64,
    pub price_levels: BTreeMap<Price, PriceLevel>,
}

impl OpenCandle {
    /// Create an empty candle for the bucket containing `open_time_ms`.
    pub fn new(
        exchange: impl Into<String>,
        symbol: impl Into<String>,
        interval: Interval,
        open_time_ms: TimestampMs,
    ) -> Self {
        let open_time_ms = interval.floor(open_time_ms);
        Self {
            id: CandleId::new(),
            exchange: exchange.into(),
            symbol: symbol.into(),
            interval,
            open_time_ms,
            close_time_ms: interval.close_time(open_time_ms),
            aggressive_bid: Decimal::ZERO,
            aggressive_ask: Decimal::ZERO,
            volume: Decimal::ZERO,
            volume_delta: Decimal::ZERO,
            high: Decimal::ZERO,
            low: Decimal::ZERO,
            close: Decimal::ZERO,
            trade_count: 0,
            price_levels: BTreeMap::new(),
        }
    }

    /// Open candles are never closed.
    #[inline]
    pub fn is_closed(&self) -> bool {
        false
    }

    /// Apply one trade. `level_price` is the (possibly rounded) level key.
    pub fn add_trade(
        &mut self,
        side: AggressorSide,
        quantity: Quantity,
        price: Price,
        level_price: Price,
    ) {
        self.volume += quantity;
        self.volume_delta += quantity * side.sign();

        match side {
            AggressorSide::Bid => self.aggressive_bid += quantity,
            AggressorSide::Ask => self.aggressive_ask += quantity,
        }
        self.price_levels
            .entry(level_price)
            .or_default()
            .add(side, quantity);

        self.extend_range(price, price);
        self.close = price;
        self.trade_count += 1;
    }

    /// Widen high/low. While the candle is empty the range is seeded instead.
    pub fn extend_range(&mut self, high: Price, low: Price) {
        if self.trade_count == 0 {
            self.high = high;
            self.low = low;
        } else {
            self.high = self.high.max(high);
            self.low = self.low.min(low);
        }
    }

    /// Whether any trade has been applied.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.trade_count == 0
    }

    /// Retire into an immutable closed candle.
    pub fn into_closed(self) -> ClosedCandle {
        let bid_imbalance_percent = imbalance_percent(self.aggressive_bid, self.aggressive_ask);
        let price_levels = self
            .price_levels
            .into_iter()
            .map(|(price, level)| (price, level.close()))
            .collect();

        ClosedCandle {
            id: self.id,
            exchange: self.exchange,
            symbol: self.symbol,
            interval: self.interval,
            open_time_ms: self.open_time_ms,
            close_time_ms: self.close_time_ms,
            aggressive_bid: self.aggressive_bid,
            aggressive_ask: self.aggressive_ask,
            volume: self.volume,
            volume_delta: self.volume_delta,
            high: self.high,
            low: self.low,
            close: self.close,
            trade_count: self.trade_count,
            bid_imbalance_percent,
            price_levels,
            did_persist_to_store: false,
        }
    }
}

/// Immutable snapshot of a finished candle.
///
/// Only `did_persist_to_store` changes after creation, and only from
/// `false` to `true`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClosedCandle {
    pub id: CandleId,
    pub exchange: String,
    pub symbol: String,
    pub interval: Interval,
    pub open_time_ms: TimestampMs,
    pub close_time_ms: TimestampMs,
    pub aggressive_bid: Quantity,
    pub aggressive_ask: Quantity,
    pub volume: Quantity,
    pub volume_delta: Quantity,
    pub high: Price,
    pub low: Price,
    pub close: Price,
    pub trade_count: u64,
    /// Bid share of the candle volume in percent.
    pub bid_imbalance_percent: Option<Decimal>,
    pub price_levels: BTreeMap<Price, ClosedPriceLevel>,
    pub did_persist_to_store: bool,
}

impl ClosedCandle {
    #[inline]
    pub fn is_closed(&self) -> bool {
        true
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.trade_count == 0
    }

    /// Storage key.
    pub fn key(&self) -> CandleKey {
        CandleKey {
            exchange: self.exchange.clone(),
            symbol: self.symbol.clone(),
            interval: self.interval,
            open_time_ms: self.open_time_ms,
        }
    }

    /// Flip the persisted flag. Returns false if it was already set.
    pub fn mark_persisted(&mut self) -> bool {
        !std::mem::replace(&mut self.did_persist_to_store, true)
    }

    /// Price levels from highest to lowest price.
    pub fn levels_descending(&self) -> impl Iterator<Item = (&Price, &ClosedPriceLevel)> {
        self.price_levels.iter().rev()
    }
}

/// First and last stored open time of a series.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimestampRange {
    pub first: TimestampMs,
    pub last: TimestampMs,
}

impl TimestampRange {
    /// Whether `ts_ms` lies within `[first, last]`.
    #[inline]
    pub fn contains(&self, ts_ms: TimestampMs) -> bool {
        ts_ms >= self.first && ts_ms <= self.last
    }
}
