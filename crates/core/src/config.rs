//! Configuration structures for the footprint candle engine.

use crate::interval::DAY_MS;
use crate::{Error, Interval, Result};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Main configuration, passed explicitly into every component factory.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Exchange name recorded on every candle.
    pub exchange: String,
    /// Symbols to aggregate, one aggregator each.
    pub symbols: Vec<String>,
    /// Smallest interval, built directly from trades.
    pub base_interval: Interval,
    /// Aggregator / persistence queue configuration.
    pub aggregator: AggregatorConfig,
    /// Live service configuration.
    pub live: LiveConfig,
    /// Backfill configuration.
    pub backfill: BackfillConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            exchange: "binance".to_string(),
            symbols: vec!["BTCUSDT".to_string()],
            base_interval: Interval::M1,
            aggregator: AggregatorConfig::default(),
            live: LiveConfig::default(),
            backfill: BackfillConfig::default(),
        }
    }
}

impl Config {
    /// Parse a JSON document; missing sections fall back to defaults.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Config = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Read and parse a JSON config file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json_str(&json)
    }

    /// Reject setups that would silently produce wrong candles.
    pub fn validate(&self) -> Result<()> {
        if self.exchange.is_empty() {
            return Err(Error::config("exchange must not be empty"));
        }
        if self.symbols.is_empty() {
            return Err(Error::config("at least one symbol is required"));
        }
        self.base_interval.require_fixed_size_ms()?;
        if self.live.flush_interval_ms == 0 || self.live.prune_interval_ms == 0 {
            return Err(Error::config("live cadences must be positive"));
        }
        if self.live.channel_capacity == 0 {
            return Err(Error::config("channel_capacity must be positive"));
        }
        if self.aggregator.max_trade_lead_ms <= 0 {
            return Err(Error::config("max_trade_lead_ms must be positive"));
        }
        if self.aggregator.max_resident_candles == 0 {
            return Err(Error::config("max_resident_candles must be positive"));
        }
        if let (Some(start), Some(end)) = (self.backfill.start_day, self.backfill.end_day) {
            if start > end {
                return Err(Error::config(format!(
                    "backfill start {start} is after end {end}"
                )));
            }
        }
        Ok(())
    }
}

/// What the persistence queue may evict when it grows past its limit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EvictionPolicy {
    /// Only candles already written to storage are evicted.
    #[default]
    PersistedOnly,
    /// Oldest candles are evicted regardless of persistence state (lossy).
    OldestFirst,
}

/// Aggregator configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AggregatorConfig {
    /// Decimal places used to group trade prices into levels.
    /// `None` keeps raw prices; prefer rounding to tick size upstream.
    pub price_precision_dp: Option<u32>,
    /// Closed candles kept in memory before pruning.
    pub max_resident_candles: usize,
    /// Eviction policy for the persistence queue.
    pub eviction: EvictionPolicy,
    /// Trades stamped further than this past the active candle's close are
    /// dropped instead of fast-forwarding the clock.
    pub max_trade_lead_ms: i64,
}

impl Default for AggregatorConfig {
    fn default() -> Self {
        Self {
            price_precision_dp: None,
            max_resident_candles: 600,
            eviction: EvictionPolicy::default(),
            max_trade_lead_ms: DAY_MS,
        }
    }
}

/// Live service configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LiveConfig {
    /// Persistence flush cadence in milliseconds.
    pub flush_interval_ms: u64,
    /// Per-symbol command channel capacity.
    pub channel_capacity: usize,
    /// Stored candles kept per series by the periodic store prune.
    /// `None` keeps everything.
    pub retain_per_series: Option<usize>,
    /// Store prune cadence in milliseconds.
    pub prune_interval_ms: u64,
}

impl Default for LiveConfig {
    fn default() -> Self {
        Self {
            flush_interval_ms: 5_000,
            channel_capacity: 10_000,
            retain_per_series: None,
            prune_interval_ms: 3_600_000,
        }
    }
}

/// Backfill configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BackfillConfig {
    /// First day to replay (inclusive).
    pub start_day: Option<NaiveDate>,
    /// Last day to replay (inclusive).
    pub end_day: Option<NaiveDate>,
    /// Directory holding extracted daily trade archives.
    pub archive_dir: PathBuf,
}

impl Default for BackfillConfig {
    fn default() -> Self {
        Self {
            start_day: None,
            end_day: None,
            archive_dir: PathBuf::from("data/aggTrades"),
        }
    }
}
