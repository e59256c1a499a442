//! Backfill replay driver.
//!
//! Replays historical trades day by day through the same symbol pipeline
//! used live, with a simulated clock that steps one base interval at a
//! time. Candles are flushed to storage after every day.

use crate::window::{day_start_ms, BackfillWindow};
use chrono::NaiveDate;
use footprint_core::interval::DAY_MS;
use footprint_core::{Config, Error, Result, Trade};
use footprint_store::CandleStore;
use footprint_timeframes::SymbolPipeline;
use std::time::Instant;
use tracing::{debug, error, info, warn};

/// Outcome of one replayed day.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DayReport {
    pub day: NaiveDate,
    pub trades: usize,
    /// Trades outside the day that were skipped.
    pub skipped_trades: usize,
    /// Closed candles of every interval.
    pub closed_candles: usize,
    pub persisted: usize,
}

/// Outcome of a whole run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BackfillSummary {
    pub days: Vec<DayReport>,
    pub failed_days: Vec<NaiveDate>,
}

impl BackfillSummary {
    pub fn total_trades(&self) -> usize {
        self.days.iter().map(|d| d.trades).sum()
    }

    pub fn total_persisted(&self) -> usize {
        self.days.iter().map(|d| d.persisted).sum()
    }
}

/// Replays one symbol's archives into a candle store.
pub struct BackfillReplay<S: CandleStore> {
    exchange: String,
    symbol: String,
    pipeline: SymbolPipeline,
    store: S,
}

impl<S: CandleStore> BackfillReplay<S> {
    pub fn new(config: &Config, symbol: &str, store: S) -> Result<Self> {
        let pipeline = SymbolPipeline::new(
            config.exchange.clone(),
            symbol,
            config.base_interval,
            &config.aggregator,
        )?;
        Ok(Self {
            exchange: config.exchange.clone(),
            symbol: symbol.to_string(),
            pipeline,
            store,
        })
    }

    /// Load the stored candles that complete weekly and monthly windows
    /// open at the start of `window`. Candles stored after the window start
    /// are left out, so history can also be extended backwards. Returns the
    /// number of seeded candles.
    pub fn seed_from_store(&mut self, window: &BackfillWindow) -> Result<usize> {
        let start_ms = day_start_ms(window.start_day);
        self.pipeline.seed_from_store(&self.store, start_ms)
    }

    /// Replay one day of timestamp-ordered trades, then close every candle
    /// up to the end of the day and flush.
    pub fn replay_day(&mut self, day: NaiveDate, trades: &[Trade]) -> Result<DayReport> {
        let start = Instant::now();
        let day_start = day_start_ms(day);
        let next_day = day_start + DAY_MS;

        let active_open = self
            .pipeline
            .aggregator()
            .active_candle()
            .map(|candle| candle.open_time_ms);
        match active_open {
            None => self.pipeline.start(day_start),
            Some(open_ms) if open_ms < day_start => {
                warn!(
                    symbol = %self.symbol,
                    %day,
                    resume_ms = open_ms,
                    "Replay skipped ahead, restarting at day start"
                );
                self.pipeline.start(day_start);
            }
            Some(open_ms) if open_ms > day_start => {
                return Err(Error::data(format!(
                    "{} {day} is before the replay position {open_ms}",
                    self.symbol
                )));
            }
            Some(_) => {}
        }

        let mut closed_candles = 0;
        let mut skipped_trades = 0;
        for trade in trades {
            if trade.timestamp_ms < day_start || trade.timestamp_ms >= next_day {
                skipped_trades += 1;
                continue;
            }
            closed_candles += self.pipeline.on_trade(trade).len();
        }
        closed_candles += self.pipeline.advance_to(next_day).len();

        if skipped_trades > 0 {
            warn!(symbol = %self.symbol, %day, skipped_trades, "Skipped trades outside the day");
        }

        let persisted = self.flush()?;
        info!(
            symbol = %self.symbol,
            %day,
            trades = trades.len(),
            closed_candles,
            persisted,
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Replayed day"
        );

        Ok(DayReport {
            day,
            trades: trades.len() - skipped_trades,
            skipped_trades,
            closed_candles,
            persisted,
        })
    }

    /// Write pending candles, mark them persisted and prune the queue.
    pub fn flush(&mut self) -> Result<usize> {
        let queue = self.pipeline.queue();
        let pending = queue.pending_candles();
        if pending.is_empty() {
            return Ok(0);
        }

        let ids = self.store.upsert_candles(&pending)?;
        let persisted = queue.mark_persisted(&ids);
        let evicted = queue.prune();
        debug!(symbol = %self.symbol, persisted, evicted, "Flushed candles");
        Ok(persisted)
    }

    /// Replay every day in `window`, loading each day's trades with
    /// `load_day`. A day that fails to load or flush is logged and skipped.
    pub fn run<F>(&mut self, window: BackfillWindow, mut load_day: F) -> BackfillSummary
    where
        F: FnMut(NaiveDate) -> Result<Vec<Trade>>,
    {
        let start = Instant::now();
        let mut summary = BackfillSummary::default();
        info!(
            symbol = %self.symbol,
            start = %window.start_day,
            end = %window.end_day,
            days = window.day_count(),
            "Starting backfill"
        );

        for day in window.days() {
            let result = load_day(day).and_then(|trades| self.replay_day(day, &trades));
            match result {
                Ok(report) => summary.days.push(report),
                Err(e) => {
                    error!(symbol = %self.symbol, %day, error = %e, "Failed to replay day");
                    summary.failed_days.push(day);
                }
            }
        }

        info!(
            symbol = %self.symbol,
            replayed = summary.days.len(),
            failed = summary.failed_days.len(),
            trades = summary.total_trades(),
            persisted = summary.total_persisted(),
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Backfill finished"
        );
        summary
    }

    pub fn pipeline(&self) -> &SymbolPipeline {
        &self.pipeline
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn into_store(self) -> S {
        self.store
    }
}
