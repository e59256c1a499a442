//! Periodic persistence of closed candles.
//!
//! Every cycle writes each symbol's pending candles, marks the confirmed
//! ones persisted and prunes the queue. A failed write leaves the candles
//! pending for the next cycle.

use footprint_core::{CandleId, ClosedCandle, Error, LiveConfig, Result};
use footprint_ingestion::CandleQueue;
use footprint_store::CandleStore;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info};

/// Moves candles from symbol queues into a shared store.
pub struct Flusher<S> {
    store: Arc<Mutex<S>>,
    queues: Vec<(String, CandleQueue)>,
}

impl<S> Flusher<S>
where
    S: CandleStore + Send + 'static,
{
    pub fn new(store: Arc<Mutex<S>>, queues: Vec<(String, CandleQueue)>) -> Self {
        Self { store, queues }
    }

    /// Flush every queue once. Returns the number of persisted candles.
    pub async fn flush_once(&self) -> usize {
        let mut total = 0;
        for (symbol, queue) in &self.queues {
            match self.flush_queue(queue).await {
                Ok(persisted) => {
                    if persisted > 0 {
                        info!(
                            symbol = %symbol,
                            persisted,
                            pending = queue.pending_count(),
                            "Flushed candles"
                        );
                    }
                    total += persisted;
                }
                Err(e) => {
                    error!(
                        symbol = %symbol,
                        pending = queue.pending_count(),
                        error = %e,
                        "Failed to persist candles, retrying next cycle"
                    );
                }
            }
        }
        total
    }

    async fn flush_queue(&self, queue: &CandleQueue) -> Result<usize> {
        let pending = queue.pending_candles();
        if pending.is_empty() {
            return Ok(0);
        }

        let ids = self.upsert(pending).await?;
        let persisted = queue.mark_persisted(&ids);
        let evicted = queue.prune();
        if evicted > 0 {
            debug!(evicted, resident = queue.len(), "Pruned candle queue");
        }
        Ok(persisted)
    }

    async fn upsert(&self, candles: Vec<ClosedCandle>) -> Result<Vec<CandleId>> {
        let store = Arc::clone(&self.store);
        tokio::task::spawn_blocking(move || store.lock().upsert_candles(&candles))
            .await
            .map_err(|e| Error::Other(format!("store task failed: {e}")))?
    }

    /// Trim stored history to `keep_per_series` candles per series.
    pub async fn prune_store(&self, keep_per_series: usize) -> Result<usize> {
        let store = Arc::clone(&self.store);
        tokio::task::spawn_blocking(move || store.lock().prune_old(keep_per_series))
            .await
            .map_err(|e| Error::Other(format!("store task failed: {e}")))?
    }

    /// Flush on the configured cadence until `shutdown` flips, then flush
    /// one last time.
    pub async fn run(self, config: LiveConfig, mut shutdown: watch::Receiver<bool>) {
        let mut flush_tick = tokio::time::interval(Duration::from_millis(config.flush_interval_ms));
        flush_tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut prune_tick = tokio::time::interval(Duration::from_millis(config.prune_interval_ms));
        prune_tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = flush_tick.tick() => {
                    self.flush_once().await;
                }
                _ = prune_tick.tick(), if config.retain_per_series.is_some() => {
                    let keep = config.retain_per_series.unwrap_or(usize::MAX);
                    if let Err(e) = self.prune_store(keep).await {
                        error!(error = %e, "Failed to prune stored candles");
                    }
                }
                _ = shutdown.changed() => {
                    let persisted = self.flush_once().await;
                    info!(persisted, "Final flush complete");
                    return;
                }
            }
        }
    }
}
