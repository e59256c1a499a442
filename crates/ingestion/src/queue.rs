//! Bounded buffer of closed candles awaiting persistence.
//!
//! Decouples trade-rate aggregation from storage latency. The queue is a
//! cloneable handle; every operation locks internally, so a flusher can read
//! pending candles while the aggregator keeps enqueueing.

use footprint_core::{AggregatorConfig, CandleId, ClosedCandle, EvictionPolicy};
use parking_lot::Mutex;
use std::collections::{HashSet, VecDeque};
use std::sync::Arc;
use tracing::{debug, warn};

/// Shared persistence queue.
#[derive(Debug, Clone)]
pub struct CandleQueue {
    candles: Arc<Mutex<VecDeque<ClosedCandle>>>,
    /// Resident size above which `prune` evicts.
    max_resident: usize,
    /// What `prune` is allowed to evict.
    policy: EvictionPolicy,
}

impl CandleQueue {
    /// Create an empty queue.
    pub fn new(max_resident: usize, policy: EvictionPolicy) -> Self {
        Self {
            candles: Arc::new(Mutex::new(VecDeque::new())),
            max_resident,
            policy,
        }
    }

    /// Create a queue from the aggregator configuration.
    pub fn from_config(config: &AggregatorConfig) -> Self {
        Self::new(config.max_resident_candles, config.eviction)
    }

    /// Append a closed candle at the tail.
    pub fn enqueue(&self, candle: ClosedCandle) {
        self.candles.lock().push_back(candle);
    }

    /// Candles not yet confirmed by storage, oldest first.
    pub fn pending_candles(&self) -> Vec<ClosedCandle> {
        self.candles
            .lock()
            .iter()
            .filter(|c| !c.did_persist_to_store)
            .cloned()
            .collect()
    }

    /// Number of candles not yet confirmed by storage.
    pub fn pending_count(&self) -> usize {
        self.candles
            .lock()
            .iter()
            .filter(|c| !c.did_persist_to_store)
            .count()
    }

    /// Every resident candle, persisted or not.
    pub fn all_candles(&self) -> Vec<ClosedCandle> {
        self.candles.lock().iter().cloned().collect()
    }

    /// Flag the candles whose ids storage confirmed.
    ///
    /// Returns how many candles changed state. Ids that match nothing are
    /// logged and ignored; ids already marked are a no-op.
    pub fn mark_persisted(&self, ids: &[CandleId]) -> usize {
        let wanted: HashSet<CandleId> = ids.iter().copied().collect();
        let mut matched = HashSet::with_capacity(wanted.len());
        let mut flipped = 0;

        {
            let mut candles = self.candles.lock();
            for candle in candles.iter_mut().filter(|c| wanted.contains(&c.id)) {
                matched.insert(candle.id);
                if candle.mark_persisted() {
                    flipped += 1;
                }
            }
        }

        for id in wanted.difference(&matched) {
            warn!(candle_id = %id, "No resident candle for persisted id");
        }

        flipped
    }

    /// Evict down to the configured resident size.
    pub fn prune(&self) -> usize {
        self.prune_to(self.max_resident)
    }

    /// Evict the oldest candles while more than `max_resident` are held.
    ///
    /// Returns the number of evicted candles.
    pub fn prune_to(&self, max_resident: usize) -> usize {
        let mut candles = self.candles.lock();
        let excess = candles.len().saturating_sub(max_resident);
        if excess == 0 {
            return 0;
        }

        match self.policy {
            EvictionPolicy::OldestFirst => {
                let dropped_unpersisted = candles
                    .drain(..excess)
                    .filter(|c| !c.did_persist_to_store)
                    .count();
                if dropped_unpersisted > 0 {
                    warn!(
                        dropped_unpersisted,
                        "Evicted candles that never reached storage"
                    );
                }
                debug!(evicted = excess, resident = candles.len(), "Pruned candle queue");
                excess
            }
            EvictionPolicy::PersistedOnly => {
                let mut remaining = excess;
                candles.retain(|c| {
                    if remaining > 0 && c.did_persist_to_store {
                        remaining -= 1;
                        false
                    } else {
                        true
                    }
                });
                if remaining > 0 {
                    warn!(
                        over_limit = remaining,
                        resident = candles.len(),
                        "Candle queue over limit, holding unpersisted candles"
                    );
                }
                let evicted = excess - remaining;
                debug!(evicted, resident = candles.len(), "Pruned candle queue");
                evicted
            }
        }
    }

    /// Number of resident candles.
    pub fn len(&self) -> usize {
        self.candles.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.candles.lock().is_empty()
    }

    /// Drop every resident candle.
    pub fn clear(&self) {
        self.candles.lock().clear();
    }

    /// Configured resident limit.
    pub fn max_resident(&self) -> usize {
        self.max_resident
    }
}
