//! Live aggregation service.
//!
//! One worker per configured symbol, a wall-clock ticker closing candles at
//! each base-interval boundary, and a flusher writing closed candles to the
//! store on its own cadence.

use crate::flusher::Flusher;
use crate::ticker::interval_ticker;
use crate::worker::{SymbolWorker, WorkerCommand};
use chrono::Utc;
use footprint_core::{ClosedCandle, Config, Error, Result, TimestampMs, Trade};
use footprint_ingestion::CandleQueue;
use footprint_store::CandleStore;
use footprint_timeframes::SymbolPipeline;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tracing::info;

/// Capacity of the closed-candle event channel.
const EVENT_CAPACITY: usize = 1_024;

/// Running live service.
pub struct LiveService {
    workers: HashMap<String, SymbolWorker>,
    events: broadcast::Sender<ClosedCandle>,
    shutdown: watch::Sender<bool>,
    ticker: JoinHandle<()>,
    flusher: JoinHandle<()>,
}

impl LiveService {
    /// Start workers, ticker and flusher. Must be called inside a tokio
    /// runtime.
    pub fn spawn<S>(config: &Config, store: Arc<Mutex<S>>) -> Result<Self>
    where
        S: CandleStore + Send + 'static,
    {
        config.validate()?;
        let now_ms = Utc::now().timestamp_millis();
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let (shutdown, shutdown_rx) = watch::channel(false);

        let mut workers = HashMap::with_capacity(config.symbols.len());
        let mut queues: Vec<(String, CandleQueue)> = Vec::with_capacity(config.symbols.len());
        for symbol in &config.symbols {
            let pipeline = restore_pipeline(config, symbol, &*store.lock(), now_ms)?;
            let worker =
                SymbolWorker::spawn(pipeline, config.live.channel_capacity, events.clone());
            queues.push((symbol.clone(), worker.queue().clone()));
            workers.insert(symbol.clone(), worker);
        }

        let senders = workers.values().map(SymbolWorker::sender).collect();
        let ticker = tokio::spawn(interval_ticker(
            config.base_interval,
            senders,
            shutdown_rx.clone(),
        ));
        let flusher = Flusher::new(store, queues);
        let flusher = tokio::spawn(flusher.run(config.live.clone(), shutdown_rx));

        info!(
            exchange = %config.exchange,
            symbols = config.symbols.len(),
            interval = %config.base_interval,
            "Live service started"
        );

        Ok(Self {
            workers,
            events,
            shutdown,
            ticker,
            flusher,
        })
    }

    /// Route a trade to its symbol's worker.
    pub async fn submit_trade(&self, trade: Trade) -> Result<()> {
        let worker = self
            .workers
            .get(&trade.symbol)
            .ok_or_else(|| Error::UnknownSymbol(trade.symbol.clone()))?;
        worker.send(WorkerCommand::Trade(trade)).await
    }

    /// Receive every closed candle (base and higher intervals).
    pub fn subscribe(&self) -> broadcast::Receiver<ClosedCandle> {
        self.events.subscribe()
    }

    /// Persistence queue of a symbol.
    pub fn queue(&self, symbol: &str) -> Option<&CandleQueue> {
        self.workers.get(symbol).map(SymbolWorker::queue)
    }

    pub fn symbols(&self) -> impl Iterator<Item = &str> {
        self.workers.keys().map(String::as_str)
    }

    /// Drain the workers, stop the ticker and flush one last time.
    pub async fn shutdown(self) -> Result<()> {
        for (_, worker) in self.workers {
            worker.stop().await;
        }
        // Receivers may already be gone if a task ended early.
        let _ = self.shutdown.send(true);

        self.ticker
            .await
            .map_err(|e| Error::Other(format!("ticker task failed: {e}")))?;
        self.flusher
            .await
            .map_err(|e| Error::Other(format!("flusher task failed: {e}")))?;
        info!("Live service stopped");
        Ok(())
    }
}

/// Pipeline for `symbol` starting at `now_ms`, with the stored candles of
/// every higher window still open at that time.
fn restore_pipeline<S>(
    config: &Config,
    symbol: &str,
    store: &S,
    now_ms: TimestampMs,
) -> Result<SymbolPipeline>
where
    S: CandleStore + ?Sized,
{
    let mut pipeline = SymbolPipeline::new(
        config.exchange.clone(),
        symbol,
        config.base_interval,
        &config.aggregator,
    )?;
    pipeline.seed_from_store(store, now_ms)?;
    pipeline.start(now_ms);
    Ok(pipeline)
}

#[cfg(test)]
mod tests {
    use super::*;
    use footprint_core::interval::{DAY_MS, MINUTE_MS};
    use footprint_core::{AggressorSide, CandleId, Interval, OpenCandle, TimestampRange};
    use footprint_store::MemoryCandleStore;
    use std::collections::BTreeMap;
    use rust_decimal_macros::dec;

    fn trade(symbol: &str, timestamp_ms: TimestampMs) -> Trade {
        Trade {
            exchange: "binance".to_string(),
            symbol: symbol.to_string(),
            price: dec!(100),
            quantity: dec!(2),
            is_buyer_maker: false,
            timestamp_ms,
        }
    }

    fn config() -> Config {
        Config {
            symbols: vec!["BTCUSDT".to_string(), "ETHUSDT".to_string()],
            ..Config::default()
        }
    }

    #[tokio::test]
    async fn test_unknown_symbol_rejected() {
        let store = Arc::new(Mutex::new(MemoryCandleStore::new()));
        let service = LiveService::spawn(&config(), store).unwrap();

        let result = service.submit_trade(trade("DOGEUSDT", 0)).await;
        assert!(matches!(result, Err(Error::UnknownSymbol(s)) if s == "DOGEUSDT"));
        service.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_trades_reach_store_on_shutdown() {
        let store = Arc::new(Mutex::new(MemoryCandleStore::new()));
        let service = LiveService::spawn(&config(), Arc::clone(&store)).unwrap();
        let mut events = service.subscribe();

        // Far enough ahead that the wall-clock ticker cannot interfere.
        let base = Interval::M1.floor(Utc::now().timestamp_millis()) + 10 * MINUTE_MS;
        service.submit_trade(trade("BTCUSDT", base + 1_000)).await.unwrap();
        service.submit_trade(trade("BTCUSDT", base + MINUTE_MS + 1_000)).await.unwrap();
        service.submit_trade(trade("ETHUSDT", base + 1_000)).await.unwrap();
        service.shutdown().await.unwrap();

        let stored = store
            .lock()
            .query_candles("binance", "BTCUSDT", Interval::M1, Some(base), Some(base))
            .unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].volume, dec!(2));
        assert!(stored[0].did_persist_to_store);

        let mut saw_btc_minute = false;
        while let Ok(candle) = events.try_recv() {
            if candle.symbol == "BTCUSDT" && candle.open_time_ms == base {
                saw_btc_minute = true;
            }
        }
        assert!(saw_btc_minute);
    }

    #[tokio::test]
    async fn test_invalid_config_rejected() {
        let store = Arc::new(Mutex::new(MemoryCandleStore::new()));
        let config = Config {
            symbols: Vec::new(),
            ..Config::default()
        };
        assert!(matches!(LiveService::spawn(&config, store), Err(Error::Config(_))));
    }

    // 2024-01-01 00:00:00 UTC (a Monday)
    const JAN_1_2024: TimestampMs = 1_704_067_200_000;

    fn stored_day(day: i64) -> ClosedCandle {
        let open_ms = JAN_1_2024 + day * DAY_MS;
        let mut candle = OpenCandle::new("binance", "BTCUSDT", Interval::D1, open_ms);
        candle.add_trade(AggressorSide::Bid, dec!(1), dec!(100), dec!(100));
        candle.into_closed()
    }

    #[test]
    fn test_restored_pipeline_completes_current_week() {
        let mut store = MemoryCandleStore::new();
        store.upsert_candles(&(0..6).map(stored_day).collect::<Vec<_>>()).unwrap();

        // Restart at 00:00 on Sunday the 7th.
        let sunday = JAN_1_2024 + 6 * DAY_MS;
        let mut pipeline = restore_pipeline(&config(), "BTCUSDT", &store, sunday).unwrap();
        assert_eq!(pipeline.builder().history(Interval::D1).len(), 6);

        pipeline.on_trade(&trade("BTCUSDT", sunday + 1_000));
        let closed = pipeline.advance_to(sunday + DAY_MS);

        let week = closed.iter().find(|c| c.interval == Interval::W1).unwrap();
        assert_eq!(week.open_time_ms, JAN_1_2024);
        assert_eq!(week.volume, dec!(8));
        assert_eq!(week.trade_count, 7);
    }

    /// Store whose reads always fail.
    struct UnreadableStore;

    impl CandleStore for UnreadableStore {
        fn upsert_candles(&mut self, _candles: &[ClosedCandle]) -> Result<Vec<CandleId>> {
            Ok(Vec::new())
        }

        fn query_candles(
            &self,
            _exchange: &str,
            _symbol: &str,
            _interval: Interval,
            _from_ms: Option<TimestampMs>,
            _to_ms: Option<TimestampMs>,
        ) -> Result<Vec<ClosedCandle>> {
            Err(Error::storage("database is locked"))
        }

        fn timestamp_range(
            &self,
            _exchange: &str,
            _symbol: &str,
        ) -> Result<BTreeMap<Interval, TimestampRange>> {
            Ok(BTreeMap::new())
        }

        fn prune_old(&mut self, _keep_per_series: usize) -> Result<usize> {
            Ok(0)
        }
    }

    #[tokio::test]
    async fn test_unreadable_store_fails_spawn() {
        let store = Arc::new(Mutex::new(UnreadableStore));
        let result = LiveService::spawn(&config(), store);
        assert!(matches!(result, Err(Error::Storage(_))));
    }
}
