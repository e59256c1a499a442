//! Per-symbol worker task.
//!
//! A worker owns one symbol pipeline. Trades and interval ticks reach it
//! through a single channel, so they are applied strictly one at a time.

use footprint_core::{ClosedCandle, Error, Result, TimestampMs, Trade};
use footprint_ingestion::CandleQueue;
use footprint_timeframes::SymbolPipeline;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, info};

/// Message for a symbol worker.
#[derive(Debug, Clone)]
pub enum WorkerCommand {
    Trade(Trade),
    /// Wall clock reached a base-interval boundary.
    Tick { boundary_ms: TimestampMs },
    Shutdown,
}

/// Handle to a running symbol worker.
pub struct SymbolWorker {
    symbol: String,
    tx: mpsc::Sender<WorkerCommand>,
    queue: CandleQueue,
    handle: JoinHandle<()>,
}

impl SymbolWorker {
    /// Spawn the worker task. Closed candles are published on `events`.
    pub fn spawn(
        pipeline: SymbolPipeline,
        channel_capacity: usize,
        events: broadcast::Sender<ClosedCandle>,
    ) -> Self {
        let symbol = pipeline.symbol().to_string();
        let queue = pipeline.queue().clone();
        let (tx, rx) = mpsc::channel(channel_capacity);

        let handle = tokio::spawn(async move {
            Self::run(pipeline, rx, events).await;
        });

        Self {
            symbol,
            tx,
            queue,
            handle,
        }
    }

    /// Queue a command, waiting for channel space.
    pub async fn send(&self, command: WorkerCommand) -> Result<()> {
        self.tx
            .send(command)
            .await
            .map_err(|_| Error::Other(format!("worker for {} has stopped", self.symbol)))
    }

    /// Sender for the ticker.
    pub fn sender(&self) -> mpsc::Sender<WorkerCommand> {
        self.tx.clone()
    }

    pub fn queue(&self) -> &CandleQueue {
        &self.queue
    }

    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    /// Drain queued commands, then stop the task.
    pub async fn stop(self) {
        let _ = self.tx.send(WorkerCommand::Shutdown).await;
        let _ = self.handle.await;
    }

    async fn run(
        mut pipeline: SymbolPipeline,
        mut rx: mpsc::Receiver<WorkerCommand>,
        events: broadcast::Sender<ClosedCandle>,
    ) {
        while let Some(command) = rx.recv().await {
            let closed = match command {
                WorkerCommand::Trade(trade) => pipeline.on_trade(&trade),
                WorkerCommand::Tick { boundary_ms } => {
                    if pipeline.is_started() {
                        pipeline.advance_to(boundary_ms)
                    } else {
                        pipeline.start(boundary_ms);
                        Vec::new()
                    }
                }
                WorkerCommand::Shutdown => break,
            };

            for candle in closed {
                debug!(
                    symbol = %candle.symbol,
                    interval = %candle.interval,
                    open_time_ms = candle.open_time_ms,
                    "Publishing closed candle"
                );
                // No subscribers is fine.
                let _ = events.send(candle);
            }
        }
        info!(symbol = %pipeline.symbol(), "Symbol worker stopped");
    }
}
