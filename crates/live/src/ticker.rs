//! Wall-clock interval ticks.

use crate::worker::WorkerCommand;
use chrono::Utc;
use footprint_core::{Interval, TimestampMs};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::time::Instant;
use tracing::{debug, warn};

/// Time until the next `interval` boundary after `now_ms`, and that boundary.
pub fn next_boundary(interval: Interval, now_ms: TimestampMs) -> (TimestampMs, Duration) {
    let boundary_ms = interval.next_open(now_ms);
    let wait_ms = (boundary_ms - now_ms).max(0) as u64;
    (boundary_ms, Duration::from_millis(wait_ms))
}

/// Send a [`WorkerCommand::Tick`] to every worker at each boundary of
/// `interval`, until `shutdown` flips.
pub async fn interval_ticker(
    interval: Interval,
    workers: Vec<mpsc::Sender<WorkerCommand>>,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        let (boundary_ms, wait) = next_boundary(interval, Utc::now().timestamp_millis());

        tokio::select! {
            _ = tokio::time::sleep_until(Instant::now() + wait) => {}
            _ = shutdown.changed() => {
                debug!("Interval ticker stopped");
                return;
            }
        }

        debug!(%interval, boundary_ms, "Interval tick");
        for worker in &workers {
            if worker.send(WorkerCommand::Tick { boundary_ms }).await.is_err() {
                warn!(boundary_ms, "Worker gone, tick dropped");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_next_boundary() {
        let (boundary, wait) = next_boundary(Interval::M1, 1_704_067_215_000);
        assert_eq!(boundary, 1_704_067_260_000);
        assert_eq!(wait, Duration::from_secs(45));

        // Exactly on a boundary waits a full interval.
        let (boundary, wait) = next_boundary(Interval::M1, 1_704_067_260_000);
        assert_eq!(boundary, 1_704_067_320_000);
        assert_eq!(wait, Duration::from_secs(60));
    }

    #[tokio::test(start_paused = true)]
    async fn test_ticker_sends_aligned_ticks() {
        let (tx, mut rx) = mpsc::channel(4);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let ticker = tokio::spawn(interval_ticker(Interval::M1, vec![tx], shutdown_rx));

        match rx.recv().await {
            Some(WorkerCommand::Tick { boundary_ms }) => {
                assert!(Interval::M1.is_aligned(boundary_ms));
            }
            other => panic!("expected tick, got {other:?}"),
        }

        shutdown_tx.send(true).unwrap();
        ticker.await.unwrap();
    }
}
