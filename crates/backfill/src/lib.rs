//! Historical backfill for the footprint candle engine.
//!
//! This crate provides:
//! - Day windows clamped to stored history
//! - Replay of trade archives under a simulated clock
//! - Gap diagnostics over stored series
//! - Higher-interval candles rebuilt from storage

pub mod preflight;
pub mod rebuild;
pub mod replay;
pub mod window;

pub use preflight::{gap_report, log_stored_ranges};
pub use rebuild::rebuild_htf;
pub use replay::{BackfillReplay, BackfillSummary, DayReport};
pub use window::{day_of, day_start_ms, BackfillWindow};

/// Install an INFO `tracing` subscriber, overridable through `RUST_LOG`.
pub fn init_logging() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::filter::EnvFilter::builder()
                .with_default_directive(tracing_subscriber::filter::LevelFilter::INFO.into())
                .from_env_lossy(),
        )
        .with_ansi(cfg!(debug_assertions))
        .init()
}
