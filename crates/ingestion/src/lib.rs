//! Trade ingestion for the footprint candle engine.
//!
//! This crate handles:
//! - Folding trades into open footprint candles (per symbol and interval)
//! - Buffering closed candles until storage confirms them
//! - Reading historical trade archives

pub mod aggregator;
pub mod archive;
pub mod queue;

pub use aggregator::OrderFlowAggregator;
pub use archive::{archive_file_name, read_archive, read_archive_file, AggTradeRecord};
pub use queue::CandleQueue;
