//! Live aggregation for the footprint candle engine.
//!
//! This crate provides:
//! - Per-symbol worker tasks fed through a command channel
//! - Wall-clock interval ticks
//! - Periodic persistence of closed candles
//! - The service wiring them together

pub mod flusher;
pub mod service;
pub mod ticker;
pub mod worker;

pub use flusher::Flusher;
pub use service::LiveService;
pub use ticker::interval_ticker;
pub use worker::{SymbolWorker, WorkerCommand};
