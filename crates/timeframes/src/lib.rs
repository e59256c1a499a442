//! Higher-interval candles for the footprint candle engine.
//!
//! This crate handles:
//! - Merge rules between intervals
//! - Merging base candles into higher-interval candles
//! - Cascading closes through every interval
//! - Gap detection over stored series
//! - The per-symbol pipeline shared by live ingestion and backfill

pub mod builder;
pub mod gaps;
pub mod merge;
pub mod pipeline;
pub mod rules;

pub use builder::MultiResolutionBuilder;
pub use gaps::{Gap, GapDetector};
pub use merge::merge_candles;
pub use pipeline::SymbolPipeline;
pub use rules::{history_range, rule_for_target, rules_for, MergeRule};
