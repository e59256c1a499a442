//! Core types and configuration for the footprint candle engine.
//!
//! This crate provides shared types used across all other crates:
//! - Candle intervals and their time grids
//! - Trade, price level and candle types
//! - Configuration structures
//! - Common error types

pub mod config;
pub mod error;
pub mod interval;
pub mod types;

pub use config::{AggregatorConfig, BackfillConfig, Config, EvictionPolicy, LiveConfig};
pub use error::{Error, Result};
pub use interval::Interval;
pub use types::*;
