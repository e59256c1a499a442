//! Error types for the footprint candle engine.

use thiserror::Error;

/// Result type alias using our Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for the footprint candle engine.
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration error (invalid setup, interval without a fixed size, bad window).
    #[error("Configuration error: {0}")]
    Config(String),

    /// Interval label that is not part of the interval table.
    #[error("Unknown interval: {0}")]
    UnknownInterval(String),

    /// Trade routed to a symbol that has no aggregator.
    #[error("Unknown symbol: {0}")]
    UnknownSymbol(String),

    /// Data error (invalid or inconsistent candles).
    #[error("Data error: {0}")]
    Data(String),

    /// Historical archive could not be read or parsed.
    #[error("Archive error: {0}")]
    Archive(String),

    /// Storage engine rejected a read or write.
    #[error("Storage error: {0}")]
    Storage(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Generic error with message.
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Create a configuration error.
    pub fn config(msg: impl Into<String>) -> Self {
        Error::Config(msg.into())
    }

    /// Create a data error.
    pub fn data(msg: impl Into<String>) -> Self {
        Error::Data(msg.into())
    }

    /// Create an archive error.
    pub fn archive(msg: impl Into<String>) -> Self {
        Error::Archive(msg.into())
    }

    /// Create a storage error.
    pub fn storage(msg: impl Into<String>) -> Self {
        Error::Storage(msg.into())
    }
}
