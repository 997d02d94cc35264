//! Error types for layerkv
//!
//! Provides a unified error type for all operations.

use thiserror::Error;

/// Result type alias using LayerError
pub type Result<T> = std::result::Result<T, LayerError>;

/// Unified error type for layerkv operations
#[derive(Debug, Error)]
pub enum LayerError {
    // -------------------------------------------------------------------------
    // I/O Errors
    // -------------------------------------------------------------------------
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // -------------------------------------------------------------------------
    // WAL Errors
    // -------------------------------------------------------------------------
    #[error("WAL corruption detected: {0}")]
    WalCorruption(String),

    /// The mutation could not be made durable and was not acknowledged
    #[error("Durability failure: {0}")]
    Durability(String),

    // -------------------------------------------------------------------------
    // Storage Errors
    // -------------------------------------------------------------------------
    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Manifest corruption detected: {0}")]
    ManifestCorruption(String),

    #[error("Compaction failed: {0}")]
    Compaction(String),

    #[error("Key not found")]
    KeyNotFound,

    #[error("Stored value is not valid UTF-8")]
    InvalidUtf8,

    // -------------------------------------------------------------------------
    // Serialization Errors
    // -------------------------------------------------------------------------
    #[error("Serialization error: {0}")]
    Serialization(String),

    // -------------------------------------------------------------------------
    // Configuration Errors
    // -------------------------------------------------------------------------
    #[error("Configuration error: {0}")]
    Config(String),

    // -------------------------------------------------------------------------
    // Lifecycle Errors
    // -------------------------------------------------------------------------
    #[error("Engine is shutting down")]
    ShuttingDown,
}

impl From<bincode::Error> for LayerError {
    fn from(err: bincode::Error) -> Self {
        LayerError::Serialization(err.to_string())
    }
}
