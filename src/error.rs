//! Error types for tierstream
//!
//! Provides a unified error type for all operations.

use thiserror::Error;

/// Result type alias using TierError
pub type Result<T> = std::result::Result<T, TierError>;

/// Unified error type for tierstream operations
#[derive(Debug, Error)]
pub enum TierError {
    // -------------------------------------------------------------------------
    // I/O Errors
    // -------------------------------------------------------------------------
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // -------------------------------------------------------------------------
    // Write Path Errors (caller errors, never retried)
    // -------------------------------------------------------------------------
    #[error("Greater timestamp already exists for the stream. Insert failed.")]
    TimestampOrder,

    #[error("The datapoints must be ordered by increasing timestamp")]
    UnorderedInput,

    #[error("Timestamp {0} is not a finite number")]
    InvalidTimestamp(f64),

    #[error("Insert failed: {0}")]
    SizeLimit(String),

    // -------------------------------------------------------------------------
    // Read Path Errors
    // -------------------------------------------------------------------------
    #[error("Invalid index range: {0}")]
    InvalidRange(String),

    // -------------------------------------------------------------------------
    // Internal Consistency Errors
    // -------------------------------------------------------------------------
    #[error("Consistency failure: {0}")]
    Consistency(String),

    // -------------------------------------------------------------------------
    // WAL Errors
    // -------------------------------------------------------------------------
    #[error("WAL corruption detected: {0}")]
    WalCorruption(String),

    // -------------------------------------------------------------------------
    // Cold Tier Errors
    // -------------------------------------------------------------------------
    #[error("Batch already exists: {0}")]
    DuplicateBatch(String),

    #[error("Batch corruption detected: {0}")]
    BatchCorruption(String),

    #[error("Compression error: {0}")]
    Compression(String),

    // -------------------------------------------------------------------------
    // Serialization Errors
    // -------------------------------------------------------------------------
    #[error("Serialization error: {0}")]
    Serialization(String),

    // -------------------------------------------------------------------------
    // Configuration / Lifecycle Errors
    // -------------------------------------------------------------------------
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Shutting down")]
    ShuttingDown,
}

impl TierError {
    /// Errors caused by the request itself. Surfaced verbatim, never retried.
    pub fn is_caller_error(&self) -> bool {
        matches!(
            self,
            TierError::TimestampOrder
                | TierError::UnorderedInput
                | TierError::InvalidTimestamp(_)
                | TierError::SizeLimit(_)
                | TierError::InvalidRange(_)
        )
    }

    /// Backend failures the promotion pipeline backs off and retries.
    pub fn is_retryable(&self) -> bool {
        matches!(self, TierError::Io(_))
    }
}

impl From<bincode::Error> for TierError {
    fn from(e: bincode::Error) -> Self {
        TierError::Serialization(e.to_string())
    }
}
