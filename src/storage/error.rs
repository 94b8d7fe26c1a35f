//! Error types for the storage collaborators

use std::fmt;
use thiserror::Error;

use super::types::PartitionId;

/// Result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// Storage error types
#[derive(Error, Debug)]
pub enum StorageError {
    /// I/O operation failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// CSV input could not be read
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    /// A field could not be parsed into its typed form
    #[error("Parse error: {0}")]
    Parse(String),

    /// Item not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Storage backend unavailable
    #[error("Backend unavailable: {0}")]
    Unavailable(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// A partition scan broke off mid-stream
    #[error("Scan of partition {partition} failed: {reason}")]
    Scan {
        partition: PartitionId,
        reason: String,
    },

    /// Generic error wrapper
    #[error("Storage error: {0}")]
    Other(#[from] anyhow::Error),
}

impl StorageError {
    /// Create a parse error
    pub fn parse<E: fmt::Display>(err: E) -> Self {
        Self::Parse(err.to_string())
    }

    /// Create a not found error
    pub fn not_found<E: fmt::Display>(item: E) -> Self {
        Self::NotFound(item.to_string())
    }

    /// Create an unavailable error
    pub fn unavailable<E: fmt::Display>(msg: E) -> Self {
        Self::Unavailable(msg.to_string())
    }

    /// Create a configuration error
    pub fn configuration<E: fmt::Display>(msg: E) -> Self {
        Self::Configuration(msg.to_string())
    }

    /// Create a scan error for a partition
    pub fn scan<E: fmt::Display>(partition: PartitionId, reason: E) -> Self {
        Self::Scan {
            partition,
            reason: reason.to_string(),
        }
    }

    /// Check if this is a retryable error
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Io(_) | Self::Unavailable(_) | Self::Scan { .. })
    }

    /// Check if this is a not found error
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}
