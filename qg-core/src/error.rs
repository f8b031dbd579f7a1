//! Error types for Quorumgate Core

use thiserror::Error;

/// Ledger operation errors
#[derive(Error, Debug)]
pub enum LedgerError {
    #[error("Object not found: {0}")]
    NotFound(String),

    #[error("Object already exists: {0}")]
    AlreadyExists(String),

    #[error("Invalid threshold: {threshold} of {total}")]
    InvalidThreshold { threshold: u32, total: u32 },

    #[error("Invalid state transition: {0}")]
    InvalidStateTransition(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Threshold not met: required {required}, got {actual}")]
    ThresholdNotMet { required: u32, actual: u32 },

    #[error("Deadline exceeded: {0}")]
    DeadlineExceeded(String),

    #[error("Version conflict on {key}: expected {expected:?}, found {found:?}")]
    VersionConflict {
        key: String,
        expected: Option<u64>,
        found: Option<u64>,
    },

    #[error("Crypto error: {0}")]
    Crypto(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type alias for ledger operations
pub type LedgerResult<T> = Result<T, LedgerError>;
