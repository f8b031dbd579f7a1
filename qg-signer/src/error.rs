//! Error types for crypto backends and the threshold coordinator

use thiserror::Error;

use qg_core::error::LedgerError;
use qg_core::types::CeremonyStatus;

/// Crypto backend errors
#[derive(Error, Debug)]
pub enum CryptoError {
    #[error("Unsupported scheme: {0}")]
    UnsupportedScheme(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Invalid key material: {0}")]
    InvalidKey(String),

    #[error("Invalid signature: {0}")]
    InvalidSignature(String),

    #[error("Aggregation failed: {0}")]
    AggregationFailed(String),

    #[error("Backend failure: {0}")]
    Backend(String),
}

/// Result type for crypto backend operations
pub type CryptoResult<T> = Result<T, CryptoError>;

/// Coordinator errors
#[derive(Error, Debug)]
pub enum CoordinatorError {
    #[error("Unknown ceremony: {0}")]
    UnknownCeremony(String),

    #[error("Ceremony {ceremony_id} is {status:?} and no longer accepts shares")]
    TerminalState {
        ceremony_id: String,
        status: CeremonyStatus,
    },

    #[error("Unauthorized validator {validator_id}: {cause}")]
    UnauthorizedValidator {
        validator_id: String,
        cause: String,
    },

    #[error("Message hash does not match the ceremony message")]
    MessageMismatch,

    #[error("Invalid share from {validator_id}: {cause}")]
    InvalidShare {
        validator_id: String,
        cause: String,
    },

    #[error("No active validator set for subnet {0}")]
    NoActiveSet(String),

    #[error("Crypto error: {0}")]
    Crypto(#[from] CryptoError),

    #[error("Ledger error: {0}")]
    Ledger(#[from] LedgerError),
}

/// Result type for coordinator operations
pub type CoordinatorResult<T> = Result<T, CoordinatorError>;
