//! Quorumgate Ledger Services
//!
//! Service implementations of the core ledger interfaces:
//! - Validator-set lifecycle: epochs, rotation, activity, penalties
//! - Slashing and reputation accounting with double-sign detection
//! - Identity registry for principal verification
//! - Critical-operation workflow gated on ceremony completion
//!
//! Services hold their working state in memory and persist every record
//! through the storage collaborator (`qg_core::storage::Datastore`).

pub mod services;

pub use services::*;
