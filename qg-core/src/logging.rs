//! Logging Standards and Conventions
//!
//! Logging conventions for the Quorumgate protocol. All modules use
//! `tracing` with structured fields from this module.
//!
//! # Log Levels
//!
//! | Level | Usage | Examples |
//! |-------|-------|----------|
//! | ERROR | Invariant violations, unrecoverable failures | Storage failure, double aggregate write |
//! | WARN  | Rejected shares, retries, degraded operation | Invalid share, aggregation retry, rotation due |
//! | INFO  | State transitions | Ceremony complete, set rotated, operation executed |
//! | DEBUG | Operation flow detail | Share recorded, sweep results, duplicate submissions |
//!
//! Always log key identifiers as structured fields, never interpolated into
//! the message:
//!
//! ```ignore
//! use tracing::info;
//!
//! info!(
//!     ceremony_id = %ceremony_id,
//!     subnet_id = %subnet_id,
//!     count = collected,
//!     "ceremony complete"
//! );
//! ```

/// Standard log field names
pub mod fields {
    /// Ceremony identifier
    pub const CEREMONY_ID: &str = "ceremony_id";
    /// Subnet identifier
    pub const SUBNET_ID: &str = "subnet_id";
    /// Validator identifier
    pub const VALIDATOR_ID: &str = "validator_id";
    /// Operation identifier
    pub const OPERATION_ID: &str = "operation_id";
    /// Validator-set epoch
    pub const EPOCH: &str = "epoch";
    /// Operation name
    pub const OPERATION: &str = "operation";
    /// Error message
    pub const ERROR: &str = "error";
    /// Item count
    pub const COUNT: &str = "count";
    /// Status
    pub const STATUS: &str = "status";
}

/// Log operation categories for consistent naming
pub mod operations {
    // Ceremony operations
    pub const CEREMONY_OPEN: &str = "ceremony_open";
    pub const SHARE_SUBMIT: &str = "share_submit";
    pub const AGGREGATE: &str = "aggregate";
    pub const EXPIRY_SWEEP: &str = "expiry_sweep";

    // Validator-set operations
    pub const SET_INITIALIZE: &str = "set_initialize";
    pub const SET_ROTATE: &str = "set_rotate";
    pub const ROTATION_CHECK: &str = "rotation_check";

    // Slashing operations
    pub const SLASH_RECORD: &str = "slash_record";
    pub const SLASH_RESOLVE: &str = "slash_resolve";

    // Workflow operations
    pub const OPERATION_CREATE: &str = "operation_create";
    pub const OPERATION_EXECUTE: &str = "operation_execute";
    pub const DEADLINE_SWEEP: &str = "deadline_sweep";
}
