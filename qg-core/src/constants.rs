//! Protocol Constants
//!
//! Centralized defaults and protocol-defined limits. All magic numbers used
//! by the coordinator and the ledger services live here.

// ============================================================================
// Versions
// ============================================================================

/// Current protocol version
pub const PROTOCOL_VERSION: &str = "1.0.0";

// ============================================================================
// Ceremonies
// ============================================================================

/// Default ceremony time-to-live (60 minutes)
pub const DEFAULT_CEREMONY_TTL_SECS: i64 = 3600;

/// Interval between expiry sweeps
pub const DEFAULT_SWEEP_INTERVAL_SECS: u64 = 30;

/// Consecutive aggregation failures tolerated before a ceremony fails
pub const MAX_AGGREGATE_RETRIES: u32 = 3;

// ============================================================================
// Reputation
// ============================================================================

/// Reputation ceiling
pub const REPUTATION_MAX: u32 = 1000;

/// Reputation assigned to a validator on admission
pub const REPUTATION_INITIAL: u32 = 500;

/// Reputation penalty for a warning-severity slashing event
pub const PENALTY_WARNING: u32 = 5;

/// Reputation penalty for a minor-severity slashing event
pub const PENALTY_MINOR: u32 = 20;

/// Reputation penalty for a major-severity slashing event
pub const PENALTY_MAJOR: u32 = 50;

/// Reputation penalty for a critical-severity slashing event
pub const PENALTY_CRITICAL: u32 = 200;

// ============================================================================
// Rotation policy defaults
// ============================================================================

/// Default interval after which a validator set is due for rotation (30 days)
pub const DEFAULT_ROTATION_INTERVAL_SECS: i64 = 30 * 24 * 3600;

/// Default maximum validator inactivity before rotation is due (90 days)
pub const DEFAULT_MAX_VALIDATOR_AGE_SECS: i64 = 90 * 24 * 3600;

/// Minimum validators per set
pub const DEFAULT_MIN_VALIDATORS: usize = 1;

/// Maximum validators per set
pub const DEFAULT_MAX_VALIDATORS: usize = 256;

// ============================================================================
// System actors
// ============================================================================

/// Actor recorded as the reporter for slashing events raised by the
/// coordinator itself (failed share verification, same-ceremony conflicts).
pub const COORDINATOR_ACTOR: &str = "coordinator";
