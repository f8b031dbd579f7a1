//! Quorumgate Threshold Signing
//!
//! Implements the threshold-signature coordination protocol for subnet
//! governance:
//!
//! Crypto backends:
//! - Capability interface over key-share generation, partial signing, share
//!   verification, and aggregation
//! - BLS12-381 production backend (blst)
//! - Deterministic mock backend for protocol tests
//!
//! Coordination:
//! - Signing ceremony state machine with snapshot isolation
//! - Share collection with idempotent resubmission and double-sign detection
//! - First-quorum aggregation with bounded retry on backend failure
//! - Background expiry sweeps

pub mod backend;
pub mod bls;
pub mod ceremony;
pub mod coordinator;
pub mod error;
#[cfg(any(test, feature = "mock-backend"))]
pub mod mock;

pub use backend::*;
pub use bls::*;
pub use ceremony::*;
pub use coordinator::*;
pub use error::*;
