//! Quorumgate Core - Subnet Governance Quorum Layer
//!
//! This crate provides the core types and interfaces for threshold-signature
//! coordination across governance subnets:
//! - Validator sets with epoch-based rotation and activity windows
//! - Signing ceremonies and signature shares
//! - Critical operations gated on quorum approval
//! - Slashing evidence and reputation accounting
//! - Typed protocol events and the durable-storage contract
//!
//! Protocol state machines and services are implemented on top of this crate:
//! `qg-signer` (crypto backends, ceremonies, coordinator) and `qg-db`
//! (ledger services).

pub mod constants;
pub mod error;
pub mod events;
pub mod ledger;
pub mod logging;
pub mod storage;
pub mod types;

pub use constants::*;
pub use error::*;
pub use events::*;
pub use types::*;
