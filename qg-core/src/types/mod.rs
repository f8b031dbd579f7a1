//! Core protocol types
//!
//! Plain data types shared by the coordinator and the ledger services.
//! State machines operating on these types live in `qg-signer` and `qg-db`.

mod actor;
mod ceremony;
mod common;
mod operation;
mod slashing;
mod validator_set;

pub use actor::*;
pub use ceremony::*;
pub use common::*;
pub use operation::*;
pub use slashing::*;
pub use validator_set::*;
