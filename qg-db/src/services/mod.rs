//! Ledger service implementations

mod identity_service;
mod operation_service;
mod slashing_service;
mod validator_set_service;

pub use identity_service::*;
pub use operation_service::*;
pub use slashing_service::*;
pub use validator_set_service::*;
