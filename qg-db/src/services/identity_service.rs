//! Identity Registry
//!
//! Stands in for the surrounding system's authentication collaborator:
//! a registry of known principals consulted before a share submission or
//! operation request is acted on.

use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::RwLock;

use qg_core::error::LedgerResult;
use qg_core::ledger::IdentityVerifier;

/// Registry-backed identity verifier
#[derive(Default)]
pub struct IdentityRegistry {
    known: RwLock<HashSet<String>>,
    allow_all: bool,
}

impl IdentityRegistry {
    /// Empty registry; every principal must be registered explicitly
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry that accepts every principal, for tests and embedded use
    pub fn permissive() -> Self {
        Self {
            known: RwLock::new(HashSet::new()),
            allow_all: true,
        }
    }

    pub fn register(&self, actor: impl Into<String>) {
        if let Ok(mut known) = self.known.write() {
            known.insert(actor.into());
        }
    }

    pub fn revoke(&self, actor: &str) {
        if let Ok(mut known) = self.known.write() {
            known.remove(actor);
        }
    }
}

#[async_trait]
impl IdentityVerifier for IdentityRegistry {
    async fn verify_actor(&self, actor: &str) -> LedgerResult<bool> {
        if self.allow_all {
            return Ok(true);
        }
        let known = self.known.read().map(|k| k.contains(actor)).unwrap_or(false);
        Ok(known)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_registration_and_revocation() {
        let registry = IdentityRegistry::new();
        assert!(!registry.verify_actor("val_0").await.unwrap());

        registry.register("val_0");
        assert!(registry.verify_actor("val_0").await.unwrap());

        registry.revoke("val_0");
        assert!(!registry.verify_actor("val_0").await.unwrap());
    }

    #[tokio::test]
    async fn test_permissive_accepts_everyone() {
        let registry = IdentityRegistry::permissive();
        assert!(registry.verify_actor("anyone").await.unwrap());
    }
}
