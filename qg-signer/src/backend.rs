//! Crypto backend adapter
//!
//! A `ThresholdBackend` provides key-share generation, partial signing,
//! per-share verification, and aggregation for one signature scheme.
//! Backends are a pure capability interface selected per validator set at
//! initialization time; the protocol never branches on the concrete scheme.
//! Every operation is deterministic given identical inputs except
//! `generate_key_shares`, which draws from a cryptographically secure
//! random source.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

use qg_core::types::SchemeKind;

use crate::error::{CryptoError, CryptoResult};

/// Key material for one signer position
#[derive(Clone)]
pub struct KeyShare {
    /// Position of this share within the scheme (0-based)
    pub index: u32,
    /// Public key share (hex)
    pub public_key: String,
    /// Secret key share (hex). Never logged.
    pub secret_key: String,
}

impl std::fmt::Debug for KeyShare {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyShare")
            .field("index", &self.index)
            .field("public_key", &self.public_key)
            .field("secret_key", &"<redacted>")
            .finish()
    }
}

/// Output of key generation for one validator set
#[derive(Debug, Clone)]
pub struct KeyMaterial {
    pub scheme: SchemeKind,
    pub threshold: u32,
    /// Aggregate public key over the full roster (hex)
    pub aggregate_public_key: String,
    pub shares: Vec<KeyShare>,
}

/// One signer's share as fed to aggregation
#[derive(Debug, Clone)]
pub struct ShareInput {
    pub key_index: u32,
    /// Public key share of the signer (hex)
    pub public_key: String,
    /// Signature bytes (hex)
    pub signature: String,
}

/// Aggregated threshold signature
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AggregateSignature {
    pub scheme: SchemeKind,
    /// Aggregate signature bytes (hex)
    pub signature: String,
    /// Public keys of the participating signers (hex), in aggregation order
    pub signer_public_keys: Vec<String>,
}

/// Capability interface over one signature scheme
pub trait ThresholdBackend: Send + Sync {
    fn kind(&self) -> SchemeKind;

    /// Generate `total` key shares with the given threshold
    fn generate_key_shares(&self, total: u32, threshold: u32) -> CryptoResult<KeyMaterial>;

    /// Sign a message with one secret key share; returns the signature hex
    fn partial_sign(&self, secret_key: &str, message: &[u8]) -> CryptoResult<String>;

    /// Verify a single share against its public key share. Pure; safe to
    /// run in parallel ahead of any ceremony lock.
    fn verify_share(&self, public_key: &str, message: &[u8], signature: &str) -> CryptoResult<()>;

    /// Aggregate at least `threshold` distinct-signer shares
    fn aggregate(&self, shares: &[ShareInput], threshold: u32) -> CryptoResult<AggregateSignature>;

    /// Verify an aggregate signature over the message
    fn verify_aggregate(&self, aggregate: &AggregateSignature, message: &[u8]) -> CryptoResult<()>;
}

/// Registry of wired backends, keyed by scheme
#[derive(Default)]
pub struct BackendRegistry {
    backends: HashMap<SchemeKind, Arc<dyn ThresholdBackend>>,
}

impl BackendRegistry {
    /// Empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the production BLS backend wired
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(crate::bls::BlsBackend::default()));
        registry
    }

    /// Register a backend under its own scheme kind, replacing any previous
    /// registration for that scheme
    pub fn register(&mut self, backend: Arc<dyn ThresholdBackend>) {
        self.backends.insert(backend.kind(), backend);
    }

    /// Look up the backend for a scheme
    pub fn get(&self, kind: SchemeKind) -> CryptoResult<Arc<dyn ThresholdBackend>> {
        self.backends
            .get(&kind)
            .cloned()
            .ok_or_else(|| CryptoError::UnsupportedScheme(kind.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registry_defaults_include_bls() {
        let registry = BackendRegistry::with_defaults();
        assert!(registry.get(SchemeKind::Bls12381).is_ok());
        assert!(matches!(
            registry.get(SchemeKind::Dilithium3),
            Err(CryptoError::UnsupportedScheme(_))
        ));
    }

    #[test]
    fn test_key_share_debug_redacts_secret() {
        let share = KeyShare {
            index: 0,
            public_key: "ab".to_string(),
            secret_key: "deadbeef".to_string(),
        };
        let rendered = format!("{:?}", share);
        assert!(!rendered.contains("deadbeef"));
    }
}
