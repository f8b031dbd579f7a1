//! Deterministic mock backend
//!
//! Produces structurally valid but cryptographically insecure signing
//! artifacts derived from SHA-256 over domain-separated inputs. Exists
//! solely so protocol tests can exercise ceremonies, aggregation ordering,
//! and failure paths without real curve arithmetic.
//!
//! Never wire this into a production registry: anyone who knows the public
//! key can forge a "signature". The module is only compiled under
//! `cfg(test)` or the `mock-backend` feature.

use sha2::{Digest as Sha2Digest, Sha256};
use std::sync::atomic::{AtomicU64, Ordering};

use qg_core::types::SchemeKind;

use crate::backend::{AggregateSignature, KeyMaterial, KeyShare, ShareInput, ThresholdBackend};
use crate::error::{CryptoError, CryptoResult};

const DOMAIN_SECRET: &[u8] = b"qg:mock:secret:v1:";
const DOMAIN_PUBLIC: &[u8] = b"qg:mock:public:v1:";
const DOMAIN_SHARE: &[u8] = b"qg:mock:share:v1:";
const DOMAIN_AGGREGATE: &[u8] = b"qg:mock:aggregate:v1:";

fn hash_chain(domain: &[u8], parts: &[&[u8]]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(domain);
    for part in parts {
        hasher.update(part);
    }
    hex::encode(hasher.finalize())
}

fn share_signature(public_key: &str, message: &[u8]) -> String {
    hash_chain(DOMAIN_SHARE, &[public_key.as_bytes(), message])
}

/// Deterministic mock of a threshold scheme. Impersonates any `SchemeKind`
/// so tests can register it in place of a real backend.
pub struct MockBackend {
    kind: SchemeKind,
    keygen_nonce: AtomicU64,
}

impl MockBackend {
    pub fn new(kind: SchemeKind) -> Self {
        Self {
            kind,
            keygen_nonce: AtomicU64::new(0),
        }
    }
}

impl Default for MockBackend {
    fn default() -> Self {
        Self::new(SchemeKind::Bls12381)
    }
}

impl ThresholdBackend for MockBackend {
    fn kind(&self) -> SchemeKind {
        self.kind
    }

    fn generate_key_shares(&self, total: u32, threshold: u32) -> CryptoResult<KeyMaterial> {
        if threshold < 1 || threshold > total {
            return Err(CryptoError::InvalidInput(format!(
                "Invalid threshold {} of {}",
                threshold, total
            )));
        }

        // Distinct key material per call without a CSPRNG
        let nonce = self.keygen_nonce.fetch_add(1, Ordering::SeqCst);

        let mut shares = Vec::with_capacity(total as usize);
        for index in 0..total {
            let secret_key = hash_chain(
                DOMAIN_SECRET,
                &[&nonce.to_le_bytes(), &index.to_le_bytes()],
            );
            let public_key = hash_chain(DOMAIN_PUBLIC, &[secret_key.as_bytes()]);
            shares.push(KeyShare {
                index,
                public_key,
                secret_key,
            });
        }

        let public_keys: Vec<&[u8]> = shares.iter().map(|s| s.public_key.as_bytes()).collect();
        let aggregate_public_key = hash_chain(DOMAIN_PUBLIC, &public_keys);

        Ok(KeyMaterial {
            scheme: self.kind,
            threshold,
            aggregate_public_key,
            shares,
        })
    }

    fn partial_sign(&self, secret_key: &str, message: &[u8]) -> CryptoResult<String> {
        if secret_key.is_empty() {
            return Err(CryptoError::InvalidKey("Empty secret key".to_string()));
        }
        let public_key = hash_chain(DOMAIN_PUBLIC, &[secret_key.as_bytes()]);
        Ok(share_signature(&public_key, message))
    }

    fn verify_share(&self, public_key: &str, message: &[u8], signature: &str) -> CryptoResult<()> {
        if share_signature(public_key, message) == signature {
            Ok(())
        } else {
            Err(CryptoError::InvalidSignature(
                "Mock share verification failed".to_string(),
            ))
        }
    }

    fn aggregate(&self, shares: &[ShareInput], threshold: u32) -> CryptoResult<AggregateSignature> {
        if (shares.len() as u32) < threshold {
            return Err(CryptoError::AggregationFailed(format!(
                "Have {} shares, need {}",
                shares.len(),
                threshold
            )));
        }

        let signatures: Vec<&[u8]> = shares.iter().map(|s| s.signature.as_bytes()).collect();

        Ok(AggregateSignature {
            scheme: self.kind,
            signature: hash_chain(DOMAIN_AGGREGATE, &signatures),
            signer_public_keys: shares.iter().map(|s| s.public_key.clone()).collect(),
        })
    }

    fn verify_aggregate(&self, aggregate: &AggregateSignature, message: &[u8]) -> CryptoResult<()> {
        // Shares are deterministic, so the aggregate can be recomputed from
        // the participant keys and the message alone.
        let expected_shares: Vec<String> = aggregate
            .signer_public_keys
            .iter()
            .map(|pk| share_signature(pk, message))
            .collect();
        let signature_bytes: Vec<&[u8]> =
            expected_shares.iter().map(|s| s.as_bytes()).collect();
        let expected = hash_chain(DOMAIN_AGGREGATE, &signature_bytes);

        if expected == aggregate.signature {
            Ok(())
        } else {
            Err(CryptoError::InvalidSignature(
                "Mock aggregate verification failed".to_string(),
            ))
        }
    }
}
