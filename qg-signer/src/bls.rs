//! BLS12-381 backend
//!
//! Aggregate BLS signatures over the blst library (`min_pk`: 48-byte public
//! keys, 96-byte signatures). Each signer position holds an independent
//! keypair; a quorum's shares are aggregated into one signature and verified
//! against the participating signers' aggregated public key. The roster-wide
//! aggregate key recorded at key generation serves audit.

use blst::min_pk::{
    AggregatePublicKey, AggregateSignature as BlstAggregate, PublicKey, SecretKey, Signature,
};
use blst::BLST_ERROR;
use rand_core::{OsRng, RngCore};

use qg_core::types::SchemeKind;

use crate::backend::{AggregateSignature, KeyMaterial, KeyShare, ShareInput, ThresholdBackend};
use crate::error::{CryptoError, CryptoResult};

/// Domain Separation Tag for Quorumgate BLS signatures
const DST: &[u8] = b"BLS_SIG_BLS12381G2_XMD:SHA-256_SSWU_RO_NUL_QG:v1";

fn parse_secret(hex_str: &str) -> CryptoResult<SecretKey> {
    let bytes = hex::decode(hex_str)
        .map_err(|e| CryptoError::InvalidKey(format!("Invalid hex: {}", e)))?;
    if bytes.len() != 32 {
        return Err(CryptoError::InvalidKey(format!(
            "Invalid BLS secret key length: expected 32, got {}",
            bytes.len()
        )));
    }
    let mut arr = [0u8; 32];
    arr.copy_from_slice(&bytes);
    SecretKey::from_bytes(&arr)
        .map_err(|e| CryptoError::InvalidKey(format!("Invalid BLS secret key: {:?}", e)))
}

fn parse_public(hex_str: &str) -> CryptoResult<PublicKey> {
    let bytes = hex::decode(hex_str)
        .map_err(|e| CryptoError::InvalidKey(format!("Invalid hex: {}", e)))?;
    if bytes.len() != 48 {
        return Err(CryptoError::InvalidKey(format!(
            "Invalid BLS public key length: expected 48, got {}",
            bytes.len()
        )));
    }
    PublicKey::from_bytes(&bytes)
        .map_err(|e| CryptoError::InvalidKey(format!("Invalid BLS public key: {:?}", e)))
}

fn parse_signature(hex_str: &str) -> CryptoResult<Signature> {
    let bytes = hex::decode(hex_str)
        .map_err(|e| CryptoError::InvalidSignature(format!("Invalid hex: {}", e)))?;
    if bytes.len() != 96 {
        return Err(CryptoError::InvalidSignature(format!(
            "Invalid BLS signature length: expected 96, got {}",
            bytes.len()
        )));
    }
    Signature::from_bytes(&bytes)
        .map_err(|e| CryptoError::InvalidSignature(format!("Invalid BLS signature: {:?}", e)))
}

fn aggregate_public_keys(pubkeys: &[PublicKey]) -> CryptoResult<PublicKey> {
    if pubkeys.is_empty() {
        return Err(CryptoError::AggregationFailed(
            "No public keys to aggregate".to_string(),
        ));
    }
    let refs: Vec<&PublicKey> = pubkeys.iter().collect();
    let agg = AggregatePublicKey::aggregate(&refs, true)
        .map_err(|e| CryptoError::AggregationFailed(format!("Public key aggregation: {:?}", e)))?;
    Ok(agg.to_public_key())
}

/// BLS12-381 threshold backend
#[derive(Debug, Default)]
pub struct BlsBackend;

impl ThresholdBackend for BlsBackend {
    fn kind(&self) -> SchemeKind {
        SchemeKind::Bls12381
    }

    fn generate_key_shares(&self, total: u32, threshold: u32) -> CryptoResult<KeyMaterial> {
        if threshold < 1 || threshold > total {
            return Err(CryptoError::InvalidInput(format!(
                "Invalid threshold {} of {}",
                threshold, total
            )));
        }

        let mut shares = Vec::with_capacity(total as usize);
        let mut pubkeys = Vec::with_capacity(total as usize);
        for index in 0..total {
            let mut ikm = [0u8; 32];
            OsRng.fill_bytes(&mut ikm);
            let sk = SecretKey::key_gen(&ikm, &[])
                .map_err(|e| CryptoError::Backend(format!("Key generation failed: {:?}", e)))?;
            let pk = sk.sk_to_pk();
            shares.push(KeyShare {
                index,
                public_key: hex::encode(pk.compress()),
                secret_key: hex::encode(sk.to_bytes()),
            });
            pubkeys.push(pk);
        }

        let aggregate = aggregate_public_keys(&pubkeys)?;

        Ok(KeyMaterial {
            scheme: self.kind(),
            threshold,
            aggregate_public_key: hex::encode(aggregate.compress()),
            shares,
        })
    }

    fn partial_sign(&self, secret_key: &str, message: &[u8]) -> CryptoResult<String> {
        let sk = parse_secret(secret_key)?;
        let signature = sk.sign(message, DST, &[]);
        Ok(hex::encode(signature.compress()))
    }

    fn verify_share(&self, public_key: &str, message: &[u8], signature: &str) -> CryptoResult<()> {
        let pk = parse_public(public_key)?;
        let sig = parse_signature(signature)?;
        let result = sig.verify(true, message, DST, &[], &pk, true);
        if result == BLST_ERROR::BLST_SUCCESS {
            Ok(())
        } else {
            Err(CryptoError::InvalidSignature(format!(
                "BLS verification failed: {:?}",
                result
            )))
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

        let signatures: Vec<Signature> = shares
            .iter()
            .map(|s| parse_signature(&s.signature))
            .collect::<CryptoResult<Vec<_>>>()?;

        let mut aggregate = BlstAggregate::from_signature(&signatures[0]);
        for signature in &signatures[1..] {
            aggregate
                .add_signature(signature, true)
                .map_err(|e| {
                    CryptoError::AggregationFailed(format!("Signature aggregation: {:?}", e))
                })?;
        }

        Ok(AggregateSignature {
            scheme: self.kind(),
            signature: hex::encode(aggregate.to_signature().compress()),
            signer_public_keys: shares.iter().map(|s| s.public_key.clone()).collect(),
        })
    }

    fn verify_aggregate(&self, aggregate: &AggregateSignature, message: &[u8]) -> CryptoResult<()> {
        let pubkeys = aggregate
            .signer_public_keys
            .iter()
            .map(|pk| parse_public(pk))
            .collect::<CryptoResult<Vec<_>>>()?;
        let aggregate_key = aggregate_public_keys(&pubkeys)?;
        let signature = parse_signature(&aggregate.signature)?;

        let result = signature.verify(true, message, DST, &[], &aggregate_key, true);
        if result == BLST_ERROR::BLST_SUCCESS {
            Ok(())
        } else {
            Err(CryptoError::InvalidSignature(format!(
                "BLS aggregate verification failed: {:?}",
                result
            )))
        }
    }
}
