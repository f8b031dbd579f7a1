//! Common types shared across the protocol
//!
//! Quorumgate uses fixed 32-byte SHA-256 digests for message hashes and
//! evidence references.

use serde::{Deserialize, Serialize};
use sha2::{Digest as Sha2Digest, Sha256};
use std::fmt;

/// 32-byte fixed-size digest
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Digest(pub [u8; 32]);

impl Digest {
    /// Create a digest from raw bytes
    pub fn new(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Compute the SHA-256 digest of arbitrary data
    pub fn compute(data: &[u8]) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(data);
        Self(hasher.finalize().into())
    }

    /// Parse a digest from a 64-character hex string
    pub fn from_hex(s: &str) -> Result<Self, hex::FromHexError> {
        let bytes = hex::decode(s)?;
        if bytes.len() != 32 {
            return Err(hex::FromHexError::InvalidStringLength);
        }
        let mut arr = [0u8; 32];
        arr.copy_from_slice(&bytes);
        Ok(Self(arr))
    }

    /// Convert to hex string
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Get the underlying bytes
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Create a zero digest (null marker)
    pub fn zero() -> Self {
        Self([0u8; 32])
    }

    /// Check if this is a zero digest
    pub fn is_zero(&self) -> bool {
        self.0.iter().all(|&b| b == 0)
    }

    /// Combine two digests into one (for conflict evidence and chaining)
    pub fn combine(left: &Self, right: &Self) -> Self {
        let mut combined = Vec::with_capacity(64);
        combined.extend_from_slice(&left.0);
        combined.extend_from_slice(&right.0);
        Self::compute(&combined)
    }
}

impl fmt::Debug for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Digest({}...)", &self.to_hex()[..16])
    }
}

impl fmt::Display for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl Default for Digest {
    fn default() -> Self {
        Self::zero()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_digest_hex_roundtrip() {
        let original = Digest::new([0x42u8; 32]);
        let hex = original.to_hex();
        let parsed = Digest::from_hex(&hex).unwrap();
        assert_eq!(original, parsed);
    }

    #[test]
    fn test_digest_zero() {
        let zero = Digest::zero();
        assert!(zero.is_zero());

        let non_zero = Digest::new([1u8; 32]);
        assert!(!non_zero.is_zero());
    }

    #[test]
    fn test_digest_compute_deterministic() {
        let a = Digest::compute(b"hello world");
        let b = Digest::compute(b"hello world");
        assert_eq!(a, b);
        assert!(!a.is_zero());
    }

    #[test]
    fn test_digest_combine_order_sensitive() {
        let a = Digest::compute(b"a");
        let b = Digest::compute(b"b");
        assert_ne!(Digest::combine(&a, &b), Digest::combine(&b, &a));
    }
}
