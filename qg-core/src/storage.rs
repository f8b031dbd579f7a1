//! Durable storage interface
//!
//! Persistence technology is an external collaborator; the protocol only
//! requires per-key versioned reads and writes with compare-and-swap, which
//! the ceremony completion transition and rotation records rely on. Records
//! are addressed by stable string keys (arena-and-index style); no raw
//! in-process pointers cross the storage boundary.

use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;

use crate::error::{LedgerError, LedgerResult};

/// A stored value together with its write version
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionedValue {
    /// Monotonic per-key version, starting at 1
    pub version: u64,
    pub bytes: Vec<u8>,
}

/// Versioned key-value store with optimistic concurrency
#[async_trait]
pub trait Datastore: Send + Sync {
    async fn get(&self, key: &str) -> LedgerResult<Option<VersionedValue>>;

    /// Unconditional write; returns the new version
    async fn put(&self, key: &str, bytes: Vec<u8>) -> LedgerResult<u64>;

    /// Write only if the key's current version matches `expected`
    /// (`None` = the key must not exist yet). Returns the new version or
    /// `VersionConflict`.
    async fn compare_and_swap(
        &self,
        key: &str,
        expected: Option<u64>,
        bytes: Vec<u8>,
    ) -> LedgerResult<u64>;

    async fn delete(&self, key: &str) -> LedgerResult<()>;

    /// Keys with the given prefix, sorted
    async fn list(&self, prefix: &str) -> LedgerResult<Vec<String>>;
}

/// In-memory datastore for tests and single-process deployments
#[derive(Default)]
pub struct MemoryDatastore {
    entries: RwLock<HashMap<String, VersionedValue>>,
}

impl MemoryDatastore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Datastore for MemoryDatastore {
    async fn get(&self, key: &str) -> LedgerResult<Option<VersionedValue>> {
        let entries = self.entries.read().await;
        Ok(entries.get(key).cloned())
    }

    async fn put(&self, key: &str, bytes: Vec<u8>) -> LedgerResult<u64> {
        let mut entries = self.entries.write().await;
        let version = entries.get(key).map(|v| v.version).unwrap_or(0) + 1;
        entries.insert(key.to_string(), VersionedValue { version, bytes });
        Ok(version)
    }

    async fn compare_and_swap(
        &self,
        key: &str,
        expected: Option<u64>,
        bytes: Vec<u8>,
    ) -> LedgerResult<u64> {
        let mut entries = self.entries.write().await;
        let found = entries.get(key).map(|v| v.version);
        if found != expected {
            return Err(LedgerError::VersionConflict {
                key: key.to_string(),
                expected,
                found,
            });
        }
        let version = found.unwrap_or(0) + 1;
        entries.insert(key.to_string(), VersionedValue { version, bytes });
        Ok(version)
    }

    async fn delete(&self, key: &str) -> LedgerResult<()> {
        let mut entries = self.entries.write().await;
        entries.remove(key);
        Ok(())
    }

    async fn list(&self, prefix: &str) -> LedgerResult<Vec<String>> {
        let entries = self.entries.read().await;
        let mut keys: Vec<String> = entries
            .keys()
            .filter(|k| k.starts_with(prefix))
            .cloned()
            .collect();
        keys.sort();
        Ok(keys)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_put_and_get() {
        let store = MemoryDatastore::new();
        let v1 = store.put("a", b"one".to_vec()).await.unwrap();
        assert_eq!(v1, 1);

        let v2 = store.put("a", b"two".to_vec()).await.unwrap();
        assert_eq!(v2, 2);

        let value = store.get("a").await.unwrap().unwrap();
        assert_eq!(value.version, 2);
        assert_eq!(value.bytes, b"two");
    }

    #[tokio::test]
    async fn test_cas_detects_conflict() {
        let store = MemoryDatastore::new();
        let v1 = store
            .compare_and_swap("a", None, b"one".to_vec())
            .await
            .unwrap();
        assert_eq!(v1, 1);

        // Stale expectation loses
        let err = store
            .compare_and_swap("a", None, b"clobber".to_vec())
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::VersionConflict { .. }));

        let v2 = store
            .compare_and_swap("a", Some(v1), b"two".to_vec())
            .await
            .unwrap();
        assert_eq!(v2, 2);
    }

    #[tokio::test]
    async fn test_list_prefix_sorted() {
        let store = MemoryDatastore::new();
        store.put("ceremony/b", vec![]).await.unwrap();
        store.put("ceremony/a", vec![]).await.unwrap();
        store.put("operation/x", vec![]).await.unwrap();

        let keys = store.list("ceremony/").await.unwrap();
        assert_eq!(keys, vec!["ceremony/a", "ceremony/b"]);
    }
}
