//! Shared cache tier
//!
//! [`SharedStore`] is the contract for an external key-value store with TTL
//! expiry (Redis, Memcached, a KV service). [`MemoryStore`] is the in-process
//! implementation used when no external store is configured.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::Mutex;

/// Shared store failures
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StoreError {
    /// Store could not be reached
    #[error("store unreachable: {0}")]
    Unreachable(String),

    /// Store rejected the operation
    #[error("store operation failed: {0}")]
    Operation(String),
}

/// External key-value store with per-key TTL
#[async_trait]
pub trait SharedStore: Send + Sync {
    /// Value for a key, `None` when absent or expired
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError>;

    /// Store a value that expires after `ttl`
    async fn set_with_ttl(&self, key: &str, value: Vec<u8>, ttl: Duration)
        -> Result<(), StoreError>;

    /// Remove a key; absent keys are not an error
    async fn delete(&self, key: &str) -> Result<(), StoreError>;

    /// Keys matching a glob pattern (`*` wildcard)
    async fn keys(&self, pattern: &str) -> Result<Vec<String>, StoreError>;

    /// Drop expired entries the store does not expire on its own
    async fn purge_expired(&self) -> Result<usize, StoreError> {
        Ok(0)
    }
}

/// Glob match supporting `*` (any run of characters) and `?` (one character)
#[must_use]
pub fn matches_pattern(pattern: &str, key: &str) -> bool {
    let p: Vec<char> = pattern.chars().collect();
    let k: Vec<char> = key.chars().collect();

    let (mut pi, mut ki) = (0, 0);
    let mut star: Option<(usize, usize)> = None;

    while ki < k.len() {
        if pi < p.len() && (p[pi] == '?' || p[pi] == k[ki]) {
            pi += 1;
            ki += 1;
        } else if pi < p.len() && p[pi] == '*' {
            star = Some((pi, ki));
            pi += 1;
        } else if let Some((star_pi, star_ki)) = star {
            pi = star_pi + 1;
            ki = star_ki + 1;
            star = Some((star_pi, star_ki + 1));
        } else {
            return false;
        }
    }

    p[pi..].iter().all(|&c| c == '*')
}

// ============================================================================
// In-memory store
// ============================================================================

/// In-process shared store honouring TTLs
#[derive(Clone, Default)]
pub struct MemoryStore {
    data: Arc<Mutex<HashMap<String, (Vec<u8>, Instant)>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live keys
    pub async fn len(&self) -> usize {
        let now = Instant::now();
        self.data
            .lock()
            .await
            .values()
            .filter(|(_, expires)| *expires > now)
            .count()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Stored keys including expired ones not yet purged
    #[cfg(test)]
    pub(crate) async fn raw_len(&self) -> usize {
        self.data.lock().await.len()
    }
}

#[async_trait]
impl SharedStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        let mut data = self.data.lock().await;
        match data.get(key) {
            Some((value, expires)) if *expires > Instant::now() => Ok(Some(value.clone())),
            Some(_) => {
                data.remove(key);
                Ok(None)
            }
            None => Ok(None),
        }
    }

    async fn set_with_ttl(
        &self,
        key: &str,
        value: Vec<u8>,
        ttl: Duration,
    ) -> Result<(), StoreError> {
        let mut data = self.data.lock().await;
        data.insert(key.to_string(), (value, super::deadline(ttl)));
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        self.data.lock().await.remove(key);
        Ok(())
    }

    async fn keys(&self, pattern: &str) -> Result<Vec<String>, StoreError> {
        let mut data = self.data.lock().await;
        let now = Instant::now();
        data.retain(|_, (_, expires)| *expires > now);
        Ok(data
            .keys()
            .filter(|k| matches_pattern(pattern, k))
            .cloned()
            .collect())
    }

    async fn purge_expired(&self) -> Result<usize, StoreError> {
        let mut data = self.data.lock().await;
        let before = data.len();
        let now = Instant::now();
        data.retain(|_, (_, expires)| *expires > now);
        Ok(before.saturating_sub(data.len()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_glob_matching() {
        assert!(matches_pattern("*", "anything"));
        assert!(matches_pattern("gateway:inference:*", "gateway:inference:abc"));
        assert!(!matches_pattern("gateway:inference:*", "gateway:retrieval:abc"));
        assert!(matches_pattern("gateway:*:abc", "gateway:embedding:abc"));
        assert!(matches_pattern("a?c", "abc"));
        assert!(!matches_pattern("a?c", "abbc"));
        assert!(matches_pattern("a*b*c", "axxbyyc"));
        assert!(!matches_pattern("", "x"));
    }

    #[tokio::test]
    async fn test_memory_store_roundtrip() {
        let store = MemoryStore::new();
        store
            .set_with_ttl("k", b"v".to_vec(), Duration::from_secs(60))
            .await
            .unwrap();
        assert_eq!(store.get("k").await.unwrap(), Some(b"v".to_vec()));

        store.delete("k").await.unwrap();
        assert_eq!(store.get("k").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_memory_store_expires() {
        let store = MemoryStore::new();
        store
            .set_with_ttl("k", b"v".to_vec(), Duration::from_millis(20))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(40)).await;

        assert_eq!(store.get("k").await.unwrap(), None);
        assert!(store.keys("*").await.unwrap().is_empty());
    }
}
