//! Two-Tier Distributed Cache
//!
//! ```text
//!   get ──▶ LocalTier ──hit──▶ value
//!              │ miss
//!              ▼
//!           SharedStore ──hit──▶ populate local (remaining TTL) ──▶ value
//!              │ miss / unavailable
//!              ▼
//!             None
//! ```
//!
//! Each [`CacheClass`] is a separate keyspace with its own default TTL.
//! Shared-tier entries carry their absolute expiry so a shared hit never
//! outlives the original TTL when copied into the local tier. Shared-tier
//! failures are logged as `CacheUnavailable` and the cache continues on the
//! local tier alone.
//!
//! The shared tier is Redis ([`RedisStore`]) when `cache.shared_url` is set
//! and the in-process [`MemoryStore`] otherwise.

mod fingerprint;
mod local;
mod remote;
mod shared;

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::GatewayError;

pub use fingerprint::{fingerprint, retrieval_key};
pub use local::LocalTier;
pub use remote::RedisStore;
pub use shared::{matches_pattern, MemoryStore, SharedStore, StoreError};

// ============================================================================
// Classes and Configuration
// ============================================================================

/// Longest TTL any entry may carry; longer requests are clamped
pub const MAX_TTL: Duration = Duration::from_secs(30 * 24 * 60 * 60);

/// Expiry instant for a TTL, clamped to [`MAX_TTL`]
pub(crate) fn deadline(ttl: Duration) -> Instant {
    let now = Instant::now();
    now.checked_add(ttl.min(MAX_TTL)).unwrap_or(now)
}

/// Data class, each with its own keyspace and TTL
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheClass {
    /// Inference responses
    Inference,
    /// Retrieval/context search results
    Retrieval,
    /// Embedding vectors
    Embedding,
}

impl CacheClass {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Inference => "inference",
            Self::Retrieval => "retrieval",
            Self::Embedding => "embedding",
        }
    }
}

impl fmt::Display for CacheClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Cache configuration
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Key namespace prefix
    pub namespace: String,
    /// Local tier capacity (entries, all classes)
    pub local_capacity: usize,
    /// TTL for inference responses (seconds)
    pub inference_ttl_secs: u64,
    /// TTL for retrieval results (seconds)
    pub retrieval_ttl_secs: u64,
    /// TTL for embeddings (seconds)
    pub embedding_ttl_secs: u64,
    /// Redis URL for the shared tier; the in-process store is used when unset
    #[serde(skip_serializing_if = "Option::is_none")]
    pub shared_url: Option<String>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            namespace: "gateway".to_string(),
            local_capacity: 1000,
            inference_ttl_secs: 30 * 60,
            retrieval_ttl_secs: 60 * 60,
            embedding_ttl_secs: 24 * 60 * 60,
            shared_url: None,
        }
    }
}

impl CacheConfig {
    /// Default TTL for a class
    #[must_use]
    pub fn ttl(&self, class: CacheClass) -> Duration {
        Duration::from_secs(match class {
            CacheClass::Inference => self.inference_ttl_secs,
            CacheClass::Retrieval => self.retrieval_ttl_secs,
            CacheClass::Embedding => self.embedding_ttl_secs,
        })
    }
}

/// Shared-tier envelope carrying the absolute expiry
#[derive(Serialize, Deserialize)]
struct Envelope<T> {
    expires_at_ms: i64,
    value: T,
}

// ============================================================================
// Statistics
// ============================================================================

#[derive(Debug, Default)]
struct StatsAtomic {
    local_hits: AtomicU64,
    shared_hits: AtomicU64,
    misses: AtomicU64,
    shared_errors: AtomicU64,
    evictions: AtomicU64,
    writes: AtomicU64,
}

/// Cache counters
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheStats {
    pub local_hits: u64,
    pub shared_hits: u64,
    pub misses: u64,
    pub shared_errors: u64,
    pub evictions: u64,
    pub writes: u64,
    pub local_entries: usize,
}

// ============================================================================
// DistributedCache
// ============================================================================

/// Local + shared cache
pub struct DistributedCache {
    config: CacheConfig,
    local: LocalTier,
    shared: Arc<dyn SharedStore>,
    stats: StatsAtomic,
}

impl fmt::Debug for DistributedCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DistributedCache")
            .field("config", &self.config)
            .field("local_entries", &self.local.len())
            .finish_non_exhaustive()
    }
}

impl DistributedCache {
    /// Create a cache over a shared store
    pub fn new(config: CacheConfig, shared: Arc<dyn SharedStore>) -> Self {
        Self {
            local: LocalTier::new(config.local_capacity),
            config,
            shared,
            stats: StatsAtomic::default(),
        }
    }

    /// Create a cache backed by an in-process shared store
    pub fn in_memory(config: CacheConfig) -> Self {
        Self::new(config, Arc::new(MemoryStore::new()))
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    fn full_key(&self, class: CacheClass, key: &str) -> String {
        format!("{}:{}:{}", self.config.namespace, class, key)
    }

    fn shared_failed(&self, op: &'static str, key: &str, err: StoreError) {
        self.stats.shared_errors.fetch_add(1, Ordering::Relaxed);
        let err = GatewayError::from(err);
        tracing::warn!(op, key, error = %err, "Shared cache tier failed, using local tier only");
    }

    /// Look up a value
    pub async fn get<T>(&self, class: CacheClass, key: &str) -> Option<T>
    where
        T: Serialize + DeserializeOwned,
    {
        let full_key = self.full_key(class, key);

        if let Some(bytes) = self.local.get(&full_key) {
            match serde_json::from_slice(&bytes) {
                Ok(value) => {
                    self.stats.local_hits.fetch_add(1, Ordering::Relaxed);
                    return Some(value);
                }
                Err(e) => {
                    tracing::debug!(key = %full_key, error = %e, "Dropping undecodable local entry");
                    self.local.remove(&full_key);
                }
            }
        }

        let bytes = match self.shared.get(&full_key).await {
            Ok(Some(bytes)) => bytes,
            Ok(None) => {
                self.stats.misses.fetch_add(1, Ordering::Relaxed);
                return None;
            }
            Err(e) => {
                self.shared_failed("get", &full_key, e);
                self.stats.misses.fetch_add(1, Ordering::Relaxed);
                return None;
            }
        };

        let Ok(envelope) = serde_json::from_slice::<Envelope<T>>(&bytes) else {
            tracing::debug!(key = %full_key, "Ignoring undecodable shared entry");
            self.stats.misses.fetch_add(1, Ordering::Relaxed);
            return None;
        };

        let remaining_ms = envelope.expires_at_ms - Utc::now().timestamp_millis();
        let Ok(remaining_ms) = u64::try_from(remaining_ms) else {
            self.stats.misses.fetch_add(1, Ordering::Relaxed);
            return None;
        };
        if remaining_ms == 0 {
            self.stats.misses.fetch_add(1, Ordering::Relaxed);
            return None;
        }

        if let Ok(payload) = serde_json::to_vec(&envelope.value) {
            let expires_at = deadline(Duration::from_millis(remaining_ms));
            if self.local.put(full_key, payload, expires_at) {
                self.stats.evictions.fetch_add(1, Ordering::Relaxed);
            }
        }
        self.stats.shared_hits.fetch_add(1, Ordering::Relaxed);
        Some(envelope.value)
    }

    /// Store a value with the class default TTL
    pub async fn set<T: Serialize>(&self, class: CacheClass, key: &str, value: &T) {
        self.set_with_ttl(class, key, value, self.config.ttl(class)).await;
    }

    /// Store a value in both tiers with an explicit TTL
    pub async fn set_with_ttl<T: Serialize>(
        &self,
        class: CacheClass,
        key: &str,
        value: &T,
        ttl: Duration,
    ) {
        let ttl = ttl.min(MAX_TTL);
        let full_key = self.full_key(class, key);
        let payload = match serde_json::to_vec(value) {
            Ok(p) => p,
            Err(e) => {
                tracing::warn!(key = %full_key, error = %e, "Value not serializable, not cached");
                return;
            }
        };

        if self.local.put(full_key.clone(), payload, deadline(ttl)) {
            self.stats.evictions.fetch_add(1, Ordering::Relaxed);
        }
        self.stats.writes.fetch_add(1, Ordering::Relaxed);

        let ttl_ms = i64::try_from(ttl.as_millis()).unwrap_or(i64::MAX);
        let envelope = Envelope {
            expires_at_ms: Utc::now().timestamp_millis().saturating_add(ttl_ms),
            value,
        };
        let Ok(bytes) = serde_json::to_vec(&envelope) else {
            return;
        };
        if let Err(e) = self.shared.set_with_ttl(&full_key, bytes, ttl).await {
            self.shared_failed("set", &full_key, e);
        }
    }

    /// Remove a key from both tiers
    pub async fn delete(&self, class: CacheClass, key: &str) {
        let full_key = self.full_key(class, key);
        self.local.remove(&full_key);
        if let Err(e) = self.shared.delete(&full_key).await {
            self.shared_failed("delete", &full_key, e);
        }
    }

    /// Remove keys matching `pattern` within a class, or across every class
    /// when `class` is `None`. Returns the number of keys removed.
    pub async fn clear(&self, class: Option<CacheClass>, pattern: &str) -> usize {
        let full_pattern = match class {
            Some(class) => self.full_key(class, pattern),
            None => format!("{}:*:{}", self.config.namespace, pattern),
        };

        let mut removed = self.local.remove_matching(&full_pattern);

        match self.shared.keys(&full_pattern).await {
            Ok(keys) => {
                for key in keys {
                    match self.shared.delete(&key).await {
                        Ok(()) => removed += 1,
                        Err(e) => self.shared_failed("delete", &key, e),
                    }
                }
            }
            Err(e) => self.shared_failed("keys", &full_pattern, e),
        }

        removed
    }

    /// Drop expired entries from both tiers
    pub async fn purge_expired(&self) -> usize {
        let mut purged = self.local.purge_expired();
        match self.shared.purge_expired().await {
            Ok(n) => purged += n,
            Err(e) => self.shared_failed("purge", &self.config.namespace, e),
        }
        purged
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            local_hits: self.stats.local_hits.load(Ordering::Relaxed),
            shared_hits: self.stats.shared_hits.load(Ordering::Relaxed),
            misses: self.stats.misses.load(Ordering::Relaxed),
            shared_errors: self.stats.shared_errors.load(Ordering::Relaxed),
            evictions: self.stats.evictions.load(Ordering::Relaxed),
            writes: self.stats.writes.load(Ordering::Relaxed),
            local_entries: self.local.len(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;

    /// Store that is always down
    struct DownStore;

    #[async_trait]
    impl SharedStore for DownStore {
        async fn get(&self, _key: &str) -> Result<Option<Vec<u8>>, StoreError> {
            Err(StoreError::Unreachable("connection refused".into()))
        }
        async fn set_with_ttl(&self, _k: &str, _v: Vec<u8>, _t: Duration) -> Result<(), StoreError> {
            Err(StoreError::Unreachable("connection refused".into()))
        }
        async fn delete(&self, _key: &str) -> Result<(), StoreError> {
            Err(StoreError::Unreachable("connection refused".into()))
        }
        async fn keys(&self, _pattern: &str) -> Result<Vec<String>, StoreError> {
            Err(StoreError::Unreachable("connection refused".into()))
        }
    }

    fn config() -> CacheConfig {
        CacheConfig {
            local_capacity: 16,
            ..CacheConfig::default()
        }
    }

    #[tokio::test]
    async fn test_set_then_get_hits_local() {
        let cache = DistributedCache::in_memory(config());
        cache.set(CacheClass::Inference, "k", &"hello".to_string()).await;

        let value: Option<String> = cache.get(CacheClass::Inference, "k").await;
        assert_eq!(value.as_deref(), Some("hello"));
        assert_eq!(cache.stats().local_hits, 1);
    }

    #[tokio::test]
    async fn test_classes_are_separate_keyspaces() {
        let cache = DistributedCache::in_memory(config());
        cache.set(CacheClass::Retrieval, "k", &vec!["passage".to_string()]).await;

        let other: Option<Vec<String>> = cache.get(CacheClass::Embedding, "k").await;
        assert!(other.is_none());
    }

    #[tokio::test]
    async fn test_shared_hit_populates_local() {
        let store = Arc::new(MemoryStore::new());
        let writer = DistributedCache::new(config(), store.clone());
        writer.set(CacheClass::Inference, "k", &42_u32).await;

        // Fresh process, same shared store
        let reader = DistributedCache::new(config(), store);
        let first: Option<u32> = reader.get(CacheClass::Inference, "k").await;
        let second: Option<u32> = reader.get(CacheClass::Inference, "k").await;

        assert_eq!(first, Some(42));
        assert_eq!(second, Some(42));
        let stats = reader.stats();
        assert_eq!(stats.shared_hits, 1);
        assert_eq!(stats.local_hits, 1);
    }

    #[tokio::test]
    async fn test_entry_never_returned_after_ttl() {
        let cache = DistributedCache::in_memory(config());
        cache
            .set_with_ttl(CacheClass::Inference, "k", &1_u8, Duration::from_millis(30))
            .await;
        tokio::time::sleep(Duration::from_millis(60)).await;

        let value: Option<u8> = cache.get(CacheClass::Inference, "k").await;
        assert!(value.is_none());
    }

    #[tokio::test]
    async fn test_shared_failure_degrades_to_local() {
        let cache = DistributedCache::new(config(), Arc::new(DownStore));
        cache.set(CacheClass::Inference, "k", &"v".to_string()).await;

        let hit: Option<String> = cache.get(CacheClass::Inference, "k").await;
        let miss: Option<String> = cache.get(CacheClass::Inference, "absent").await;
        cache.delete(CacheClass::Inference, "k").await;

        assert_eq!(hit.as_deref(), Some("v"));
        assert!(miss.is_none());
        assert!(cache.stats().shared_errors >= 3);
    }

    #[tokio::test]
    async fn test_clear_by_pattern() {
        let cache = DistributedCache::in_memory(config());
        cache.set(CacheClass::Inference, "a1", &1_u8).await;
        cache.set(CacheClass::Inference, "a2", &2_u8).await;
        cache.set(CacheClass::Retrieval, "a3", &3_u8).await;

        // local + shared copies
        assert_eq!(cache.clear(Some(CacheClass::Inference), "a*").await, 4);

        let gone: Option<u8> = cache.get(CacheClass::Inference, "a1").await;
        let kept: Option<u8> = cache.get(CacheClass::Retrieval, "a3").await;
        assert!(gone.is_none());
        assert_eq!(kept, Some(3));
    }

    #[test]
    fn test_default_ttls_increase_by_class() {
        let c = CacheConfig::default();
        assert!(c.ttl(CacheClass::Inference) < c.ttl(CacheClass::Retrieval));
        assert!(c.ttl(CacheClass::Retrieval) < c.ttl(CacheClass::Embedding));
    }

    #[tokio::test]
    async fn test_oversized_ttl_is_clamped() {
        let cache = DistributedCache::in_memory(CacheConfig {
            inference_ttl_secs: u64::MAX,
            ..config()
        });
        cache.set(CacheClass::Inference, "k", &7_u8).await;
        cache
            .set_with_ttl(CacheClass::Retrieval, "k", &8_u8, Duration::MAX)
            .await;

        let a: Option<u8> = cache.get(CacheClass::Inference, "k").await;
        let b: Option<u8> = cache.get(CacheClass::Retrieval, "k").await;
        assert_eq!(a, Some(7));
        assert_eq!(b, Some(8));
    }

    #[tokio::test]
    async fn test_purge_reaches_shared_tier() {
        let store = Arc::new(MemoryStore::new());
        let cache = DistributedCache::new(config(), store.clone());
        for i in 0..50 {
            cache
                .set_with_ttl(CacheClass::Inference, &format!("k{i}"), &i, Duration::from_millis(1))
                .await;
        }
        cache.set(CacheClass::Inference, "live", &1_u8).await;
        tokio::time::sleep(Duration::from_millis(20)).await;

        // 16 local slots hold the newest entries; the shared map holds all 51
        let purged = cache.purge_expired().await;
        assert_eq!(purged, 15 + 50);
        assert_eq!(store.raw_len().await, 1);
    }
}
