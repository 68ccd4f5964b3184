//! Local cache tier
//!
//! A size-bounded map evicting in insertion order. Reads use `peek` so a hit
//! never refreshes an entry's position; overwrites remove the old entry first
//! so the key moves to the newest slot.

use std::num::NonZeroUsize;
use std::time::Instant;

use lru::LruCache;
use parking_lot::Mutex;

use super::shared::matches_pattern;

#[derive(Debug, Clone)]
struct LocalEntry {
    payload: Vec<u8>,
    expires_at: Instant,
}

impl LocalEntry {
    fn is_expired(&self, now: Instant) -> bool {
        now >= self.expires_at
    }
}

/// In-process tier with oldest-insertion eviction
#[derive(Debug)]
pub struct LocalTier {
    entries: Mutex<LruCache<String, LocalEntry>>,
}

impl LocalTier {
    /// Create a tier holding at most `capacity` entries (minimum 1)
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            entries: Mutex::new(LruCache::new(capacity)),
        }
    }

    /// Fetch a live entry; expired entries are removed and reported as absent
    pub fn get(&self, key: &str) -> Option<Vec<u8>> {
        let mut entries = self.entries.lock();
        let now = Instant::now();
        match entries.peek(key) {
            Some(entry) if !entry.is_expired(now) => Some(entry.payload.clone()),
            Some(_) => {
                entries.pop(key);
                None
            }
            None => None,
        }
    }

    /// Insert an entry; returns true when another key was evicted
    pub fn put(&self, key: String, payload: Vec<u8>, expires_at: Instant) -> bool {
        let mut entries = self.entries.lock();
        entries.pop(&key);
        let evicted = entries.push(key, LocalEntry { payload, expires_at });
        evicted.is_some()
    }

    pub fn remove(&self, key: &str) -> bool {
        self.entries.lock().pop(key).is_some()
    }

    /// Remove every key matching a glob pattern
    pub fn remove_matching(&self, pattern: &str) -> usize {
        let mut entries = self.entries.lock();
        let doomed: Vec<String> = entries
            .iter()
            .filter(|(k, _)| matches_pattern(pattern, k))
            .map(|(k, _)| k.clone())
            .collect();
        for key in &doomed {
            entries.pop(key);
        }
        doomed.len()
    }

    /// Drop every expired entry
    pub fn purge_expired(&self) -> usize {
        let mut entries = self.entries.lock();
        let now = Instant::now();
        let expired: Vec<String> = entries
            .iter()
            .filter(|(_, e)| e.is_expired(now))
            .map(|(k, _)| k.clone())
            .collect();
        for key in &expired {
            entries.pop(key);
        }
        expired.len()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
