//! Redis-backed shared tier
//!
//! Keys are written with `SET .. EX` so Redis expires them itself; pattern
//! lookups walk the keyspace with `SCAN` rather than `KEYS`.

use std::time::Duration;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, RedisError};

use super::shared::{SharedStore, StoreError};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
const SCAN_BATCH: usize = 200;

/// Shared store on a Redis server
#[derive(Clone)]
pub struct RedisStore {
    conn: ConnectionManager,
    url: String,
}

impl std::fmt::Debug for RedisStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisStore").field("url", &self.url).finish_non_exhaustive()
    }
}

impl RedisStore {
    /// Open a managed connection to `url` (`redis://host:port/db`)
    ///
    /// # Errors
    ///
    /// [`StoreError::Unreachable`] when the server cannot be reached within
    /// the connect timeout, [`StoreError::Operation`] for a malformed URL.
    pub async fn connect(url: &str) -> Result<Self, StoreError> {
        let client = redis::Client::open(url).map_err(store_error)?;
        let conn = tokio::time::timeout(CONNECT_TIMEOUT, ConnectionManager::new(client))
            .await
            .map_err(|_| StoreError::Unreachable(format!("connect to {url} timed out")))?
            .map_err(|e| StoreError::Unreachable(e.to_string()))?;
        tracing::info!(url = %url, "Connected to shared cache");
        Ok(Self {
            conn,
            url: url.to_string(),
        })
    }

    /// Server URL this store connected to
    pub fn url(&self) -> &str {
        &self.url
    }
}

/// Connection-level failures are `Unreachable`; everything else is a failed
/// operation
fn store_error(e: RedisError) -> StoreError {
    if e.is_connection_refusal() || e.is_io_error() || e.is_timeout() || e.is_connection_dropped() {
        StoreError::Unreachable(e.to_string())
    } else {
        StoreError::Operation(e.to_string())
    }
}

/// Whole seconds for `EX`, at least one
fn expiry_secs(ttl: Duration) -> u64 {
    let secs = ttl.as_secs() + u64::from(ttl.subsec_nanos() > 0);
    secs.max(1)
}

#[async_trait]
impl SharedStore for RedisStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        let mut conn = self.conn.clone();
        conn.get(key).await.map_err(store_error)
    }

    async fn set_with_ttl(
        &self,
        key: &str,
        value: Vec<u8>,
        ttl: Duration,
    ) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        conn.set_ex::<_, _, ()>(key, value, expiry_secs(ttl.min(super::MAX_TTL)))
            .await
            .map_err(store_error)
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        conn.del::<_, ()>(key).await.map_err(store_error)
    }

    async fn keys(&self, pattern: &str) -> Result<Vec<String>, StoreError> {
        let mut conn = self.conn.clone();
        let mut keys = Vec::new();
        let mut cursor: u64 = 0;
        loop {
            let (next, batch): (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(pattern)
                .arg("COUNT")
                .arg(SCAN_BATCH)
                .query_async(&mut conn)
                .await
                .map_err(store_error)?;
            keys.extend(batch);
            if next == 0 {
                break;
            }
            cursor = next;
        }
        // SCAN may return a key more than once
        keys.sort_unstable();
        keys.dedup();
        Ok(keys)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;

    #[test]
    fn test_error_mapping() {
        let refused = RedisError::from(io::Error::new(io::ErrorKind::ConnectionRefused, "refused"));
        assert!(matches!(store_error(refused), StoreError::Unreachable(_)));

        let reset = RedisError::from(io::Error::new(io::ErrorKind::ConnectionReset, "reset"));
        assert!(matches!(store_error(reset), StoreError::Unreachable(_)));

        let wrong_type = RedisError::from((redis::ErrorKind::TypeError, "not a string"));
        assert!(matches!(store_error(wrong_type), StoreError::Operation(_)));
    }

    #[test]
    fn test_expiry_rounds_up() {
        assert_eq!(expiry_secs(Duration::from_secs(30)), 30);
        assert_eq!(expiry_secs(Duration::from_millis(1_500)), 2);
        assert_eq!(expiry_secs(Duration::ZERO), 1);
    }

    #[tokio::test]
    async fn test_malformed_url_is_rejected() {
        let err = RedisStore::connect("not-a-url").await.unwrap_err();
        assert!(matches!(err, StoreError::Operation(_)));
    }

    #[tokio::test]
    async fn test_closed_port_is_unreachable() {
        // Port 1 is never a Redis server
        let err = RedisStore::connect("redis://127.0.0.1:1/").await.unwrap_err();
        assert!(matches!(err, StoreError::Unreachable(_)));
    }
}
