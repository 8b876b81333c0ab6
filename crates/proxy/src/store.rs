//! Key-value stores backing the response cache

use crate::error::{ProxyError, Result};
use async_trait::async_trait;
use dashmap::DashMap;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};
use tokio::sync::OnceCell;
use tracing::{debug, info};

/// String key-value store used by the cache manager.
///
/// An unreachable store reports `ProxyError::CacheUnavailable`.
#[async_trait]
pub trait CacheStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>>;
    async fn put(&self, key: &str, value: String) -> Result<()>;
}

#[derive(Debug)]
struct StoredValue {
    value: String,
    stored_at: Instant,
}

/// In-process store with a bound on total size.
///
/// When full, the oldest entries are evicted first, freeing an extra 10% of
/// capacity so eviction does not run on every insert.
#[derive(Debug)]
pub struct MemoryStore {
    entries: DashMap<String, StoredValue>,
    max_entry_size: usize,
    max_size: usize,
    current_size: AtomicUsize,
}

impl MemoryStore {
    pub fn new(max_entry_size: usize, max_size: usize) -> Self {
        Self {
            entries: DashMap::new(),
            max_entry_size,
            max_size,
            current_size: AtomicUsize::new(0),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Approximate number of bytes held
    pub fn size(&self) -> usize {
        self.current_size.load(Ordering::Relaxed)
    }

    fn entry_size(key: &str, value: &str) -> usize {
        key.len() + value.len()
    }

    /// Subtract without wrapping below zero
    fn release(&self, bytes: usize) {
        let _ = self
            .current_size
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |current| {
                Some(current.saturating_sub(bytes))
            });
    }

    fn maybe_evict(&self, needed: usize) {
        let wanted = self.current_size.load(Ordering::Relaxed).saturating_add(needed);
        if wanted <= self.max_size {
            return;
        }

        let to_free = (wanted - self.max_size).saturating_add(self.max_size / 10);
        let mut freed = 0usize;

        let mut by_age: Vec<(String, Instant)> = self
            .entries
            .iter()
            .map(|e| (e.key().clone(), e.value().stored_at))
            .collect();
        by_age.sort_by_key(|(_, stored_at)| *stored_at);

        for (key, _) in by_age {
            if freed >= to_free {
                break;
            }
            if let Some((k, old)) = self.entries.remove(&key) {
                let size = Self::entry_size(&k, &old.value);
                self.release(size);
                freed += size;
            }
        }

        debug!(freed, "Evicted cache entries");
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new(10 * 1024 * 1024, 100 * 1024 * 1024)
    }
}

#[async_trait]
impl CacheStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.entries.get(key).map(|e| e.value.clone()))
    }

    async fn put(&self, key: &str, value: String) -> Result<()> {
        let size = Self::entry_size(key, &value);
        if size > self.max_entry_size {
            return Err(ProxyError::CacheUnavailable(format!(
                "entry of {} bytes exceeds limit of {} bytes",
                size, self.max_entry_size
            )));
        }

        // Evict old entries if needed
        self.maybe_evict(size);

        // Account before inserting so a concurrent release never underflows
        self.current_size.fetch_add(size, Ordering::Relaxed);
        let replaced = self.entries.insert(
            key.to_string(),
            StoredValue {
                value,
                stored_at: Instant::now(),
            },
        );
        if let Some(old) = replaced {
            self.release(Self::entry_size(key, &old.value));
        }
        Ok(())
    }
}

/// Store backed by a Redis server.
///
/// The connection is opened on first use and re-established by the
/// connection manager after failures. Every operation is bounded by
/// `timeout`; connection errors and timeouts surface as
/// `ProxyError::CacheUnavailable`.
pub struct RedisStore {
    client: redis::Client,
    connection: OnceCell<ConnectionManager>,
    timeout: Duration,
}

impl RedisStore {
    pub fn new(url: &str, timeout: Duration) -> Result<Self> {
        let client = redis::Client::open(url)
            .map_err(|e| ProxyError::CacheUnavailable(format!("invalid redis url: {}", e)))?;
        Ok(Self {
            client,
            connection: OnceCell::new(),
            timeout,
        })
    }

    async fn connection(&self) -> redis::RedisResult<ConnectionManager> {
        let manager = self
            .connection
            .get_or_try_init(|| async {
                let manager = ConnectionManager::new(self.client.clone()).await?;
                info!(
                    addr = ?self.client.get_connection_info().addr,
                    "Connected to redis cache"
                );
                Ok::<_, redis::RedisError>(manager)
            })
            .await?;
        Ok(manager.clone())
    }

    async fn bounded<T, F>(&self, op: &str, fut: F) -> Result<T>
    where
        F: Future<Output = redis::RedisResult<T>>,
    {
        match tokio::time::timeout(self.timeout, fut).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => Err(ProxyError::CacheUnavailable(format!("redis {}: {}", op, e))),
            Err(_) => Err(ProxyError::CacheUnavailable(format!(
                "redis {} timed out after {:?}",
                op, self.timeout
            ))),
        }
    }
}

#[async_trait]
impl CacheStore for RedisStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        self.bounded("get", async {
            let mut con = self.connection().await?;
            con.get::<_, Option<String>>(key).await
        })
        .await
    }

    async fn put(&self, key: &str, value: String) -> Result<()> {
        self.bounded("set", async {
            let mut con = self.connection().await?;
            con.set::<_, _, ()>(key, value).await
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_put_and_get() {
        let store = MemoryStore::default();
        assert_eq!(store.get("k").await.unwrap(), None);

        store.put("k", "v1".to_string()).await.unwrap();
        assert_eq!(store.get("k").await.unwrap().as_deref(), Some("v1"));
        assert_eq!(store.size(), 3);
    }

    #[tokio::test]
    async fn test_put_overwrites() {
        let store = MemoryStore::default();
        store.put("k", "first".to_string()).await.unwrap();
        store.put("k", "second".to_string()).await.unwrap();

        assert_eq!(store.get("k").await.unwrap().as_deref(), Some("second"));
        assert_eq!(store.len(), 1);
        assert_eq!(store.size(), "k".len() + "second".len());
    }

    #[tokio::test]
    async fn test_oversized_entry_rejected() {
        let store = MemoryStore::new(8, 1024);
        let result = store.put("key", "too large value".to_string()).await;
        assert!(matches!(result, Err(ProxyError::CacheUnavailable(_))));
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_evicts_oldest_first() {
        // Each entry is 2 + 8 = 10 bytes; room for three
        let store = MemoryStore::new(100, 30);
        store.put("k1", "aaaaaaaa".to_string()).await.unwrap();
        std::thread::sleep(std::time::Duration::from_millis(2));
        store.put("k2", "bbbbbbbb".to_string()).await.unwrap();
        std::thread::sleep(std::time::Duration::from_millis(2));
        store.put("k3", "cccccccc".to_string()).await.unwrap();
        std::thread::sleep(std::time::Duration::from_millis(2));
        store.put("k4", "dddddddd".to_string()).await.unwrap();

        assert_eq!(store.get("k1").await.unwrap(), None);
        assert_eq!(store.get("k4").await.unwrap().as_deref(), Some("dddddddd"));
        assert!(store.size() <= 30);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_puts_same_key_keep_size_exact() {
        let store = std::sync::Arc::new(MemoryStore::default());

        let mut handles = Vec::new();
        for task in 0..16 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                for i in 0..200 {
                    // Values of varying length so a lost subtraction shows up
                    let value = "x".repeat(1 + (task * 7 + i) % 13);
                    store.put("shared", value).await.unwrap();
                }
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        let value = store.get("shared").await.unwrap().unwrap();
        assert_eq!(store.len(), 1);
        assert_eq!(store.size(), "shared".len() + value.len());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_puts_with_eviction_stay_bounded() {
        let store = std::sync::Arc::new(MemoryStore::new(64, 200));

        let mut handles = Vec::new();
        for task in 0..8 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                for i in 0..100 {
                    let key = format!("k{}", (task * 31 + i) % 40);
                    store.put(&key, "v".repeat(10)).await.unwrap();
                }
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        let actual: usize = store
            .entries
            .iter()
            .map(|e| MemoryStore::entry_size(e.key(), &e.value().value))
            .sum();
        assert_eq!(store.size(), actual);
        assert!(store.size() < usize::MAX / 2);
    }

    fn closed_port_url() -> String {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);
        format!("redis://127.0.0.1:{}/", port)
    }

    #[test]
    fn test_redis_invalid_url() {
        let result = RedisStore::new("not a url", Duration::from_millis(100));
        assert!(matches!(result, Err(ProxyError::CacheUnavailable(_))));
    }

    #[tokio::test]
    async fn test_redis_unreachable_is_cache_unavailable() {
        let store = RedisStore::new(&closed_port_url(), Duration::from_millis(300)).unwrap();

        let get = store.get("k").await;
        assert!(matches!(get, Err(ProxyError::CacheUnavailable(_))), "{:?}", get);

        let put = store.put("k", "v".to_string()).await;
        assert!(matches!(put, Err(ProxyError::CacheUnavailable(_))), "{:?}", put);
    }
}
