//! Cache store port: TTL key/value, atomic `set-if-absent`, rate
//! limiting, prefix invalidation, and pub/sub channels.
//!
//! The in-process implementation backs hermetic runs and tests. The
//! production deployment points the same port at a shared cache; the
//! pipeline only ever touches the operations below.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use tokio::sync::broadcast;

use crate::error::LatticeResult;

/// Port over the cache backend.
#[async_trait]
pub trait CacheStore: Send + Sync {
    /// Fetch a value if present and unexpired.
    async fn get(&self, key: &str) -> LatticeResult<Option<String>>;

    /// Set a value with a TTL.
    async fn set(&self, key: &str, value: &str, ttl: Duration) -> LatticeResult<()>;

    /// Atomically set a value only if the key is absent. Returns whether
    /// the write happened; this is the primitive behind distributed locks.
    async fn set_if_absent(&self, key: &str, value: &str, ttl: Duration) -> LatticeResult<bool>;

    /// Remove a key.
    async fn invalidate(&self, key: &str) -> LatticeResult<()>;

    /// Remove every key with the given prefix via a non-blocking cursor
    /// sweep. Returns the number removed.
    async fn invalidate_by_prefix(&self, prefix: &str) -> LatticeResult<usize>;

    /// Sliding-window rate limit: returns true if the call is allowed.
    async fn rate_limit(&self, key: &str, limit: u32, window: Duration) -> LatticeResult<bool>;

    /// Publish a message on a channel.
    async fn publish(&self, channel: &str, message: &str) -> LatticeResult<()>;

    /// Subscribe to a channel (test observability and local consumers).
    fn subscribe(&self, channel: &str) -> broadcast::Receiver<String>;
}

// ---------------------------------------------------------------------------
// Distributed lock
// ---------------------------------------------------------------------------

/// TTL on workspace locks; a crashed holder frees the lock within this
/// window.
const LOCK_TTL: Duration = Duration::from_secs(30);
/// Acquisition retries.
const LOCK_RETRIES: u32 = 3;
/// Delay between acquisition retries.
const LOCK_RETRY_DELAY: Duration = Duration::from_millis(200);

/// A cache-backed distributed lock acquired via atomic `set-if-absent`.
///
/// Release explicitly on the happy path; the drop guard spawns a
/// best-effort release for early exits and unwinds.
pub struct DistributedLock {
    cache: std::sync::Arc<dyn CacheStore>,
    key: String,
    released: bool,
}

impl DistributedLock {
    /// Try to acquire `key`, retrying a few times. Returns `None` when
    /// another holder keeps the lock through every retry.
    pub async fn acquire(
        cache: std::sync::Arc<dyn CacheStore>,
        key: &str,
        owner: &str,
    ) -> crate::error::LatticeResult<Option<Self>> {
        for attempt in 0..=LOCK_RETRIES {
            if cache.set_if_absent(key, owner, LOCK_TTL).await? {
                return Ok(Some(Self {
                    cache,
                    key: key.to_string(),
                    released: false,
                }));
            }
            if attempt < LOCK_RETRIES {
                tokio::time::sleep(LOCK_RETRY_DELAY).await;
            }
        }
        Ok(None)
    }

    /// Release the lock.
    pub async fn release(mut self) -> crate::error::LatticeResult<()> {
        self.released = true;
        self.cache.invalidate(&self.key).await
    }
}

impl Drop for DistributedLock {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        // Unwind path: release asynchronously; the TTL is the backstop
        // when no runtime is available.
        let cache = self.cache.clone();
        let key = self.key.clone();
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            handle.spawn(async move {
                let _ = cache.invalidate(&key).await;
            });
        }
    }
}

// ---------------------------------------------------------------------------
// In-process implementation
// ---------------------------------------------------------------------------

struct Entry {
    value: String,
    expires_at: Instant,
}

/// In-process cache with TTL semantics and broadcast channels.
pub struct MemoryCacheStore {
    entries: RwLock<HashMap<String, Entry>>,
    windows: Mutex<HashMap<String, Vec<Instant>>>,
    channels: Mutex<HashMap<String, broadcast::Sender<String>>>,
}

impl Default for MemoryCacheStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryCacheStore {
    /// Create an empty cache.
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            windows: Mutex::new(HashMap::new()),
            channels: Mutex::new(HashMap::new()),
        }
    }

    fn channel(&self, name: &str) -> broadcast::Sender<String> {
        let mut channels = self.channels.lock();
        channels
            .entry(name.to_string())
            .or_insert_with(|| broadcast::channel(256).0)
            .clone()
    }

    fn live_value(entry: &Entry) -> Option<String> {
        (entry.expires_at > Instant::now()).then(|| entry.value.clone())
    }
}

#[async_trait]
impl CacheStore for MemoryCacheStore {
    async fn get(&self, key: &str) -> LatticeResult<Option<String>> {
        Ok(self.entries.read().get(key).and_then(Self::live_value))
    }

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> LatticeResult<()> {
        self.entries.write().insert(
            key.to_string(),
            Entry {
                value: value.to_string(),
                expires_at: Instant::now() + ttl,
            },
        );
        Ok(())
    }

    async fn set_if_absent(&self, key: &str, value: &str, ttl: Duration) -> LatticeResult<bool> {
        let mut entries = self.entries.write();
        let live = entries.get(key).and_then(Self::live_value).is_some();
        if live {
            return Ok(false);
        }
        entries.insert(
            key.to_string(),
            Entry {
                value: value.to_string(),
                expires_at: Instant::now() + ttl,
            },
        );
        Ok(true)
    }

    async fn invalidate(&self, key: &str) -> LatticeResult<()> {
        self.entries.write().remove(key);
        Ok(())
    }

    async fn invalidate_by_prefix(&self, prefix: &str) -> LatticeResult<usize> {
        let mut entries = self.entries.write();
        let before = entries.len();
        entries.retain(|key, _| !key.starts_with(prefix));
        Ok(before - entries.len())
    }

    async fn rate_limit(&self, key: &str, limit: u32, window: Duration) -> LatticeResult<bool> {
        let now = Instant::now();
        let mut windows = self.windows.lock();
        let hits = windows.entry(key.to_string()).or_default();
        hits.retain(|t| now.duration_since(*t) < window);
        if hits.len() >= limit as usize {
            return Ok(false);
        }
        hits.push(now);
        Ok(true)
    }

    async fn publish(&self, channel: &str, message: &str) -> LatticeResult<()> {
        // A send error just means no subscriber is listening.
        let _ = self.channel(channel).send(message.to_string());
        Ok(())
    }

    fn subscribe(&self, channel: &str) -> broadcast::Receiver<String> {
        self.channel(channel).subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_set_get_roundtrip() {
        let cache = MemoryCacheStore::new();
        cache
            .set("k", "v", Duration::from_secs(60))
            .await
            .expect("set");
        assert_eq!(cache.get("k").await.expect("get"), Some("v".into()));
        assert_eq!(cache.get("missing").await.expect("get"), None);
    }

    #[tokio::test]
    async fn test_ttl_expiry() {
        let cache = MemoryCacheStore::new();
        cache
            .set("k", "v", Duration::from_millis(10))
            .await
            .expect("set");
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(cache.get("k").await.expect("get"), None);
    }

    #[tokio::test]
    async fn test_set_if_absent_is_atomic_lock_primitive() {
        let cache = MemoryCacheStore::new();
        assert!(cache
            .set_if_absent("lock:workspace:u:r:main", "owner-1", Duration::from_secs(30))
            .await
            .expect("first acquire"));
        assert!(!cache
            .set_if_absent("lock:workspace:u:r:main", "owner-2", Duration::from_secs(30))
            .await
            .expect("second acquire"));
        cache.invalidate("lock:workspace:u:r:main").await.expect("release");
        assert!(cache
            .set_if_absent("lock:workspace:u:r:main", "owner-2", Duration::from_secs(30))
            .await
            .expect("reacquire"));
    }

    #[tokio::test]
    async fn test_prefix_invalidation() {
        let cache = MemoryCacheStore::new();
        for key in ["graph:o:r:a", "graph:o:r:b", "other:o:r"] {
            cache.set(key, "v", Duration::from_secs(60)).await.expect("set");
        }
        let removed = cache.invalidate_by_prefix("graph:o:r:").await.expect("sweep");
        assert_eq!(removed, 2);
        assert!(cache.get("other:o:r").await.expect("get").is_some());
    }

    #[tokio::test]
    async fn test_rate_limit_window() {
        let cache = MemoryCacheStore::new();
        assert!(cache
            .rate_limit("reindex:o:r", 1, Duration::from_secs(3600))
            .await
            .expect("first"));
        assert!(!cache
            .rate_limit("reindex:o:r", 1, Duration::from_secs(3600))
            .await
            .expect("second"));
    }

    #[tokio::test]
    async fn test_distributed_lock_contention_and_release() {
        let cache: std::sync::Arc<dyn CacheStore> = std::sync::Arc::new(MemoryCacheStore::new());
        let lock = DistributedLock::acquire(cache.clone(), "lock:workspace:o:r:main", "run-1")
            .await
            .expect("acquire")
            .expect("lock granted");

        // Contender fails through its retries.
        let contender = DistributedLock::acquire(cache.clone(), "lock:workspace:o:r:main", "run-2")
            .await
            .expect("acquire call");
        assert!(contender.is_none());

        lock.release().await.expect("release");
        let after = DistributedLock::acquire(cache, "lock:workspace:o:r:main", "run-2")
            .await
            .expect("acquire")
            .expect("granted after release");
        after.release().await.expect("release");
    }

    #[tokio::test]
    async fn test_publish_subscribe() {
        let cache = MemoryCacheStore::new();
        let mut rx = cache.subscribe("pipeline-logs:r1");
        cache
            .publish("pipeline-logs:r1", "{\"step\":\"prepare\"}")
            .await
            .expect("publish");
        let received = rx.recv().await.expect("recv");
        assert!(received.contains("prepare"));
    }
}
