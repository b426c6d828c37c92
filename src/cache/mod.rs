//! Read-through cache used by the polling-station lookups.
//!
//! [`CacheService`] owns the key namespace and the JSON entry encoding; the
//! actual key-value storage sits behind [`CacheBackend`] so an in-process map
//! and Redis can be swapped by configuration. The cache is best-effort: a
//! backend that cannot be read or written degrades to calling the computation
//! every time, it never fails a lookup.

mod memory;
mod redis_cache;

pub use memory::MemoryCache;
pub use redis_cache::RedisCache;

use crate::config::CacheConfig;
use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::fmt::{self, Debug};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Key-value storage for encoded cache entries.
#[async_trait]
pub trait CacheBackend: Debug + Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>>;

    /// Store `value` under `key`. A zero `ttl` means the entry does not expire.
    async fn set(&self, key: &str, value: String, ttl: Duration) -> Result<()>;

    async fn delete(&self, key: &str) -> Result<()>;

    /// Remove every key starting with `prefix`. Returns how many were removed.
    async fn delete_prefix(&self, prefix: &str) -> Result<u64>;
}

/// Wrapper around cached data with the time it was computed.
#[derive(Debug, Serialize, Deserialize)]
struct CachedEntry<T> {
    data: T,
    cached_at: DateTime<Utc>,
}

/// URL-encode a key segment so user-supplied values cannot collide with separators.
pub fn encode_key_segment(s: &str) -> String {
    urlencoding::encode(s).into_owned()
}

/// Namespaced get-or-compute cache over a [`CacheBackend`].
#[derive(Clone)]
pub struct CacheService {
    backend: Arc<dyn CacheBackend>,
    config: CacheConfig,
}

impl Debug for CacheService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CacheService")
            .field("backend", &self.backend)
            .field("key_prefix", &self.config.key_prefix)
            .field("ttl_secs", &self.config.ttl_secs)
            .finish()
    }
}

impl CacheService {
    pub fn new(backend: Arc<dyn CacheBackend>, config: CacheConfig) -> Self {
        Self { backend, config }
    }

    /// In-process cache with the given settings.
    pub fn in_memory(config: CacheConfig) -> Self {
        Self::new(Arc::new(MemoryCache::new()), config)
    }

    /// Build the backend named by the config: Redis when `redis_url` is set,
    /// otherwise the in-process map.
    pub async fn from_config(config: &CacheConfig) -> Result<Self> {
        let backend: Arc<dyn CacheBackend> = match &config.redis_url {
            Some(url) => Arc::new(RedisCache::connect(url).await?),
            None => Arc::new(MemoryCache::new()),
        };
        Ok(Self::new(backend, config.clone()))
    }

    fn namespaced(&self, key: &str) -> String {
        format!("{}{}", self.config.key_prefix, key)
    }

    fn ttl(&self) -> Duration {
        Duration::from_secs(self.config.ttl_secs)
    }

    /// Return the value cached under `key`, or run `compute`, cache its result
    /// and return it. Errors from `compute` are returned as-is and nothing is
    /// cached for them.
    pub async fn get_or_compute<T, E, F, Fut>(&self, key: &str, compute: F) -> Result<T, E>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let key = self.namespaced(key);

        match self.backend.get(&key).await {
            Ok(Some(json)) => match serde_json::from_str::<CachedEntry<T>>(&json) {
                Ok(entry) => {
                    debug!(key = %key, "cache: hit");
                    return Ok(entry.data);
                }
                Err(e) => {
                    // Corrupted or stale-format entry - treat as miss
                    warn!("cache: failed to deserialize {}: {}", key, e);
                }
            },
            Ok(None) => {
                debug!(key = %key, "cache: miss");
            }
            Err(e) => {
                warn!("cache: get failed for {}: {}", key, e);
            }
        }

        let data = compute().await?;

        if let Err(e) = self.put(&key, &data).await {
            warn!("cache: failed to set {}: {}", key, e);
        }

        Ok(data)
    }

    async fn put<T: Serialize>(&self, key: &str, data: &T) -> Result<()> {
        let entry = CachedEntry {
            data,
            cached_at: Utc::now(),
        };
        let json = serde_json::to_string(&entry)?;
        self.backend.set(key, json, self.ttl()).await
    }

    /// Drop a single entry. Failures are logged, not returned.
    pub async fn invalidate(&self, key: &str) {
        let key = self.namespaced(key);
        if let Err(e) = self.backend.delete(&key).await {
            warn!("cache: failed to delete {}: {}", key, e);
        }
    }

    /// Drop every entry in this service's namespace.
    pub async fn invalidate_all(&self) -> Result<u64> {
        self.backend.delete_prefix(&self.config.key_prefix).await
    }
}
