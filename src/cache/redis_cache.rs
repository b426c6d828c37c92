//! Redis cache backend.

use super::CacheBackend;
use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use std::fmt;
use std::time::Duration;
use tracing::warn;

/// Cache backend storing entries as Redis strings.
#[derive(Clone)]
pub struct RedisCache {
    redis: ConnectionManager,
}

impl fmt::Debug for RedisCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RedisCache")
            .field("redis", &"<ConnectionManager>")
            .finish()
    }
}

/// Escape glob metacharacters so a key prefix matches literally in `SCAN MATCH`.
fn escape_glob(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        if matches!(c, '*' | '?' | '[' | ']' | '\\') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

impl RedisCache {
    pub async fn connect(redis_url: &str) -> Result<Self> {
        let client = redis::Client::open(redis_url)?;
        let redis = ConnectionManager::new(client).await?;
        Ok(Self { redis })
    }

    fn redis(&self) -> ConnectionManager {
        self.redis.clone()
    }
}

#[async_trait]
impl CacheBackend for RedisCache {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        self.redis()
            .get(key)
            .await
            .map_err(|e| anyhow!("redis get failed: {}", e))
    }

    async fn set(&self, key: &str, value: String, ttl: Duration) -> Result<()> {
        let mut redis = self.redis();
        let result: redis::RedisResult<()> = if ttl.is_zero() {
            redis.set(key, value).await
        } else {
            redis.set_ex(key, value, ttl.as_secs().max(1)).await
        };
        result.map_err(|e| anyhow!("redis set failed: {}", e))
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let _: () = self
            .redis()
            .del(key)
            .await
            .map_err(|e| anyhow!("redis del failed: {}", e))?;
        Ok(())
    }

    async fn delete_prefix(&self, prefix: &str) -> Result<u64> {
        let pattern = format!("{}*", escape_glob(prefix));
        let mut cursor = 0u64;
        let mut removed = 0u64;
        let mut failed = 0usize;

        loop {
            let (next_cursor, keys): (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(&pattern)
                .arg("COUNT")
                .arg(100)
                .query_async(&mut self.redis())
                .await
                .map_err(|e| anyhow!("redis SCAN failed for {}: {}", pattern, e))?;

            if !keys.is_empty() {
                let result: redis::RedisResult<u64> = self.redis().del(&keys).await;
                match result {
                    Ok(n) => removed += n,
                    Err(e) => {
                        warn!("cache: failed to delete {} keys: {}", keys.len(), e);
                        failed += keys.len();
                    }
                }
            }

            cursor = next_cursor;
            if cursor == 0 {
                break;
            }
        }

        if failed > 0 {
            bail!(
                "redis DEL failed for {} keys under {} ({} removed)",
                failed,
                prefix,
                removed
            );
        }

        Ok(removed)
    }
}
