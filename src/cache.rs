use dashmap::DashMap;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use serde::{de::DeserializeOwned, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Entry stored in the local DashMap with an expiry timestamp.
#[derive(Clone)]
pub(crate) struct CacheEntry {
    value: String,
    pub(crate) expires_at: Instant,
}

/// Two-tier read cache for secret metadata: in-memory DashMap (tier 1)
/// optionally backed by Redis (tier 2). The repository stays the source of
/// truth; every write path calls [`TieredCache::invalidate`].
///
/// Payloads are never cached, only metadata documents.
#[derive(Clone)]
pub struct TieredCache {
    pub(crate) local: Arc<DashMap<String, CacheEntry>>,
    redis: Option<ConnectionManager>,
}

impl TieredCache {
    pub fn new(redis: Option<ConnectionManager>) -> Self {
        Self {
            local: Arc::new(DashMap::new()),
            redis,
        }
    }

    pub fn local_only() -> Self {
        Self::new(None)
    }

    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        if let Some(entry) = self.local.get(key) {
            if Instant::now() < entry.expires_at {
                return serde_json::from_str(&entry.value).ok();
            }
            // drop the ref before removing
            drop(entry);
            self.local.remove(key);
        }

        let mut conn = self.redis.clone()?;
        match conn.get::<_, Option<String>>(key).await {
            Ok(Some(v)) => {
                let ttl_secs: i64 = conn.ttl(key).await.unwrap_or(30);
                let ttl = Duration::from_secs(if ttl_secs > 0 { ttl_secs as u64 } else { 30 });
                self.local.insert(
                    key.to_string(),
                    CacheEntry {
                        value: v.clone(),
                        expires_at: Instant::now() + ttl,
                    },
                );
                serde_json::from_str(&v).ok()
            }
            Ok(None) => None,
            Err(e) => {
                tracing::warn!(key, error = %e, "redis cache read failed");
                None
            }
        }
    }

    pub async fn set<T: Serialize>(&self, key: &str, value: &T, ttl_secs: u64) -> anyhow::Result<()> {
        let json = serde_json::to_string(value)?;
        self.local.insert(
            key.to_string(),
            CacheEntry {
                value: json.clone(),
                expires_at: Instant::now() + Duration::from_secs(ttl_secs),
            },
        );

        if let Some(mut conn) = self.redis.clone() {
            conn.set_ex::<_, _, ()>(key, json, ttl_secs).await?;
        }
        Ok(())
    }

    /// Drop `key` from both tiers. Redis failures are logged; the local
    /// tier is always cleared.
    pub async fn invalidate(&self, key: &str) {
        self.local.remove(key);
        if let Some(mut conn) = self.redis.clone() {
            if let Err(e) = conn.del::<_, ()>(key).await {
                tracing::warn!(key, error = %e, "redis cache invalidation failed");
            }
        }
    }

    /// Remove all locally-expired entries. Called from the periodic job to
    /// bound memory usage.
    pub fn evict_expired(&self) -> usize {
        let now = Instant::now();
        let before = self.local.len();
        self.local.retain(|_, entry| entry.expires_at > now);
        before - self.local.len()
    }

    pub fn local_len(&self) -> usize {
        self.local.len()
    }
}
