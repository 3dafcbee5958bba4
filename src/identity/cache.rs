//! Identity cache client

use crate::error::Result;
use async_trait::async_trait;
use dashmap::DashMap;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::time::Instant;

/// Hash-per-key cache (Redis `EXISTS`/`HGET`/`HSET` shape)
#[async_trait]
pub trait IdentityCache: Send + Sync {
    async fn exists(&self, key: &str) -> Result<bool>;

    async fn get(&self, key: &str, field: &str) -> Result<Option<String>>;

    /// Set fields on a key, keeping any fields not mentioned
    async fn set(&self, key: &str, fields: &[(&str, String)]) -> Result<()>;

    /// Delete a key with all its fields. Deleting a missing key is a no-op.
    async fn remove(&self, key: &str) -> Result<()>;
}

struct CacheEntry {
    fields: HashMap<String, String>,
    expires_at: Option<Instant>,
}

impl CacheEntry {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.map(|at| now >= at).unwrap_or(false)
    }
}

/// In-memory cache with an optional per-entry TTL
pub struct MemoryIdentityCache {
    entries: DashMap<String, CacheEntry>,
    ttl: Option<Duration>,
    writes: AtomicU64,
}

impl MemoryIdentityCache {
    pub fn new(ttl: Option<Duration>) -> Self {
        Self {
            entries: DashMap::new(),
            ttl,
            writes: AtomicU64::new(0),
        }
    }

    /// Number of `set` and `remove` calls applied so far
    pub fn write_count(&self) -> u64 {
        self.writes.load(Ordering::Relaxed)
    }

    /// Drop expired entries
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let before = self.entries.len();
        self.entries.retain(|_, entry| !entry.is_expired(now));
        before - self.entries.len()
    }

    fn live_field(&self, key: &str, field: &str) -> Option<String> {
        let now = Instant::now();
        let entry = self.entries.get(key)?;
        if entry.is_expired(now) {
            drop(entry);
            self.entries.remove_if(key, |_, e| e.is_expired(now));
            return None;
        }
        entry.fields.get(field).cloned()
    }
}

impl Default for MemoryIdentityCache {
    fn default() -> Self {
        Self::new(None)
    }
}

#[async_trait]
impl IdentityCache for MemoryIdentityCache {
    async fn exists(&self, key: &str) -> Result<bool> {
        let now = Instant::now();
        Ok(self
            .entries
            .get(key)
            .map(|entry| !entry.is_expired(now))
            .unwrap_or(false))
    }

    async fn get(&self, key: &str, field: &str) -> Result<Option<String>> {
        Ok(self.live_field(key, field))
    }

    async fn set(&self, key: &str, fields: &[(&str, String)]) -> Result<()> {
        let now = Instant::now();
        let expires_at = self.ttl.map(|ttl| now + ttl);

        let mut entry = self
            .entries
            .entry(key.to_string())
            .or_insert_with(|| CacheEntry {
                fields: HashMap::new(),
                expires_at,
            });

        if entry.is_expired(now) {
            entry.fields.clear();
        }
        for (field, value) in fields {
            entry.fields.insert((*field).to_string(), value.clone());
        }
        entry.expires_at = expires_at;

        self.writes.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<()> {
        self.entries.remove(key);
        self.writes.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_set_and_get() {
        let cache = MemoryIdentityCache::new(None);

        assert!(!cache.exists("token:abc").await.unwrap());
        cache
            .set("token:abc", &[("client-id", "c1".to_string()), ("username", "alice".to_string())])
            .await
            .unwrap();

        assert!(cache.exists("token:abc").await.unwrap());
        assert_eq!(cache.get("token:abc", "client-id").await.unwrap(), Some("c1".to_string()));
        assert_eq!(cache.get("token:abc", "missing").await.unwrap(), None);
        assert_eq!(cache.write_count(), 1);
    }

    #[tokio::test]
    async fn test_set_merges_fields() {
        let cache = MemoryIdentityCache::new(None);
        cache.set("k", &[("a", "1".to_string())]).await.unwrap();
        cache.set("k", &[("b", "2".to_string())]).await.unwrap();

        assert_eq!(cache.get("k", "a").await.unwrap(), Some("1".to_string()));
        assert_eq!(cache.get("k", "b").await.unwrap(), Some("2".to_string()));
    }

    #[tokio::test]
    async fn test_remove() {
        let cache = MemoryIdentityCache::new(None);
        cache.set("k", &[("a", "1".to_string())]).await.unwrap();

        cache.remove("k").await.unwrap();
        assert!(!cache.exists("k").await.unwrap());
        assert_eq!(cache.get("k", "a").await.unwrap(), None);

        // Missing keys are fine
        cache.remove("k").await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_entries_expire() {
        let cache = MemoryIdentityCache::new(Some(Duration::from_secs(10)));
        cache.set("k", &[("a", "1".to_string())]).await.unwrap();

        tokio::time::advance(Duration::from_secs(5)).await;
        assert!(cache.exists("k").await.unwrap());

        tokio::time::advance(Duration::from_secs(6)).await;
        assert!(!cache.exists("k").await.unwrap());
        assert_eq!(cache.get("k", "a").await.unwrap(), None);
        assert_eq!(cache.purge_expired(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_purge_expired() {
        let cache = MemoryIdentityCache::new(Some(Duration::from_secs(1)));
        cache.set("a", &[("f", "1".to_string())]).await.unwrap();
        cache.set("b", &[("f", "1".to_string())]).await.unwrap();

        tokio::time::advance(Duration::from_secs(2)).await;
        assert_eq!(cache.purge_expired(), 2);
        assert_eq!(cache.purge_expired(), 0);
    }
}
