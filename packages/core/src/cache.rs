//! Keyed TTL cache.
//!
//! The dispatcher keeps per-user unread counts here so the badge endpoint
//! does not hit the database on every poll. Entries are invalidated
//! whenever a dispatch or a read changes the count.

use std::collections::HashMap;
use std::hash::Hash;
use std::time::{Duration, Instant};

use tokio::sync::RwLock;

pub struct TtlCache<K, V> {
    ttl: Duration,
    entries: RwLock<HashMap<K, (Instant, V)>>,
}

impl<K, V> TtlCache<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// Returns the cached value if present and fresh.
    pub async fn get(&self, key: &K) -> Option<V> {
        let entries = self.entries.read().await;
        let (stored_at, value) = entries.get(key)?;
        if stored_at.elapsed() < self.ttl {
            Some(value.clone())
        } else {
            None
        }
    }

    pub async fn insert(&self, key: K, value: V) {
        self.entries
            .write()
            .await
            .insert(key, (Instant::now(), value));
    }

    pub async fn invalidate(&self, key: &K) {
        self.entries.write().await.remove(key);
    }

    /// Drop stale entries. Called opportunistically from the scheduler's
    /// cleanup tick so the map does not grow without bound.
    pub async fn purge_expired(&self) {
        let mut entries = self.entries.write().await;
        entries.retain(|_, (stored_at, _)| stored_at.elapsed() < self.ttl);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn fresh_entry_is_returned() {
        let cache: TtlCache<String, i64> = TtlCache::new(Duration::from_secs(60));
        cache.insert("u1".into(), 5).await;
        assert_eq!(cache.get(&"u1".to_string()).await, Some(5));
    }

    #[tokio::test]
    async fn expired_entry_is_a_miss() {
        let cache: TtlCache<String, i64> = TtlCache::new(Duration::from_millis(0));
        cache.insert("u1".into(), 5).await;
        assert_eq!(cache.get(&"u1".to_string()).await, None);
    }

    #[tokio::test]
    async fn invalidate_removes_the_entry() {
        let cache: TtlCache<String, i64> = TtlCache::new(Duration::from_secs(60));
        cache.insert("u1".into(), 5).await;
        cache.invalidate(&"u1".to_string()).await;
        assert_eq!(cache.get(&"u1".to_string()).await, None);
    }

    #[tokio::test]
    async fn purge_drops_only_stale_entries() {
        let cache: TtlCache<String, i64> = TtlCache::new(Duration::from_secs(60));
        cache.insert("u1".into(), 5).await;
        cache.purge_expired().await;
        assert_eq!(cache.get(&"u1".to_string()).await, Some(5));
    }
}
