use dashmap::DashMap;
use std::{hash::Hash, sync::Arc, time::Duration};
use tokio::time::Instant;
use tracing::debug;

/// Entrada de caché con expiración
#[derive(Debug, Clone)]
struct CacheEntry<V> {
    value: V,
    expires_at: Instant,
}

impl<V> CacheEntry<V> {
    fn new(value: V, ttl: Duration) -> Self {
        Self {
            value,
            expires_at: Instant::now() + ttl,
        }
    }

    fn is_expired(&self) -> bool {
        Instant::now() >= self.expires_at
    }
}

/// Concurrent key/value cache where every entry expires after a TTL.
///
/// Clones share the same storage.
#[derive(Debug)]
pub struct TtlCache<K: Clone + Eq + Hash, V> {
    data: Arc<DashMap<K, CacheEntry<V>>>,
    ttl: Duration,
}

impl<K, V> TtlCache<K, V>
where
    K: Clone + Eq + Hash + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    pub fn new(ttl: Duration) -> Self {
        Self {
            data: Arc::new(DashMap::new()),
            ttl,
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn insert(&self, key: K, value: V) -> Option<V> {
        self.insert_with_ttl(key, value, self.ttl)
    }

    pub fn insert_with_ttl(&self, key: K, value: V, ttl: Duration) -> Option<V> {
        let entry = CacheEntry::new(value, ttl);
        self.data.insert(key, entry).map(|old| old.value)
    }

    pub fn get(&self, key: &K) -> Option<V> {
        let entry = self.data.get(key)?;
        if entry.is_expired() {
            drop(entry);
            self.data.remove_if(key, |_, e| e.is_expired());
            None
        } else {
            Some(entry.value.clone())
        }
    }

    pub fn invalidate(&self, key: &K) -> bool {
        self.data.remove(key).is_some()
    }

    pub fn clear(&self) {
        self.data.clear();
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Limpia entradas expiradas y retorna el número de elementos removidos
    pub fn cleanup_expired(&self) -> usize {
        let before = self.data.len();
        self.data.retain(|_, entry| !entry.is_expired());
        let removed = before.saturating_sub(self.data.len());

        if removed > 0 {
            debug!("🧹 Limpiadas {} entradas expiradas del caché", removed);
        }

        removed
    }
}

impl<K, V> Clone for TtlCache<K, V>
where
    K: Clone + Eq + Hash,
{
    fn clone(&self) -> Self {
        Self {
            data: self.data.clone(),
            ttl: self.ttl,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_entries_expire_after_ttl() {
        let cache: TtlCache<u32, &'static str> = TtlCache::new(Duration::from_secs(30));
        cache.insert(1, "uno");

        tokio::time::advance(Duration::from_secs(29)).await;
        assert_eq!(cache.get(&1), Some("uno"));

        tokio::time::advance(Duration::from_secs(2)).await;
        assert_eq!(cache.get(&1), None);
        assert!(cache.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cleanup_expired_counts_removed() {
        let cache: TtlCache<u32, u32> = TtlCache::new(Duration::from_secs(10));
        cache.insert(1, 1);
        cache.insert_with_ttl(2, 2, Duration::from_secs(60));

        tokio::time::advance(Duration::from_secs(11)).await;
        assert_eq!(cache.cleanup_expired(), 1);
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.get(&2), Some(2));
    }

    #[test]
    fn test_clones_share_storage() {
        let cache: TtlCache<&'static str, u8> = TtlCache::new(Duration::from_secs(5));
        let other = cache.clone();
        other.insert("k", 7);
        assert_eq!(cache.get(&"k"), Some(7));
        assert!(cache.invalidate(&"k"));
        assert_eq!(other.get(&"k"), None);
    }
}
