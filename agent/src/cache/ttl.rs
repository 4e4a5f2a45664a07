//! Time-bounded in-memory cache

use std::collections::HashMap;
use std::hash::Hash;
use std::time::{Duration, Instant};

use parking_lot::RwLock;

/// TTL cache entry
#[derive(Debug, Clone)]
struct TtlCacheEntry<V> {
    value: V,
    cached_at: Instant,
}

/// In-memory cache whose entries expire `ttl` after insertion.
///
/// Expired entries are invisible to readers immediately and are dropped from
/// memory by [`TtlCache::evict_expired`].
#[derive(Debug)]
pub struct TtlCache<K, V> {
    entries: RwLock<HashMap<K, TtlCacheEntry<V>>>,
    ttl: Duration,
}

impl<K, V> TtlCache<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    /// Create a new cache
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            ttl,
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Get a live value
    pub fn get(&self, key: &K) -> Option<V> {
        let entries = self.entries.read();
        entries
            .get(key)
            .filter(|e| e.cached_at.elapsed() < self.ttl)
            .map(|e| e.value.clone())
    }

    pub fn contains(&self, key: &K) -> bool {
        self.get(key).is_some()
    }

    /// Insert a value, resetting its expiry
    pub fn insert(&self, key: K, value: V) {
        let entry = TtlCacheEntry {
            value,
            cached_at: Instant::now(),
        };
        self.entries.write().insert(key, entry);
    }

    /// Remove a value from cache
    pub fn remove(&self, key: &K) -> Option<V> {
        self.entries.write().remove(key).map(|e| e.value)
    }

    /// Drop every expired entry, returning how many were removed
    pub fn evict_expired(&self) -> usize {
        let mut entries = self.entries.write();
        let before = entries.len();
        entries.retain(|_, e| e.cached_at.elapsed() < self.ttl);
        before - entries.len()
    }

    /// Get all live keys
    pub fn keys(&self) -> Vec<K> {
        let entries = self.entries.read();
        entries
            .iter()
            .filter(|(_, e)| e.cached_at.elapsed() < self.ttl)
            .map(|(k, _)| k.clone())
            .collect()
    }

    /// Number of entries held in memory, including expired ones not yet evicted
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// Check if cache is empty
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_and_get() {
        let cache = TtlCache::new(Duration::from_secs(60));
        cache.insert("d-1".to_string(), 1);

        assert_eq!(cache.get(&"d-1".to_string()), Some(1));
        assert!(cache.contains(&"d-1".to_string()));
        assert!(!cache.contains(&"d-2".to_string()));
        assert_eq!(cache.keys(), vec!["d-1".to_string()]);
    }

    #[test]
    fn test_expired_entries_are_hidden_then_evicted() {
        let cache = TtlCache::new(Duration::ZERO);
        cache.insert("d-1", ());

        assert!(!cache.contains(&"d-1"));
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.evict_expired(), 1);
        assert!(cache.is_empty());
    }

    #[test]
    fn test_remove() {
        let cache = TtlCache::new(Duration::from_secs(60));
        cache.insert(1, "a");
        assert_eq!(cache.remove(&1), Some("a"));
        assert_eq!(cache.remove(&1), None);
    }
}
