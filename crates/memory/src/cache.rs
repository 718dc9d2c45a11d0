//! Bounded LRU cache of retrieval results, keyed by
//! `sha256(query ‖ top_k ‖ memory_type)`. Thread-safe for concurrent
//! `get`/`put`; `invalidate` drops all entries.

use std::num::NonZeroUsize;
use std::sync::Mutex;

use deskflow_core::models::MemoryEntry;
use lru::LruCache;
use sha2::{Digest, Sha256};

#[derive(Debug, Clone, Default)]
pub struct CacheStats {
    pub size: usize,
    pub hits: u64,
    pub misses: u64,
}

impl CacheStats {
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 { 0.0 } else { self.hits as f64 / total as f64 }
    }
}

struct Inner {
    cache: LruCache<String, Vec<MemoryEntry>>,
    hits: u64,
    misses: u64,
}

/// The Memory Manager's query-result cache. Distinct from any entry-id
/// cache a storage layer might keep — this caches ranked result lists.
pub struct QueryCache {
    inner: Mutex<Inner>,
}

impl QueryCache {
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity.max(1)).expect("capacity is at least 1");
        Self {
            inner: Mutex::new(Inner {
                cache: LruCache::new(capacity),
                hits: 0,
                misses: 0,
            }),
        }
    }

    pub fn key(query: &str, top_k: usize, memory_type: Option<&str>) -> String {
        let mut hasher = Sha256::new();
        hasher.update(query.as_bytes());
        hasher.update(b"|");
        hasher.update(top_k.to_string().as_bytes());
        hasher.update(b"|");
        hasher.update(memory_type.unwrap_or("").as_bytes());
        format!("{:x}", hasher.finalize())
    }

    pub fn get(&self, key: &str) -> Option<Vec<MemoryEntry>> {
        let mut inner = self.inner.lock().expect("query cache lock poisoned");
        let hit = inner.cache.get(key).cloned();
        if hit.is_some() {
            inner.hits += 1;
        } else {
            inner.misses += 1;
        }
        hit
    }

    pub fn put(&self, key: String, value: Vec<MemoryEntry>) {
        let mut inner = self.inner.lock().expect("query cache lock poisoned");
        inner.cache.put(key, value);
    }

    pub fn invalidate(&self) {
        let mut inner = self.inner.lock().expect("query cache lock poisoned");
        inner.cache.clear();
    }

    pub fn size(&self) -> usize {
        let inner = self.inner.lock().expect("query cache lock poisoned");
        inner.cache.len()
    }

    pub fn stats(&self) -> CacheStats {
        let inner = self.inner.lock().expect("query cache lock poisoned");
        CacheStats { size: inner.cache.len(), hits: inner.hits, misses: inner.misses }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use deskflow_core::models::MemoryEntry;

    #[test]
    fn miss_then_hit_updates_counters() {
        let cache = QueryCache::new(10);
        let key = QueryCache::key("foo", 5, None);
        assert!(cache.get(&key).is_none());
        cache.put(key.clone(), vec![MemoryEntry::new("x", "episodic")]);
        assert!(cache.get(&key).is_some());

        let stats = cache.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
    }

    #[test]
    fn invalidate_drops_all_entries() {
        let cache = QueryCache::new(10);
        let key = QueryCache::key("foo", 5, None);
        cache.put(key.clone(), vec![MemoryEntry::new("x", "episodic")]);
        cache.invalidate();
        assert!(cache.get(&key).is_none());
        assert_eq!(cache.size(), 0);
    }

    #[test]
    fn key_distinguishes_by_type_and_top_k() {
        let a = QueryCache::key("foo", 5, None);
        let b = QueryCache::key("foo", 10, None);
        let c = QueryCache::key("foo", 5, Some("episodic"));
        assert_ne!(a, b);
        assert_ne!(a, c);
    }
}
