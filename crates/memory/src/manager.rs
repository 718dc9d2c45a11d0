//! The `Memory` capability: [`MemoryStorage`] + [`QueryCache`] + a lifecycle
//! (TTL + capacity eviction) controller, composed behind one type.
//!
//! Grounded in `memory/src/manager/mod.rs`'s layering (storage +
//! index + cache behind a single manager struct), simplified to the plain
//! store/cache/lifecycle triad this capability needs — no identity
//! kernel, event log, or vault sync.

use std::collections::HashMap;
use std::path::Path;

use chrono::{Duration as ChronoDuration, Utc};
use deskflow_config::MemoryConfig;
use deskflow_core::MemoryError;
use deskflow_core::models::MemoryEntry;
use tracing::{debug, warn};

use crate::cache::{CacheStats, QueryCache};
use crate::storage::MemoryStorage;

/// Outcome of one [`MemoryManager::cleanup_memories`] pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CleanupReport {
    pub deleted_ttl: usize,
    pub evicted_lru: usize,
}

/// Composes [`MemoryStorage`] + [`QueryCache`] behind the `Memory` capability
/// the Prompt Assembler and Conversation Loop depend on.
pub struct MemoryManager {
    storage: MemoryStorage,
    cache: QueryCache,
    /// TTL per memory type; types absent from the map are immortal. Resolves
    /// the per-memory-type TTL table —
    /// callers supply it via [`deskflow_config::MemoryConfig::ttl_seconds`].
    ttl_seconds: HashMap<String, i64>,
    capacity: usize,
}

impl MemoryManager {
    pub fn new(storage: MemoryStorage, cache_capacity: usize, ttl_seconds: HashMap<String, i64>, capacity: usize) -> Self {
        Self {
            storage,
            cache: QueryCache::new(cache_capacity),
            ttl_seconds,
            capacity,
        }
    }

    /// Open durable storage at `path` and wire it up per `config`.
    pub fn open(path: impl AsRef<Path>, config: &MemoryConfig) -> Result<Self, MemoryError> {
        let storage = MemoryStorage::open(path)?;
        Ok(Self::new(storage, config.cache_size, config.ttl_seconds.clone(), config.capacity))
    }

    pub fn open_temp(config: &MemoryConfig) -> Result<Self, MemoryError> {
        let storage = MemoryStorage::open_temp()?;
        Ok(Self::new(storage, config.cache_size, config.ttl_seconds.clone(), config.capacity))
    }

    /// Delegates to storage, then invalidates the query cache.
    pub fn store(&self, entry: MemoryEntry) -> Result<String, MemoryError> {
        let id = self.storage.store(entry)?;
        self.cache.invalidate();
        Ok(id)
    }

    /// Cache lookup; on miss, `search_fts`, falling through to `search_like`
    /// when FTS returns nothing. Filters by `memory_type`, clamps to
    /// `top_k`, performs the `last_accessed`/`access_count` writeback on
    /// every returned entry, and populates the cache.
    pub fn retrieve(
        &self,
        query: &str,
        top_k: usize,
        memory_type: Option<&str>,
    ) -> Result<Vec<MemoryEntry>, MemoryError> {
        let key = QueryCache::key(query, top_k, memory_type);
        if let Some(cached) = self.cache.get(&key) {
            debug!(query, top_k, "memory retrieval cache hit");
            return Ok(cached);
        }

        let mut results = self.storage.search_fts(query, top_k.max(1) * 4)?;
        if results.is_empty() {
            results = self.storage.search_like(query, top_k.max(1) * 4)?;
        }

        if let Some(memory_type) = memory_type {
            results.retain(|e| e.memory_type == memory_type);
        }
        results.truncate(top_k);

        for entry in &results {
            self.storage.touch(&entry.id)?;
        }
        // Re-read so the returned entries reflect the writeback.
        let results: Vec<MemoryEntry> = results
            .into_iter()
            .map(|e| self.storage.get_by_id(&e.id).ok().flatten().unwrap_or(e))
            .collect();

        self.cache.put(key, results.clone());
        Ok(results)
    }

    pub fn get_by_id(&self, id: &str) -> Result<Option<MemoryEntry>, MemoryError> {
        self.storage.get_by_id(id)
    }

    /// Deletes the entry and invalidates the cache. `true` iff a row was removed.
    pub fn delete(&self, id: &str) -> Result<bool, MemoryError> {
        let removed = self.storage.delete(id)?;
        self.cache.invalidate();
        Ok(removed)
    }

    pub fn count(&self) -> Result<usize, MemoryError> {
        self.storage.count()
    }

    pub fn get_recent(&self, limit: usize) -> Result<Vec<MemoryEntry>, MemoryError> {
        self.storage.get_recent(limit)
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    /// The lifecycle pass: TTL expiry, then capacity eviction. Both steps
    /// are idempotent — re-running on unchanged state deletes/evicts
    /// nothing further.
    pub fn cleanup_memories(&self) -> Result<CleanupReport, MemoryError> {
        let mut report = CleanupReport::default();
        let now = Utc::now();

        let all = self.storage.all()?;
        for entry in &all {
            if let Some(ttl_secs) = self.ttl_seconds.get(&entry.memory_type) {
                let expires_at = entry.created_at + ChronoDuration::seconds(*ttl_secs);
                if expires_at <= now {
                    self.storage.delete(&entry.id)?;
                    report.deleted_ttl += 1;
                }
            }
        }
        if report.deleted_ttl > 0 {
            self.cache.invalidate();
        }

        let remaining_count = self.storage.count()?;
        if remaining_count > self.capacity {
            let mut remaining: Vec<MemoryEntry> = self
                .storage
                .all()?
                .into_iter()
                .collect();
            // Ascending (last_accessed, -importance); ties by created_at ascending.
            remaining.sort_by(|a, b| {
                a.last_accessed
                    .cmp(&b.last_accessed)
                    .then_with(|| b.importance.total_cmp(&a.importance))
                    .then_with(|| a.created_at.cmp(&b.created_at))
            });

            let excess = remaining_count - self.capacity;
            for entry in remaining.into_iter().take(excess) {
                self.storage.delete(&entry.id)?;
                report.evicted_lru += 1;
            }
            if report.evicted_lru > 0 {
                self.cache.invalidate();
            }
        }

        if report.deleted_ttl > 0 || report.evicted_lru > 0 {
            debug!(deleted_ttl = report.deleted_ttl, evicted_lru = report.evicted_lru, "memory lifecycle pass");
        }
        Ok(report)
    }
}

/// Best-effort persistence of a turn summary. Failures are logged and
/// swallowed — a memory write must never fail a
/// user-visible turn.
pub fn persist_turn_best_effort(manager: &MemoryManager, entry: MemoryEntry) {
    if let Err(err) = manager.store(entry) {
        warn!(%err, "failed to persist turn memory; continuing");
    }
}
