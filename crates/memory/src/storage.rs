//! Durable [`MemoryEntry`] storage backed by `redb`, with an in-process
//! token index for full-text search and a mirror for substring/recency
//! scans.
//!
//! The redb table holds a `bincode`-encoded `MemoryEntry` per id — the
//! "single storage file" external interface. A parallel in-memory mirror
//! (rebuilt from the table at `open`) avoids a full table scan per query;
//! an inverted token index over `content` backs `search_fts`.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use deskflow_core::MemoryError;
use deskflow_core::models::MemoryEntry;
use redb::{Database, ReadableTable, ReadableTableMetadata, TableDefinition};
use regex::Regex;
use std::sync::OnceLock;

const ENTRIES_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("memory_entries");

fn tokenizer() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"[A-Za-z0-9']+").expect("static tokenizer regex"))
}

fn tokenize(text: &str) -> Vec<String> {
    tokenizer()
        .find_iter(text)
        .map(|m| m.as_str().to_ascii_lowercase())
        .collect()
}

struct Inner {
    entries: HashMap<String, MemoryEntry>,
    /// token -> set of entry ids containing that token.
    token_index: HashMap<String, HashSet<String>>,
}

impl Inner {
    fn index_entry(&mut self, entry: &MemoryEntry) {
        for token in tokenize(&entry.content) {
            self.token_index.entry(token).or_default().insert(entry.id.clone());
        }
    }

    fn deindex_entry(&mut self, entry: &MemoryEntry) {
        for token in tokenize(&entry.content) {
            if let Some(ids) = self.token_index.get_mut(&token) {
                ids.remove(&entry.id);
                if ids.is_empty() {
                    self.token_index.remove(&token);
                }
            }
        }
    }
}

/// Durable table of [`MemoryEntry`] keyed by id, with a full-text index
/// over `content`. Internally synchronized — callers never need a second
/// lock around it.
pub struct MemoryStorage {
    db: Database,
    path: PathBuf,
    inner: Mutex<Inner>,
}

impl MemoryStorage {
    /// Open (or create) the redb file at `path`, rebuilding the in-memory
    /// mirror and token index from its contents.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, MemoryError> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| MemoryError::Storage(format!("creating parent dir: {e}")))?;
            }
        }
        let db = Database::create(&path)
            .map_err(|e| MemoryError::Storage(format!("opening store at {}: {e}", path.display())))?;

        let mut inner = Inner { entries: HashMap::new(), token_index: HashMap::new() };
        {
            let tx = db
                .begin_write()
                .map_err(|e| MemoryError::Storage(e.to_string()))?;
            {
                let table = tx
                    .open_table(ENTRIES_TABLE)
                    .map_err(|e| MemoryError::Storage(e.to_string()))?;
                for row in table.iter().map_err(|e| MemoryError::Storage(e.to_string()))? {
                    let (_, value) = row.map_err(|e| MemoryError::Storage(e.to_string()))?;
                    let (entry, _): (MemoryEntry, usize) =
                        bincode::serde::decode_from_slice(value.value(), bincode::config::standard())
                            .map_err(|e| MemoryError::Storage(format!("decoding entry: {e}")))?;
                    inner.index_entry(&entry);
                    inner.entries.insert(entry.id.clone(), entry);
                }
            }
            tx.commit().map_err(|e| MemoryError::Storage(e.to_string()))?;
        }

        Ok(Self { db, path, inner: Mutex::new(inner) })
    }

    /// Open an in-memory-only store — only used for tests that don't care
    /// about persistence across processes but still want the redb path.
    pub fn open_temp() -> Result<Self, MemoryError> {
        let path = std::env::temp_dir().join(format!("deskflow-memory-{}.redb", uuid::Uuid::new_v4()));
        Self::open(path)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Upsert `entry` keyed by its id. Persists all fields including tags
    /// and embedding.
    pub fn store(&self, entry: MemoryEntry) -> Result<String, MemoryError> {
        let bytes = bincode::serde::encode_to_vec(&entry, bincode::config::standard())
            .map_err(|e| MemoryError::Storage(format!("encoding entry: {e}")))?;

        let tx = self.db.begin_write().map_err(|e| MemoryError::Storage(e.to_string()))?;
        {
            let mut table = tx.open_table(ENTRIES_TABLE).map_err(|e| MemoryError::Storage(e.to_string()))?;
            table
                .insert(entry.id.as_str(), bytes.as_slice())
                .map_err(|e| MemoryError::Storage(e.to_string()))?;
        }
        tx.commit().map_err(|e| MemoryError::Storage(e.to_string()))?;

        let mut inner = self.inner.lock().expect("memory storage lock poisoned");
        if let Some(old) = inner.entries.remove(&entry.id) {
            inner.deindex_entry(&old);
        }
        inner.index_entry(&entry);
        inner.entries.insert(entry.id.clone(), entry.clone());
        Ok(entry.id)
    }

    pub fn get_by_id(&self, id: &str) -> Result<Option<MemoryEntry>, MemoryError> {
        let inner = self.inner.lock().expect("memory storage lock poisoned");
        Ok(inner.entries.get(id).cloned())
    }

    /// Returns `true` iff a row was removed.
    pub fn delete(&self, id: &str) -> Result<bool, MemoryError> {
        let tx = self.db.begin_write().map_err(|e| MemoryError::Storage(e.to_string()))?;
        let removed_bytes = {
            let mut table = tx.open_table(ENTRIES_TABLE).map_err(|e| MemoryError::Storage(e.to_string()))?;
            table.remove(id).map_err(|e| MemoryError::Storage(e.to_string()))?.is_some()
        };
        tx.commit().map_err(|e| MemoryError::Storage(e.to_string()))?;

        let mut inner = self.inner.lock().expect("memory storage lock poisoned");
        if let Some(old) = inner.entries.remove(id) {
            inner.deindex_entry(&old);
            Ok(true)
        } else {
            Ok(removed_bytes)
        }
    }

    pub fn count(&self) -> Result<usize, MemoryError> {
        let inner = self.inner.lock().expect("memory storage lock poisoned");
        Ok(inner.entries.len())
    }

    /// Tokenised full-text match against `content`, ranked by number of
    /// matching tokens (desc), then by `created_at` (desc) as a
    /// deterministic tiebreak.
    pub fn search_fts(&self, query: &str, limit: usize) -> Result<Vec<MemoryEntry>, MemoryError> {
        let terms = tokenize(query);
        if terms.is_empty() {
            return Ok(Vec::new());
        }
        let inner = self.inner.lock().expect("memory storage lock poisoned");

        let mut scores: HashMap<&str, usize> = HashMap::new();
        for term in &terms {
            if let Some(ids) = inner.token_index.get(term) {
                for id in ids {
                    *scores.entry(id.as_str()).or_insert(0) += 1;
                }
            }
        }

        let mut ranked: Vec<&MemoryEntry> = scores
            .keys()
            .filter_map(|id| inner.entries.get(*id))
            .collect();
        ranked.sort_by(|a, b| {
            let sa = scores.get(a.id.as_str()).copied().unwrap_or(0);
            let sb = scores.get(b.id.as_str()).copied().unwrap_or(0);
            sb.cmp(&sa).then_with(|| b.created_at.cmp(&a.created_at))
        });
        Ok(ranked.into_iter().take(limit).cloned().collect())
    }

    /// Case-insensitive substring match against `content`, newest-first.
    pub fn search_like(&self, query: &str, limit: usize) -> Result<Vec<MemoryEntry>, MemoryError> {
        let needle = query.to_ascii_lowercase();
        let inner = self.inner.lock().expect("memory storage lock poisoned");
        let mut matched: Vec<&MemoryEntry> = inner
            .entries
            .values()
            .filter(|e| needle.is_empty() || e.content.to_ascii_lowercase().contains(&needle))
            .collect();
        matched.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(matched.into_iter().take(limit).cloned().collect())
    }

    pub fn get_recent(&self, limit: usize) -> Result<Vec<MemoryEntry>, MemoryError> {
        let inner = self.inner.lock().expect("memory storage lock poisoned");
        let mut all: Vec<&MemoryEntry> = inner.entries.values().collect();
        all.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(all.into_iter().take(limit).cloned().collect())
    }

    /// All entries, unordered — used by the lifecycle controller.
    pub fn all(&self) -> Result<Vec<MemoryEntry>, MemoryError> {
        let inner = self.inner.lock().expect("memory storage lock poisoned");
        Ok(inner.entries.values().cloned().collect())
    }

    /// Bump `last_accessed`/`access_count` on a retrieval writeback.
    pub fn touch(&self, id: &str) -> Result<(), MemoryError> {
        let mut entry = match self.get_by_id(id)? {
            Some(e) => e,
            None => return Ok(()),
        };
        entry.touch();
        self.store(entry)?;
        Ok(())
    }
}
