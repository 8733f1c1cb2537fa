//! Persistent corpus cache.
//!
//! Documents live in one keyed collection, the [`CorpusMetadata`] record in another. A batch save
//! upserts its documents and rewrites the metadata in the same transaction, so the stored
//! `total_documents` always matches the live count unless something outside this module touched
//! the data. Read paths are fail-soft: a broken backend looks like an empty, unavailable corpus.

use crate::config::{exceeds, EngineConfig};
use crate::error::{StoreError, StoreResult};
use crate::{CorpusMetadata, Document, SCHEMA_VERSION};
use parking_lot::{Mutex, RwLock};
use sled::transaction::{ConflictableTransactionError, TransactionError, Transactional};
use std::collections::BTreeMap;
use std::path::Path;
use time::OffsetDateTime;

const POEMS_TREE: &str = "poems";
const METADATA_TREE: &str = "metadata";
const METADATA_KEY: &[u8] = b"metadata";

/// Transactional document store keyed by `(author, title)`.
pub trait Backend: Send + Sync {
    fn scan(&self) -> StoreResult<Vec<Document>>;
    fn count(&self) -> StoreResult<u64>;
    fn metadata(&self) -> StoreResult<Option<CorpusMetadata>>;
    fn put_metadata(&self, meta: &CorpusMetadata) -> StoreResult<()>;
    /// Upserts `records` and stores the metadata `finish` derives from the resulting live count,
    /// all or nothing. Returns that count.
    fn commit(
        &self,
        records: &[(String, Document)],
        finish: &dyn Fn(u64) -> CorpusMetadata,
    ) -> StoreResult<u64>;
    /// Drops every document and the metadata record.
    fn clear(&self) -> StoreResult<()>;
}

pub struct SledBackend {
    db: sled::Db,
    poems: sled::Tree,
    metadata: sled::Tree,
}

impl SledBackend {
    pub fn open<P: AsRef<Path>>(path: P) -> StoreResult<Self> {
        let db = sled::open(path)?;
        let poems = db.open_tree(POEMS_TREE)?;
        let metadata = db.open_tree(METADATA_TREE)?;
        Ok(Self { db, poems, metadata })
    }
}

impl Backend for SledBackend {
    fn scan(&self) -> StoreResult<Vec<Document>> {
        let mut docs = Vec::with_capacity(self.poems.len());
        for entry in self.poems.iter() {
            let (_key, value) = entry?;
            docs.push(bincode::deserialize(&value)?);
        }
        Ok(docs)
    }

    fn count(&self) -> StoreResult<u64> {
        Ok(self.poems.len() as u64)
    }

    fn metadata(&self) -> StoreResult<Option<CorpusMetadata>> {
        match self.metadata.get(METADATA_KEY)? {
            Some(raw) => Ok(Some(serde_json::from_slice(&raw)?)),
            None => Ok(None),
        }
    }

    fn put_metadata(&self, meta: &CorpusMetadata) -> StoreResult<()> {
        self.metadata.insert(METADATA_KEY, serde_json::to_vec(meta)?)?;
        self.db.flush()?;
        Ok(())
    }

    fn commit(
        &self,
        records: &[(String, Document)],
        finish: &dyn Fn(u64) -> CorpusMetadata,
    ) -> StoreResult<u64> {
        let mut encoded = Vec::with_capacity(records.len());
        for (key, doc) in records {
            encoded.push((key.as_bytes(), bincode::serialize(doc)?));
        }
        // Callers serialize commits, so the count cannot move under us between here and the
        // transaction below.
        let before = self.poems.len() as u64;

        let result = (&self.poems, &self.metadata).transaction(|(poems, metadata)| {
            let mut added = 0u64;
            for (key, value) in &encoded {
                if poems.insert(*key, value.as_slice())?.is_none() {
                    added += 1;
                }
            }
            let total = before + added;
            let meta_bytes = serde_json::to_vec(&finish(total))
                .map_err(|e| ConflictableTransactionError::Abort(StoreError::from(e)))?;
            metadata.insert(METADATA_KEY, meta_bytes)?;
            Ok(total)
        });

        let total = result.map_err(|e| match e {
            TransactionError::Abort(inner) => inner,
            TransactionError::Storage(inner) => StoreError::Backend(inner),
        })?;
        self.db.flush()?;
        Ok(total)
    }

    fn clear(&self) -> StoreResult<()> {
        self.poems.clear()?;
        self.metadata.clear()?;
        self.db.flush()?;
        Ok(())
    }
}

/// Process-local backend for tests and ephemeral runs.
#[derive(Default)]
pub struct MemoryBackend {
    inner: RwLock<MemoryState>,
}

#[derive(Default)]
struct MemoryState {
    poems: BTreeMap<String, Document>,
    metadata: Option<CorpusMetadata>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Backend for MemoryBackend {
    fn scan(&self) -> StoreResult<Vec<Document>> {
        Ok(self.inner.read().poems.values().cloned().collect())
    }

    fn count(&self) -> StoreResult<u64> {
        Ok(self.inner.read().poems.len() as u64)
    }

    fn metadata(&self) -> StoreResult<Option<CorpusMetadata>> {
        Ok(self.inner.read().metadata.clone())
    }

    fn put_metadata(&self, meta: &CorpusMetadata) -> StoreResult<()> {
        self.inner.write().metadata = Some(meta.clone());
        Ok(())
    }

    fn commit(
        &self,
        records: &[(String, Document)],
        finish: &dyn Fn(u64) -> CorpusMetadata,
    ) -> StoreResult<u64> {
        let mut state = self.inner.write();
        for (key, doc) in records {
            state.poems.insert(key.clone(), doc.clone());
        }
        let total = state.poems.len() as u64;
        state.metadata = Some(finish(total));
        Ok(total)
    }

    fn clear(&self) -> StoreResult<()> {
        let mut state = self.inner.write();
        state.poems.clear();
        state.metadata = None;
        Ok(())
    }
}

/// Outcome of a successful [`CorpusStore::put_batch`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchReport {
    pub stored: usize,
    pub skipped: usize,
    pub total: u64,
}

pub struct CorpusStore {
    backend: Box<dyn Backend>,
    write_lock: Mutex<()>,
    config: EngineConfig,
}

impl CorpusStore {
    /// Opens a sled-backed store under `path`, migrating it if needed.
    pub fn open<P: AsRef<Path>>(path: P, config: EngineConfig) -> StoreResult<Self> {
        let backend = SledBackend::open(path)?;
        Self::with_backend(Box::new(backend), config)
    }

    pub fn in_memory(config: EngineConfig) -> StoreResult<Self> {
        Self::with_backend(Box::new(MemoryBackend::new()), config)
    }

    pub fn with_backend(backend: Box<dyn Backend>, config: EngineConfig) -> StoreResult<Self> {
        let store = Self { backend, write_lock: Mutex::new(()), config };
        store.migrate(OffsetDateTime::now_utc())?;
        Ok(store)
    }

    /// Resets the corpus when the stored schema version is missing or differs from ours.
    fn migrate(&self, now: OffsetDateTime) -> StoreResult<()> {
        let _guard = self.write_lock.lock();
        let current = self.backend.metadata()?;
        match current {
            Some(meta) if meta.schema_version == SCHEMA_VERSION => Ok(()),
            Some(meta) => {
                tracing::info!(from = meta.schema_version, to = SCHEMA_VERSION, "migrating corpus store");
                self.backend.clear()?;
                self.backend.put_metadata(&CorpusMetadata::fresh(now))
            }
            None => {
                tracing::info!(version = SCHEMA_VERSION, "initializing corpus store");
                self.backend.clear()?;
                self.backend.put_metadata(&CorpusMetadata::fresh(now))
            }
        }
    }

    pub fn put_batch(&self, docs: &[Document]) -> StoreResult<BatchReport> {
        self.put_batch_at(docs, OffsetDateTime::now_utc())
    }

    /// Upserts every valid document of `docs` and refreshes the metadata, atomically.
    pub fn put_batch_at(&self, docs: &[Document], now: OffsetDateTime) -> StoreResult<BatchReport> {
        let records: Vec<(String, Document)> = docs
            .iter()
            .filter(|d| d.is_valid())
            .map(|d| (d.key(), d.clone()))
            .collect();
        let skipped = docs.len() - records.len();
        if records.is_empty() {
            tracing::warn!(skipped, "no valid documents to save");
            return Err(StoreError::NoValidDocuments { skipped });
        }

        let _guard = self.write_lock.lock();
        let finish = |total: u64| CorpusMetadata {
            last_updated: now,
            schema_version: SCHEMA_VERSION,
            total_documents: total,
            last_author_fetch: now,
        };
        let total = self.backend.commit(&records, &finish)?;
        if skipped > 0 {
            tracing::warn!(skipped, "skipped invalid documents");
        }
        tracing::info!(stored = records.len(), total, "saved documents");
        Ok(BatchReport { stored: records.len(), skipped, total })
    }

    /// Full snapshot read. Empty when the backend fails.
    pub fn get_all(&self) -> Vec<Document> {
        match self.backend.scan() {
            Ok(docs) => docs,
            Err(e) => {
                tracing::warn!(error = %e, "corpus scan failed");
                Vec::new()
            }
        }
    }

    /// Documents whose author contains `author`, ignoring case.
    pub fn get_by_author(&self, author: &str) -> Vec<Document> {
        self.get_by_authors(&[author]).pop().unwrap_or_default()
    }

    /// [`CorpusStore::get_by_author`] for several authors over one scan, grouped in input order.
    pub fn get_by_authors<S: AsRef<str>>(&self, authors: &[S]) -> Vec<Vec<Document>> {
        let needles: Vec<String> = authors.iter().map(|a| a.as_ref().to_lowercase()).collect();
        let mut grouped = vec![Vec::new(); needles.len()];
        for doc in self.get_all() {
            let author = doc.author.to_lowercase();
            for (group, needle) in grouped.iter_mut().zip(&needles) {
                if author.contains(needle.as_str()) {
                    group.push(doc.clone());
                }
            }
        }
        grouped
    }

    /// Exact title, then case-insensitive, then alphanumerics only.
    pub fn find_by_title(&self, title: &str) -> Option<Document> {
        let docs = self.get_all();
        if let Some(doc) = docs.iter().find(|d| d.title == title) {
            return Some(doc.clone());
        }
        let lower = title.to_lowercase();
        if let Some(doc) = docs.iter().find(|d| d.title.to_lowercase() == lower) {
            return Some(doc.clone());
        }
        let squashed = squash(title);
        if squashed.is_empty() {
            return None;
        }
        docs.into_iter().find(|d| squash(&d.title) == squashed)
    }

    pub fn metadata(&self) -> Option<CorpusMetadata> {
        match self.backend.metadata() {
            Ok(meta) => meta,
            Err(e) => {
                tracing::warn!(error = %e, "metadata read failed");
                None
            }
        }
    }

    pub fn count(&self) -> u64 {
        self.backend.count().unwrap_or_else(|e| {
            tracing::warn!(error = %e, "count failed");
            0
        })
    }

    pub fn is_available(&self) -> bool {
        self.is_available_at(OffsetDateTime::now_utc())
    }

    /// Fresh metadata whose document total matches the live count.
    pub fn is_available_at(&self, now: OffsetDateTime) -> bool {
        let Some(meta) = self.metadata() else {
            tracing::debug!("no metadata found");
            return false;
        };
        if exceeds(now - meta.last_updated, self.config.corpus_freshness()) {
            tracing::debug!(last_updated = %meta.last_updated, "corpus is stale");
            return false;
        }
        let live = match self.backend.count() {
            Ok(n) => n,
            Err(e) => {
                tracing::warn!(error = %e, "count failed");
                return false;
            }
        };
        if live != meta.total_documents {
            tracing::debug!(live, recorded = meta.total_documents, "document count mismatch");
            return false;
        }
        true
    }

    pub fn should_refresh_authors(&self) -> bool {
        self.should_refresh_authors_at(OffsetDateTime::now_utc())
    }

    pub fn should_refresh_authors_at(&self, now: OffsetDateTime) -> bool {
        match self.metadata() {
            Some(meta) => exceeds(now - meta.last_author_fetch, self.config.author_refresh()),
            None => true,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }
}

fn squash(title: &str) -> String {
    title
        .to_lowercase()
        .chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .collect()
}
