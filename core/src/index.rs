//! Weighted multi-field inverted index.
//!
//! Each [`Field`] keeps its own dictionary, document frequencies and posting lists. Posting
//! weights are tf-idf values normalized per (document, field), so a field never contributes more
//! than its boost for a single matched term.

use crate::config::exceeds;
use crate::persist::CorpusStore;
use crate::query::{ParsedQuery, QueryTerm};
use crate::tokenizer::{normalize_phrase, tokenize, words};
use crate::{DocId, Document, Posting, SearchResult, TermId};
use parking_lot::{Mutex, RwLock};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::ops::Bound;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use time::OffsetDateTime;

/// Expansions that are not the literal query token count at this fraction.
pub const PREFIX_MATCH_FACTOR: f32 = 0.5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Field {
    ExactTitle,
    TitleStart,
    Title,
    Author,
    Lines,
}

impl Field {
    pub const ALL: [Field; 5] = [Field::ExactTitle, Field::TitleStart, Field::Title, Field::Author, Field::Lines];

    pub fn boost(self) -> f32 {
        match self {
            Field::ExactTitle => 25.0,
            Field::TitleStart => 20.0,
            Field::Title => 15.0,
            Field::Author => 10.0,
            Field::Lines => 1.0,
        }
    }

    /// Terms this field contributes for `doc`, repeated once per occurrence.
    fn extract(self, doc: &Document) -> Vec<String> {
        match self {
            Field::ExactTitle => {
                let phrase = normalize_phrase(&doc.title);
                if phrase.is_empty() { vec![] } else { vec![phrase] }
            }
            Field::TitleStart => {
                let start: Vec<String> = words(&doc.title).into_iter().take(3).collect();
                tokenize(&start.join(" ")).into_iter().map(|(t, _)| t).collect()
            }
            Field::Title => {
                let all = words(&doc.title);
                let mut terms = Vec::with_capacity(all.len() * 2 + 1);
                if all.len() > 1 {
                    terms.push(all.join(" "));
                }
                terms.extend(tokenize(&doc.title).into_iter().map(|(t, _)| t));
                terms.extend(all.windows(2).map(|pair| pair.join(" ")));
                terms
            }
            Field::Author => {
                let parts = words(&doc.author);
                let mut terms = Vec::with_capacity(parts.len() + 2);
                if parts.len() > 1 {
                    terms.push(parts.join(" "));
                }
                terms.extend(parts.iter().cloned());
                if parts.len() > 2 {
                    terms.push(format!("{} {}", parts[0], parts[parts.len() - 1]));
                }
                terms
            }
            Field::Lines => tokenize(&doc.body()).into_iter().map(|(t, _)| t).collect(),
        }
    }
}

#[derive(Default)]
struct FieldIndex {
    dictionary: BTreeMap<String, TermId>,
    df: Vec<u32>,
    postings: Vec<Vec<Posting>>, // indexed by term id, sorted by doc_id
}

impl FieldIndex {
    fn build(field: Field, docs: &[Document]) -> Self {
        let mut dictionary: BTreeMap<String, TermId> = BTreeMap::new();
        let mut df: Vec<u32> = Vec::new();
        let mut postings_raw: Vec<Vec<(DocId, u32)>> = Vec::new();

        for (doc_id, doc) in docs.iter().enumerate() {
            let mut tf_counts: HashMap<TermId, u32> = HashMap::new();
            for term in field.extract(doc) {
                let next = dictionary.len() as TermId;
                let tid = *dictionary.entry(term).or_insert_with(|| {
                    df.push(0);
                    postings_raw.push(Vec::new());
                    next
                });
                *tf_counts.entry(tid).or_insert(0) += 1;
            }
            for (tid, tf_raw) in tf_counts {
                df[tid as usize] += 1;
                postings_raw[tid as usize].push((doc_id as DocId, tf_raw));
            }
        }

        // First pass: tf-idf per posting and squared norms per document
        let n = docs.len().max(1) as f32;
        let mut doc_norms: Vec<f32> = vec![0.0; docs.len()];
        let mut weighted: Vec<Vec<(DocId, f32)>> = Vec::with_capacity(postings_raw.len());
        for (tid, plist) in postings_raw.into_iter().enumerate() {
            let df_t = df[tid].max(1) as f32;
            let idf = (1.0 + n / df_t).ln();
            let list = plist
                .into_iter()
                .map(|(doc_id, tf_raw)| {
                    let tf = 1.0 + (tf_raw as f32).ln();
                    let tfidf = tf * idf;
                    doc_norms[doc_id as usize] += tfidf * tfidf;
                    (doc_id, tfidf)
                })
                .collect();
            weighted.push(list);
        }
        for dn in doc_norms.iter_mut() {
            *dn = dn.sqrt();
            if *dn == 0.0 { *dn = 1.0; }
        }

        // Second pass: normalize
        let postings = weighted
            .into_iter()
            .map(|list| {
                let mut out: Vec<Posting> = list
                    .into_iter()
                    .map(|(doc_id, tfidf)| Posting { doc_id, weight: tfidf / doc_norms[doc_id as usize] })
                    .collect();
                out.sort_by_key(|p| p.doc_id);
                out
            })
            .collect();

        Self { dictionary, df, postings }
    }

    /// Terms matching `term`: the literal one plus, for prefix terms, every extension.
    fn matching(&self, term: &QueryTerm) -> Vec<(TermId, bool)> {
        if !term.prefix {
            return self.dictionary.get(&term.text).map(|&tid| vec![(tid, true)]).unwrap_or_default();
        }
        self.dictionary
            .range::<str, _>((Bound::Included(term.text.as_str()), Bound::Unbounded))
            .take_while(|(t, _)| t.starts_with(term.text.as_str()))
            .map(|(t, &tid)| (tid, *t == term.text))
            .collect()
    }

    fn num_terms(&self) -> usize {
        self.dictionary.len()
    }
}

/// Immutable index over one consistent read of the corpus.
pub struct IndexSnapshot {
    built_at: OffsetDateTime,
    docs: Vec<Document>,
    keys: Vec<String>,
    fields: Vec<(Field, FieldIndex)>,
}

impl IndexSnapshot {
    pub fn build(mut docs: Vec<Document>, built_at: OffsetDateTime) -> Self {
        docs.sort_by_cached_key(|d| d.key());
        docs.dedup_by(|a, b| a.key() == b.key());
        let keys = docs.iter().map(|d| d.key()).collect();
        let fields = Field::ALL.iter().map(|&f| (f, FieldIndex::build(f, &docs))).collect();
        Self { built_at, docs, keys, fields }
    }

    pub fn built_at(&self) -> OffsetDateTime {
        self.built_at
    }

    pub fn num_docs(&self) -> usize {
        self.docs.len()
    }

    pub fn num_terms(&self, field: Field) -> usize {
        self.fields.iter().find(|(f, _)| *f == field).map(|(_, idx)| idx.num_terms()).unwrap_or(0)
    }

    pub fn document_frequency(&self, field: Field, term: &str) -> u32 {
        self.fields
            .iter()
            .find(|(f, _)| *f == field)
            .and_then(|(_, idx)| idx.dictionary.get(term).map(|&tid| idx.df[tid as usize]))
            .unwrap_or(0)
    }

    /// Scores every document matching at least one query term, best first.
    pub fn search(&self, query: &ParsedQuery) -> Vec<SearchResult> {
        let mut scores: HashMap<DocId, f32> = HashMap::new();
        for term in query.terms() {
            for (field, idx) in &self.fields {
                // best expansion per document for this (term, field)
                let mut best: HashMap<DocId, f32> = HashMap::new();
                for (tid, literal) in idx.matching(term) {
                    let factor = if literal { 1.0 } else { PREFIX_MATCH_FACTOR };
                    for p in &idx.postings[tid as usize] {
                        let contrib = field.boost() * p.weight * factor;
                        let slot = best.entry(p.doc_id).or_insert(0.0);
                        if contrib > *slot { *slot = contrib; }
                    }
                }
                for (doc_id, contrib) in best {
                    *scores.entry(doc_id).or_insert(0.0) += contrib;
                }
            }
        }

        let mut scored: Vec<(DocId, f32)> = scores.into_iter().collect();
        scored.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| self.keys[a.0 as usize].cmp(&self.keys[b.0 as usize]))
        });
        scored
            .into_iter()
            .map(|(doc_id, score)| SearchResult { document: self.docs[doc_id as usize].clone(), score: score as f64 })
            .collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuildOutcome {
    Built { docs: usize },
    /// A snapshot younger than the refresh window already exists.
    Fresh,
    /// Another build holds the lock; nothing was done.
    InFlight,
    EmptyCorpus,
}

/// Owns the published snapshot and serializes builds.
pub struct IndexBuilder {
    current: RwLock<Option<Arc<IndexSnapshot>>>,
    build_lock: Mutex<()>,
    refresh: Duration,
    builds: AtomicU64,
}

impl IndexBuilder {
    pub fn new(refresh: Duration) -> Self {
        Self { current: RwLock::new(None), build_lock: Mutex::new(()), refresh, builds: AtomicU64::new(0) }
    }

    pub fn current(&self) -> Option<Arc<IndexSnapshot>> {
        self.current.read().clone()
    }

    pub fn is_ready(&self) -> bool {
        self.current.read().is_some()
    }

    /// Number of snapshots published so far.
    pub fn build_count(&self) -> u64 {
        self.builds.load(Ordering::SeqCst)
    }

    pub fn ensure_index(&self, corpus: &CorpusStore) -> BuildOutcome {
        self.ensure_index_at(corpus, OffsetDateTime::now_utc())
    }

    /// Whether `snapshot` has outlived the refresh window.
    pub fn is_stale(&self, snapshot: &IndexSnapshot) -> bool {
        exceeds(OffsetDateTime::now_utc() - snapshot.built_at(), self.refresh)
    }

    /// Builds unless a fresh snapshot exists. A no-op while another build runs.
    pub fn ensure_index_at(&self, corpus: &CorpusStore, now: OffsetDateTime) -> BuildOutcome {
        let Some(_guard) = self.build_lock.try_lock() else {
            tracing::debug!("index build already in flight");
            return BuildOutcome::InFlight;
        };
        if let Some(snapshot) = self.current() {
            if !exceeds(now - snapshot.built_at(), self.refresh) {
                tracing::debug!(built_at = %snapshot.built_at(), "using existing search index");
                return BuildOutcome::Fresh;
            }
        }
        self.build_locked(corpus, now)
    }

    /// Rebuilds unconditionally, waiting for any in-flight build first.
    pub fn rebuild(&self, corpus: &CorpusStore) -> BuildOutcome {
        let _guard = self.build_lock.lock();
        self.build_locked(corpus, OffsetDateTime::now_utc())
    }

    /// Blocks until no build is running.
    pub fn wait_idle(&self) {
        drop(self.build_lock.lock());
    }

    fn build_locked(&self, corpus: &CorpusStore, now: OffsetDateTime) -> BuildOutcome {
        let docs = corpus.get_all();
        if docs.is_empty() {
            tracing::info!("no documents available for indexing");
            return BuildOutcome::EmptyCorpus;
        }
        let start = std::time::Instant::now();
        let snapshot = IndexSnapshot::build(docs, now);
        let count = snapshot.num_docs();
        let authors = snapshot.docs.iter().map(|d| d.author.as_str()).collect::<HashSet<_>>().len();
        *self.current.write() = Some(Arc::new(snapshot));
        self.builds.fetch_add(1, Ordering::SeqCst);
        tracing::info!(docs = count, authors, took_ms = start.elapsed().as_millis() as u64, "search index built");
        BuildOutcome::Built { docs: count }
    }
}
