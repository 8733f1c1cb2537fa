//! The search surface: author matching, fetch-on-demand, full-text search and result merging.
//!
//! Every method is fail-soft. Failures degrade to empty results or `false` and are logged; only
//! [`SearchService::ingest`] reports an error, for batches with nothing valid in them.

use crate::fetch::AuthorFetcher;
use crate::gateway::Gateway;
use crate::loader::CorpusLoader;
use crate::prefetch::PrefetchCoordinator;
use crate::readiness::{coalesce, Readiness};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use verse_core::authors::{leftover_terms, AuthorMatcher};
use verse_core::combine::Combiner;
use verse_core::index::{BuildOutcome, IndexBuilder};
use verse_core::persist::{BatchReport, CorpusStore};
use verse_core::query::QueryEngine;
use verse_core::{CorpusMetadata, Document, EngineConfig, SearchResult, StoreError};

pub struct SearchService {
    config: EngineConfig,
    store: Arc<CorpusStore>,
    index: Arc<IndexBuilder>,
    engine: Arc<QueryEngine>,
    matcher: Arc<AuthorMatcher>,
    fetcher: Arc<AuthorFetcher>,
    prefetch: PrefetchCoordinator,
    readiness: Arc<Readiness>,
    loader: Arc<CorpusLoader>,
}

impl SearchService {
    pub fn new(store: Arc<CorpusStore>, gateway: Arc<dyn Gateway>) -> Arc<Self> {
        let config = store.config().clone();
        let index = Arc::new(IndexBuilder::new(config.index_refresh()));
        let engine = Arc::new(QueryEngine::new(Arc::clone(&store), Arc::clone(&index)));
        let matcher = Arc::new(AuthorMatcher::default());
        let fetcher = Arc::new(AuthorFetcher::new(Arc::clone(&store), gateway));
        let readiness = Arc::new(Readiness::new());
        let prefetch = PrefetchCoordinator::new(Arc::clone(&fetcher), Arc::clone(&matcher), &config);
        let loader = Arc::new(CorpusLoader::new(Arc::clone(&fetcher), Arc::clone(&readiness), config.clone()));
        Arc::new(Self { config, store, index, engine, matcher, fetcher, prefetch, readiness, loader })
    }

    pub fn readiness(&self) -> &Arc<Readiness> {
        &self.readiness
    }

    pub fn index(&self) -> &Arc<IndexBuilder> {
        &self.index
    }

    pub fn prefetch(&self) -> &PrefetchCoordinator {
        &self.prefetch
    }

    /// Starts the readiness coalescer and the corpus loader. The returned handle resolves when
    /// the initial load is done.
    pub fn start(self: &Arc<Self>) -> JoinHandle<()> {
        let weak = Arc::downgrade(self);
        let mut was_loading = false;
        tokio::spawn(coalesce(
            self.readiness.subscribe(),
            self.config.readiness_quiet(),
            |s| (s.corpus_available, s.background_loading),
            move |(available, loading)| {
                let force = was_loading && !loading;
                was_loading = loading;
                if !available || loading {
                    return;
                }
                if let Some(service) = weak.upgrade() {
                    tokio::spawn(async move {
                        service.initialize_index(force).await;
                    });
                }
            },
        ));

        let service = Arc::clone(self);
        tokio::spawn(async move {
            if let Err(e) = service.loader.initialize().await {
                tracing::error!(error = %e, "corpus initialization failed");
            }
        })
    }

    pub async fn search(self: &Arc<Self>, query: &str) -> Vec<SearchResult> {
        let query = query.trim();
        if query.is_empty() {
            return Vec::new();
        }
        let mut chars = query.chars();
        if let (Some(letter), None) = (chars.next(), chars.next()) {
            // the batch keeps running after its handle is dropped
            drop(self.prefetch.start(letter));
        }

        let matches = self.matcher.match_query(query);
        let Some(top) = matches.first() else {
            tracing::debug!(query, "no author match, full text search");
            return self.text_search(query).await;
        };
        tracing::debug!(query, top = top.author, candidates = matches.len(), "author match");

        let leftover = leftover_terms(query, top.author);
        let authors: Vec<&str> = matches.iter().map(|m| m.author).collect();
        let fetched = self.fetcher.documents_for_all(&authors).await;
        let mut any_new = false;
        let mut author_docs = Vec::new();
        for (m, f) in matches.iter().zip(fetched) {
            if !f.documents.is_empty() {
                self.prefetch.mark_prefetched(m.author);
            }
            any_new |= f.fetched;
            author_docs.extend(f.documents);
        }

        let text_docs = if leftover.is_empty() {
            Vec::new()
        } else {
            self.text_search(&leftover.join(" ")).await.into_iter().map(|r| r.document).collect()
        };
        let results = Combiner::new(&self.matcher, top.author, &leftover).combine(author_docs, text_docs);

        if any_new && self.config.background_enabled {
            let service = Arc::clone(self);
            tokio::spawn(async move {
                service.initialize_index(true).await;
            });
        }
        results
    }

    /// Full-text search, after a bounded wait for the corpus to become available.
    async fn text_search(&self, query: &str) -> Vec<SearchResult> {
        if !self.await_available().await {
            tracing::debug!(query, "corpus not available, empty result");
            return Vec::new();
        }
        let engine = Arc::clone(&self.engine);
        let q = query.to_string();
        let results = tokio::task::spawn_blocking(move || engine.search(&q)).await.unwrap_or_else(|e| {
            tracing::warn!(error = %e, "search task failed");
            Vec::new()
        });
        self.readiness.set_index_ready(self.index.is_ready());
        results
    }

    async fn await_available(&self) -> bool {
        let attempts = self.config.availability_retries.max(1);
        for attempt in 1..=attempts {
            if self.is_available().await {
                return true;
            }
            if attempt < attempts {
                tokio::time::sleep(self.config.availability_retry_delay()).await;
            }
        }
        false
    }

    pub async fn is_available(&self) -> bool {
        let store = Arc::clone(&self.store);
        tokio::task::spawn_blocking(move || store.is_available()).await.unwrap_or(false)
    }

    pub async fn metadata(&self) -> Option<CorpusMetadata> {
        let store = Arc::clone(&self.store);
        tokio::task::spawn_blocking(move || store.metadata()).await.ok().flatten()
    }

    pub async fn wait_until_ready(&self, timeout: Duration) -> bool {
        self.readiness.wait_until_ready(timeout).await
    }

    pub async fn find_by_title(&self, title: &str) -> Option<Document> {
        let store = Arc::clone(&self.store);
        let title = title.to_string();
        tokio::task::spawn_blocking(move || store.find_by_title(&title)).await.ok().flatten()
    }

    /// Saves `docs` and rebuilds the index so they are searchable on return.
    pub async fn ingest(&self, docs: Vec<Document>) -> Result<BatchReport, StoreError> {
        let store = Arc::clone(&self.store);
        let report = tokio::task::spawn_blocking(move || store.put_batch(&docs))
            .await
            .map_err(|e| StoreError::Unavailable(e.to_string()))??;
        let available = self.is_available().await;
        self.readiness.set_corpus_available(available);
        self.rebuild_index().await;
        Ok(report)
    }

    pub async fn rebuild_index(&self) -> Option<BuildOutcome> {
        self.initialize_index(true).await
    }

    /// Ensures (or with `force`, rebuilds) the index and publishes whether it is ready.
    pub async fn initialize_index(&self, force: bool) -> Option<BuildOutcome> {
        let index = Arc::clone(&self.index);
        let store = Arc::clone(&self.store);
        let outcome = tokio::task::spawn_blocking(move || if force { index.rebuild(&store) } else { index.ensure_index(&store) })
            .await
            .map_err(|e| tracing::warn!(error = %e, "index build task failed"))
            .ok();
        self.readiness.set_index_ready(self.index.is_ready());
        outcome
    }
}
