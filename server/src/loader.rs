use crate::fetch::AuthorFetcher;
use crate::readiness::Readiness;
use futures::future::join_all;
use std::sync::Arc;
use thiserror::Error;
use tokio::task::JoinHandle;
use verse_core::EngineConfig;

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("no poems were loaded from any seed author")]
    NothingLoaded,
    #[error("corpus is not available after loading {stored} poems")]
    NotAvailable { stored: usize },
}

/// Fills an empty or stale corpus from the seed authors and keeps it refreshed.
pub struct CorpusLoader {
    fetcher: Arc<AuthorFetcher>,
    readiness: Arc<Readiness>,
    config: EngineConfig,
}

impl CorpusLoader {
    pub fn new(fetcher: Arc<AuthorFetcher>, readiness: Arc<Readiness>, config: EngineConfig) -> Self {
        Self { fetcher, readiness, config }
    }

    /// Publishes corpus availability, seeding the store first when it has nothing usable.
    pub async fn initialize(self: &Arc<Self>) -> Result<(), LoadError> {
        let (available, count, refresh_due) = self.probe().await;
        if available && count > 0 {
            tracing::info!(count, "found poems in storage");
            self.readiness.set_corpus_available(true);
            if refresh_due {
                self.spawn_background_refresh();
            }
            return Ok(());
        }

        tracing::info!("no usable corpus, fetching seed authors");
        let stored = match self.load_seed().await {
            Ok(stored) => stored,
            Err(e) => {
                self.readiness.set_corpus_available(false);
                return Err(e);
            }
        };
        let (available, count, _) = self.probe().await;
        if !available || count == 0 {
            self.readiness.set_corpus_available(false);
            return Err(LoadError::NotAvailable { stored });
        }
        tracing::info!(stored, count, "seed load complete");
        self.readiness.set_corpus_available(true);
        Ok(())
    }

    /// Refreshes the seed authors in the background. `None` when background work is disabled.
    pub fn spawn_background_refresh(self: &Arc<Self>) -> Option<JoinHandle<()>> {
        if !self.config.background_enabled {
            return None;
        }
        let loader = Arc::clone(self);
        Some(tokio::spawn(async move {
            tracing::info!("refreshing authors in background");
            loader.readiness.set_background_loading(true);
            if let Err(e) = loader.load_seed().await {
                tracing::warn!(error = %e, "background refresh failed");
            }
            loader.readiness.set_background_loading(false);
        }))
    }

    /// Fetches the seed authors a few at a time, pausing between chunks. Returns the number of
    /// poems stored.
    pub async fn load_seed(&self) -> Result<usize, LoadError> {
        let chunks: Vec<&[String]> = self.config.seed_authors.chunks(self.config.seed_batch_size.max(1)).collect();
        let mut stored = 0;
        for (i, chunk) in chunks.iter().enumerate() {
            let results = join_all(chunk.iter().map(|author| self.fetcher.refresh(author))).await;
            let mut chunk_total = 0;
            for (author, result) in chunk.iter().zip(results) {
                match result {
                    Ok(report) => {
                        tracing::info!(%author, stored = report.stored, "saved author");
                        chunk_total += report.stored;
                    }
                    Err(e) => tracing::warn!(%author, error = %e, "could not load author"),
                }
            }
            tracing::debug!(chunk = i, added = chunk_total, "seed chunk complete");
            stored += chunk_total;
            if i + 1 < chunks.len() {
                tokio::time::sleep(self.config.seed_batch_pause()).await;
            }
        }
        if stored == 0 {
            return Err(LoadError::NothingLoaded);
        }
        Ok(stored)
    }

    async fn probe(&self) -> (bool, u64, bool) {
        let store = Arc::clone(self.fetcher.store());
        tokio::task::spawn_blocking(move || (store.is_available(), store.count(), store.should_refresh_authors()))
            .await
            .unwrap_or_else(|e| {
                tracing::warn!(error = %e, "corpus probe failed");
                (false, 0, false)
            })
    }
}
