use crate::gateway::{Gateway, GatewayError};
use futures::future::join_all;
use std::sync::Arc;
use thiserror::Error;
use verse_core::persist::{BatchReport, CorpusStore};
use verse_core::{Document, StoreError};

#[derive(Debug, Error)]
pub enum FetchError {
    #[error(transparent)]
    Gateway(#[from] GatewayError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("blocking task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

/// Documents for one author and whether they had to come from the remote source.
#[derive(Debug, Default)]
pub struct Fetched {
    pub documents: Vec<Document>,
    pub fetched: bool,
}

/// Store hit, else gateway fetch followed by a save.
pub struct AuthorFetcher {
    store: Arc<CorpusStore>,
    gateway: Arc<dyn Gateway>,
}

impl AuthorFetcher {
    pub fn new(store: Arc<CorpusStore>, gateway: Arc<dyn Gateway>) -> Self {
        Self { store, gateway }
    }

    pub fn store(&self) -> &Arc<CorpusStore> {
        &self.store
    }

    /// Fail-soft lookup for several authors, in input order. The corpus is scanned once; only
    /// authors it has nothing for go to the remote source.
    pub async fn documents_for_all(&self, authors: &[&str]) -> Vec<Fetched> {
        let store = Arc::clone(&self.store);
        let names: Vec<String> = authors.iter().map(|a| a.to_string()).collect();
        let local = tokio::task::spawn_blocking(move || store.get_by_authors(&names))
            .await
            .unwrap_or_else(|e| {
                tracing::warn!(error = %e, "corpus author lookup failed");
                vec![Vec::new(); authors.len()]
            });

        join_all(authors.iter().zip(local).map(|(author, documents)| async move {
            if !documents.is_empty() {
                tracing::debug!(author, docs = documents.len(), "author served from corpus");
                return Fetched { documents, fetched: false };
            }
            self.fetch_remote(author).await.unwrap_or_else(|e| {
                tracing::warn!(author, error = %e, "no documents for author");
                Fetched::default()
            })
        }))
        .await
    }

    pub async fn ensure_author(&self, author: &str) -> Result<Fetched, FetchError> {
        let store = Arc::clone(&self.store);
        let name = author.to_string();
        let local = tokio::task::spawn_blocking(move || store.get_by_author(&name)).await?;
        if !local.is_empty() {
            tracing::debug!(author, docs = local.len(), "author served from corpus");
            return Ok(Fetched { documents: local, fetched: false });
        }
        self.fetch_remote(author).await
    }

    /// Remote fetch, saved when non-empty.
    async fn fetch_remote(&self, author: &str) -> Result<Fetched, FetchError> {
        let documents = self.gateway.fetch_poems_by_author(author).await?;
        if documents.is_empty() {
            return Ok(Fetched { documents, fetched: false });
        }
        self.save(documents.clone()).await?;
        Ok(Fetched { documents, fetched: true })
    }

    /// Always goes to the remote source and saves what comes back.
    pub async fn refresh(&self, author: &str) -> Result<BatchReport, FetchError> {
        let documents = self.gateway.fetch_poems_by_author(author).await?;
        self.save(documents).await
    }

    async fn save(&self, documents: Vec<Document>) -> Result<BatchReport, FetchError> {
        let store = Arc::clone(&self.store);
        let report = tokio::task::spawn_blocking(move || store.put_batch(&documents)).await??;
        Ok(report)
    }
}
