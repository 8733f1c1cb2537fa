//! Speculative loading of every known author sharing a first letter.
//!
//! Only one batch is active at a time. Starting a new one cancels the previous batch's token:
//! fetches already running finish and still count, queued ones are dropped when they would start.

use crate::fetch::AuthorFetcher;
use futures::stream::{self, StreamExt};
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use verse_core::authors::AuthorMatcher;
use verse_core::EngineConfig;

pub struct PrefetchBatch {
    pub letter: char,
    pub target_authors: Vec<String>,
    cancelled: CancellationToken,
    handle: JoinHandle<usize>,
}

impl PrefetchBatch {
    pub fn cancel(&self) {
        self.cancelled.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.is_cancelled()
    }

    /// Waits for the batch and returns how many authors it loaded.
    pub async fn join(self) -> usize {
        self.handle.await.unwrap_or_else(|e| {
            tracing::warn!(letter = %self.letter, error = %e, "prefetch task failed");
            0
        })
    }
}

pub struct PrefetchCoordinator {
    fetcher: Arc<AuthorFetcher>,
    matcher: Arc<AuthorMatcher>,
    prefetched: Arc<Mutex<HashSet<String>>>,
    active: Mutex<Option<CancellationToken>>,
    concurrency: usize,
    enabled: bool,
}

impl PrefetchCoordinator {
    pub fn new(fetcher: Arc<AuthorFetcher>, matcher: Arc<AuthorMatcher>, config: &EngineConfig) -> Self {
        Self {
            fetcher,
            matcher,
            prefetched: Arc::new(Mutex::new(HashSet::new())),
            active: Mutex::new(None),
            concurrency: config.prefetch_concurrency.max(1),
            enabled: config.background_enabled,
        }
    }

    pub fn mark_prefetched(&self, author: &str) {
        self.prefetched.lock().insert(author.to_string());
    }

    pub fn is_prefetched(&self, author: &str) -> bool {
        self.prefetched.lock().contains(author)
    }

    pub fn cancel_active(&self) {
        if let Some(token) = self.active.lock().take() {
            token.cancel();
        }
    }

    /// Cancels the running batch and starts one for `letter`. `None` when background work is
    /// disabled or every author of the letter is already loaded.
    pub fn start(&self, letter: char) -> Option<PrefetchBatch> {
        if !self.enabled {
            return None;
        }
        // held across cancel and install: at most one batch is ever uncancelled
        let mut active = self.active.lock();
        if let Some(previous) = active.take() {
            previous.cancel();
        }

        let target_authors: Vec<String> = {
            let done = self.prefetched.lock();
            self.matcher
                .authors_for_letter(letter)
                .into_iter()
                .filter(|a| !done.contains(*a))
                .map(str::to_string)
                .collect()
        };
        if target_authors.is_empty() {
            tracing::debug!(%letter, "nothing to prefetch");
            return None;
        }

        let token = CancellationToken::new();
        *active = Some(token.clone());
        tracing::info!(%letter, authors = target_authors.len(), "starting prefetch");

        let handle = tokio::spawn(run_batch(
            letter,
            target_authors.clone(),
            Arc::clone(&self.fetcher),
            Arc::clone(&self.prefetched),
            token.clone(),
            self.concurrency,
        ));
        Some(PrefetchBatch { letter, target_authors, cancelled: token, handle })
    }
}

async fn run_batch(
    letter: char,
    authors: Vec<String>,
    fetcher: Arc<AuthorFetcher>,
    prefetched: Arc<Mutex<HashSet<String>>>,
    cancelled: CancellationToken,
    concurrency: usize,
) -> usize {
    let loaded = stream::iter(authors)
        .map(|author| {
            let fetcher = Arc::clone(&fetcher);
            let prefetched = Arc::clone(&prefetched);
            let cancelled = cancelled.clone();
            async move {
                // checked on first poll, which is when the slot frees up
                if cancelled.is_cancelled() {
                    return false;
                }
                match fetcher.ensure_author(&author).await {
                    Ok(_) => {
                        prefetched.lock().insert(author);
                        true
                    }
                    Err(e) => {
                        tracing::warn!(%author, error = %e, "prefetch failed");
                        false
                    }
                }
            }
        })
        .buffer_unordered(concurrency)
        .filter(|ok| futures::future::ready(*ok))
        .count()
        .await;
    tracing::info!(%letter, loaded, cancelled = cancelled.is_cancelled(), "prefetch finished");
    loaded
}
