//! Shared readiness state and the coalescing timer that reacts to it.

use std::time::Duration;
use tokio::sync::watch;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReadinessState {
    pub corpus_available: bool,
    pub background_loading: bool,
    pub index_ready: bool,
}

impl ReadinessState {
    /// Corpus and index are both usable.
    pub fn is_ready(&self) -> bool {
        self.corpus_available && self.index_ready
    }
}

/// Readable synchronously, observable through [`Readiness::subscribe`].
pub struct Readiness {
    tx: watch::Sender<ReadinessState>,
}

impl Default for Readiness {
    fn default() -> Self {
        Self::new()
    }
}

impl Readiness {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(ReadinessState::default());
        Self { tx }
    }

    pub fn snapshot(&self) -> ReadinessState {
        *self.tx.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<ReadinessState> {
        self.tx.subscribe()
    }

    pub fn set_corpus_available(&self, value: bool) {
        self.update(|s| &mut s.corpus_available, value);
    }

    pub fn set_background_loading(&self, value: bool) {
        self.update(|s| &mut s.background_loading, value);
    }

    pub fn set_index_ready(&self, value: bool) {
        self.update(|s| &mut s.index_ready, value);
    }

    fn update(&self, field: impl Fn(&mut ReadinessState) -> &mut bool, value: bool) {
        self.tx.send_if_modified(|state| {
            let slot = field(state);
            if *slot == value {
                return false;
            }
            *slot = value;
            true
        });
    }

    /// Resolves once corpus and index are ready, or with `false` after `timeout`.
    pub async fn wait_until_ready(&self, timeout: Duration) -> bool {
        let mut rx = self.subscribe();
        let waited = tokio::time::timeout(timeout, rx.wait_for(|s| s.is_ready())).await;
        matches!(waited, Ok(Ok(_)))
    }
}

/// Emits `project(state)` once no change has arrived for `quiet`, skipping values equal to the
/// last one emitted. Returns when the sender is dropped.
pub async fn coalesce<T, P, E>(mut rx: watch::Receiver<ReadinessState>, quiet: Duration, project: P, mut emit: E)
where
    T: PartialEq + Copy,
    P: Fn(&ReadinessState) -> T,
    E: FnMut(T),
{
    let mut last: Option<T> = None;
    loop {
        // wait for the next change
        if rx.changed().await.is_err() {
            return;
        }
        // then for quiet
        loop {
            match tokio::time::timeout(quiet, rx.changed()).await {
                Ok(Ok(())) => continue,
                Ok(Err(_)) => return,
                Err(_elapsed) => break,
            }
        }
        let value = {
            let state = rx.borrow_and_update();
            project(&*state)
        };
        if last != Some(value) {
            last = Some(value);
            emit(value);
        }
    }
}
