//! Engine tunables. Every window and limit has a default matching the
//! production behaviour; a JSON file can override any subset.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Corpus older than this is not considered available.
    pub corpus_freshness_secs: u64,
    /// Minimum gap between two author refreshes from the remote source.
    pub author_refresh_secs: u64,
    /// A built index younger than this is reused as is.
    pub index_refresh_secs: u64,
    /// Simultaneous remote fetches a prefetch batch may run.
    pub prefetch_concurrency: usize,
    pub availability_retries: u32,
    pub availability_retry_delay_ms: u64,
    /// Quiet window before readiness changes trigger index initialization.
    pub readiness_quiet_ms: u64,
    /// Authors loaded when the corpus is empty or stale.
    pub seed_authors: Vec<String>,
    pub seed_batch_size: usize,
    pub seed_batch_pause_ms: u64,
    /// Gates prefetching, background refresh and fire-and-forget rebuilds.
    pub background_enabled: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            corpus_freshness_secs: 7 * 24 * 60 * 60,
            author_refresh_secs: 24 * 60 * 60,
            index_refresh_secs: 24 * 60 * 60,
            prefetch_concurrency: 2,
            availability_retries: 5,
            availability_retry_delay_ms: 100,
            readiness_quiet_ms: 1000,
            seed_authors: vec![
                "William Shakespeare".to_string(),
                "Oscar Wilde".to_string(),
                "Emily Dickinson".to_string(),
                "Edgar Allan Poe".to_string(),
                "Walt Whitman".to_string(),
            ],
            seed_batch_size: 2,
            seed_batch_pause_ms: 1000,
            background_enabled: true,
        }
    }
}

impl EngineConfig {
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        let config: EngineConfig = serde_json::from_str(&raw)
            .with_context(|| format!("parsing config {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.prefetch_concurrency == 0 {
            anyhow::bail!("prefetch_concurrency must be at least 1");
        }
        if self.seed_batch_size == 0 {
            anyhow::bail!("seed_batch_size must be at least 1");
        }
        Ok(())
    }

    pub fn without_background(mut self) -> Self {
        self.background_enabled = false;
        self
    }

    pub fn with_seed_authors(mut self, authors: Vec<String>) -> Self {
        self.seed_authors = authors;
        self
    }

    pub fn with_seed_batch_pause(mut self, pause: Duration) -> Self {
        self.seed_batch_pause_ms = pause.as_millis() as u64;
        self
    }

    pub fn with_readiness_quiet(mut self, quiet: Duration) -> Self {
        self.readiness_quiet_ms = quiet.as_millis() as u64;
        self
    }

    pub fn corpus_freshness(&self) -> Duration {
        Duration::from_secs(self.corpus_freshness_secs)
    }

    pub fn author_refresh(&self) -> Duration {
        Duration::from_secs(self.author_refresh_secs)
    }

    pub fn index_refresh(&self) -> Duration {
        Duration::from_secs(self.index_refresh_secs)
    }

    pub fn availability_retry_delay(&self) -> Duration {
        Duration::from_millis(self.availability_retry_delay_ms)
    }

    pub fn readiness_quiet(&self) -> Duration {
        Duration::from_millis(self.readiness_quiet_ms)
    }

    pub fn seed_batch_pause(&self) -> Duration {
        Duration::from_millis(self.seed_batch_pause_ms)
    }
}

/// True when `age` is strictly longer than `window`. Negative ages (clock skew) never exceed.
pub fn exceeds(age: time::Duration, window: Duration) -> bool {
    age.whole_milliseconds() > window.as_millis() as i128
}
