pub mod authors;
pub mod combine;
pub mod config;
pub mod error;
pub mod index;
pub mod persist;
pub mod query;
pub mod tokenizer;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

pub use config::EngineConfig;
pub use error::{StoreError, StoreResult};

pub type TermId = u32;
pub type DocId = u32;

/// Current on-disk layout. Bumping it wipes the corpus on next open.
pub const SCHEMA_VERSION: u32 = 5;

/// A single poem as stored in the corpus.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Document {
    pub author: String,
    pub title: String,
    pub lines: Vec<String>,
}

impl Document {
    pub fn new(author: impl Into<String>, title: impl Into<String>, lines: Vec<String>) -> Self {
        Self { author: author.into(), title: title.into(), lines }
    }

    /// Identity key: lowercase author and title joined by a NUL byte.
    pub fn key(&self) -> String {
        doc_key(&self.author, &self.title)
    }

    /// Documents missing an author, a title or a body are never persisted.
    pub fn is_valid(&self) -> bool {
        !self.author.trim().is_empty() && !self.title.trim().is_empty() && !self.lines.is_empty()
    }

    pub fn body(&self) -> String {
        self.lines.join(" ")
    }
}

pub fn doc_key(author: &str, title: &str) -> String {
    format!("{}\u{0}{}", author.to_lowercase(), title.to_lowercase())
}

/// Singleton bookkeeping record kept next to the documents.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CorpusMetadata {
    #[serde(with = "time::serde::rfc3339")]
    pub last_updated: OffsetDateTime,
    pub schema_version: u32,
    pub total_documents: u64,
    #[serde(with = "time::serde::rfc3339")]
    pub last_author_fetch: OffsetDateTime,
}

impl CorpusMetadata {
    /// Metadata for a freshly migrated, empty corpus.
    pub fn fresh(now: OffsetDateTime) -> Self {
        Self {
            last_updated: now,
            schema_version: SCHEMA_VERSION,
            total_documents: 0,
            last_author_fetch: OffsetDateTime::UNIX_EPOCH,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AuthorRecord {
    pub name: &'static str,
    /// `None` for authors outside the ranked list.
    pub base_rank: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchResult {
    pub document: Document,
    pub score: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Posting {
    pub doc_id: DocId,
    pub weight: f32, // normalized tf-idf weight
}
