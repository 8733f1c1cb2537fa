use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("no valid documents in batch ({skipped} skipped)")]
    NoValidDocuments { skipped: usize },

    #[error("storage backend error: {0}")]
    Backend(#[from] sled::Error),

    #[error("document codec error: {0}")]
    Codec(#[from] bincode::Error),

    #[error("metadata codec error: {0}")]
    Metadata(#[from] serde_json::Error),

    #[error("storage unavailable: {0}")]
    Unavailable(String),
}

pub type StoreResult<T> = Result<T, StoreError>;
