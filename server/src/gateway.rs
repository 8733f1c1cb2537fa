//! Remote poem source.

use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;
use thiserror::Error;
use url::Url;
use verse_core::Document;

pub const POETRYDB_BASE: &str = "https://poetrydb.org";

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("invalid gateway base url {0:?}")]
    BaseUrl(String),
    #[error("request for {author} failed: {source}")]
    Transport {
        author: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("remote source answered {status} for {author}")]
    Status { author: String, status: reqwest::StatusCode },
    #[error("unexpected payload for {author}: {reason}")]
    Format { author: String, reason: String },
}

#[async_trait]
pub trait Gateway: Send + Sync {
    /// Every poem the remote source has for `author`, with the author field set to `author`.
    async fn fetch_poems_by_author(&self, author: &str) -> Result<Vec<Document>, GatewayError>;
}

#[derive(Deserialize)]
struct RemotePoem {
    #[serde(default)]
    title: String,
    #[serde(default)]
    lines: Vec<String>,
}

/// Gateway for PoetryDB-compatible APIs (`GET {base}/author/{name}`).
pub struct PoetryDbGateway {
    client: reqwest::Client,
    base: Url,
}

impl PoetryDbGateway {
    pub fn new(base: &str) -> Result<Self, GatewayError> {
        let base = Url::parse(base).map_err(|_| GatewayError::BaseUrl(base.to_string()))?;
        if base.cannot_be_a_base() {
            return Err(GatewayError::BaseUrl(base.to_string()));
        }
        let client = reqwest::Client::builder()
            .user_agent(concat!("versedex/", env!("CARGO_PKG_VERSION")))
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| GatewayError::Transport { author: String::new(), source: e })?;
        Ok(Self { client, base })
    }

    pub fn author_url(&self, author: &str) -> Result<Url, GatewayError> {
        let mut url = self.base.clone();
        url.path_segments_mut()
            .map_err(|_| GatewayError::BaseUrl(self.base.to_string()))?
            .pop_if_empty()
            .push("author")
            .push(author);
        Ok(url)
    }
}

#[async_trait]
impl Gateway for PoetryDbGateway {
    async fn fetch_poems_by_author(&self, author: &str) -> Result<Vec<Document>, GatewayError> {
        let url = self.author_url(author)?;
        tracing::debug!(%url, "fetching author");
        let transport = |source| GatewayError::Transport { author: author.to_string(), source };
        let resp = self.client.get(url).send().await.map_err(transport)?;
        let status = resp.status();
        if !status.is_success() {
            return Err(GatewayError::Status { author: author.to_string(), status });
        }
        let body: serde_json::Value = resp.json().await.map_err(transport)?;
        let docs = parse_author_payload(author, body)?;
        tracing::info!(author, poems = docs.len(), "fetched author");
        Ok(docs)
    }
}

/// Turns a `/author/{name}` response into documents attributed to `author`.
pub fn parse_author_payload(author: &str, body: serde_json::Value) -> Result<Vec<Document>, GatewayError> {
    let serde_json::Value::Array(items) = body else {
        // PoetryDB reports unknown authors as {"status": 404, "reason": "Not found"}
        return Err(GatewayError::Format { author: author.to_string(), reason: "expected an array of poems".into() });
    };
    let mut docs = Vec::with_capacity(items.len());
    for item in items {
        match serde_json::from_value::<RemotePoem>(item) {
            Ok(poem) => docs.push(Document::new(author, poem.title, poem.lines)),
            Err(e) => tracing::debug!(author, error = %e, "skipping malformed poem"),
        }
    }
    Ok(docs)
}
