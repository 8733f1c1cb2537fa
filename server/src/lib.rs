pub mod fetch;
pub mod gateway;
pub mod loader;
pub mod prefetch;
pub mod readiness;
pub mod service;

use axum::{extract::{Path, Query, State}, http::{HeaderMap, StatusCode}, routing::{get, post}, Json, Router};
use serde::{Deserialize, Serialize};
use service::SearchService;
use std::sync::Arc;
use std::time::Duration;
use time::format_description::well_known::Rfc3339;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;
use verse_core::index::BuildOutcome;
use verse_core::tokenizer::words;
use verse_core::{Document, StoreError};

#[derive(Deserialize)]
pub struct SearchParams {
    pub q: String,
    #[serde(default = "default_k")]
    pub k: usize,
}
fn default_k() -> usize { 10 }

#[derive(Serialize)]
pub struct SearchResponse {
    pub query: String,
    pub took_s: f64,
    pub total_hits: usize,
    pub results: Vec<SearchHit>,
}

#[derive(Serialize)]
pub struct SearchHit {
    pub author: String,
    pub title: String,
    pub score: f64,
    pub snippet: Option<String>,
}

#[derive(Deserialize)]
pub struct ReadyParams {
    #[serde(default = "default_ready_timeout")]
    pub timeout_ms: u64,
}
fn default_ready_timeout() -> u64 { 5_000 }
const MAX_READY_TIMEOUT_MS: u64 = 60_000;

/// HTTP-facing settings. `cors_allow_origin` is a comma-separated origin list; any origin when unset.
#[derive(Debug, Clone, Default)]
pub struct HttpConfig {
    pub admin_token: Option<String>,
    pub cors_allow_origin: Option<String>,
}

#[derive(Clone)]
pub struct AppState {
    pub service: Arc<SearchService>,
    pub admin_token: Option<String>,
}

pub fn build_app(service: Arc<SearchService>, http: HttpConfig) -> Router {
    let cors = match http.cors_allow_origin.as_deref() {
        Some(val) => {
            let origins: Vec<_> = val
                .split(',')
                .filter_map(|s| s.trim().parse().ok())
                .collect();
            if origins.is_empty() {
                CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any)
            } else {
                CorsLayer::new().allow_origin(AllowOrigin::list(origins)).allow_methods(Any).allow_headers(Any)
            }
        }
        None => CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any),
    };

    let state = AppState { service, admin_token: http.admin_token };
    Router::new()
        .route("/health", get(|| async { "ok" }))
        .route("/search", get(search_handler))
        .route("/available", get(available_handler))
        .route("/ready", get(ready_handler))
        .route("/poem/:title", get(poem_handler))
        .route("/poems", post(ingest_handler))
        .route("/index/rebuild", post(rebuild_handler))
        .with_state(state)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
}

pub async fn search_handler(State(state): State<AppState>, Query(params): Query<SearchParams>) -> Json<SearchResponse> {
    let start = std::time::Instant::now();
    let results = state.service.search(&params.q).await;
    let total_hits = results.len();
    let k = params.k.clamp(1, 100);
    let terms = words(&params.q);
    let results = results
        .into_iter()
        .take(k)
        .map(|r| SearchHit {
            snippet: snippet(&r.document, &terms),
            author: r.document.author,
            title: r.document.title,
            score: r.score,
        })
        .collect();
    Json(SearchResponse { query: params.q, took_s: start.elapsed().as_secs_f64(), total_hits, results })
}

async fn available_handler(State(state): State<AppState>) -> Json<serde_json::Value> {
    let available = state.service.is_available().await;
    let meta = state.service.metadata().await;
    Json(serde_json::json!({
        "available": available,
        "total_documents": meta.as_ref().map(|m| m.total_documents),
        "last_updated": meta.and_then(|m| m.last_updated.format(&Rfc3339).ok()),
    }))
}

async fn ready_handler(State(state): State<AppState>, Query(params): Query<ReadyParams>) -> (StatusCode, Json<serde_json::Value>) {
    let timeout = Duration::from_millis(params.timeout_ms.min(MAX_READY_TIMEOUT_MS));
    let ready = state.service.wait_until_ready(timeout).await;
    let status = if ready { StatusCode::OK } else { StatusCode::SERVICE_UNAVAILABLE };
    (status, Json(serde_json::json!({ "ready": ready })))
}

async fn poem_handler(State(state): State<AppState>, Path(title): Path<String>) -> Result<Json<Document>, (StatusCode, String)> {
    state
        .service
        .find_by_title(&title)
        .await
        .map(Json)
        .ok_or((StatusCode::NOT_FOUND, "not found".into()))
}

/// The first line mentioning a query word, with matches wrapped in `<em>`.
fn snippet(doc: &Document, terms: &[String]) -> Option<String> {
    let first = doc.lines.iter().find(|l| !l.trim().is_empty())?;
    if terms.is_empty() {
        return Some(first.clone());
    }
    let alternation = terms.iter().map(|t| regex::escape(t)).collect::<Vec<_>>().join("|");
    let pat = match regex::RegexBuilder::new(&format!(r"\b(?:{})", alternation)).case_insensitive(true).build() {
        Ok(pat) => pat,
        Err(_) => return Some(first.clone()),
    };
    let line = doc.lines.iter().find(|l| pat.is_match(l)).unwrap_or(first);
    Some(pat.replace_all(line, |caps: &regex::Captures| format!("<em>{}</em>", &caps[0])).to_string())
}

// --- Admin endpoints ---
#[derive(Serialize)]
struct IngestResponse {
    stored: usize,
    skipped: usize,
    total: u64,
}

async fn ingest_handler(State(state): State<AppState>, headers: HeaderMap, Json(docs): Json<Vec<Document>>) -> Result<Json<IngestResponse>, (StatusCode, String)> {
    authorize(&state, &headers)?;
    match state.service.ingest(docs).await {
        Ok(report) => Ok(Json(IngestResponse { stored: report.stored, skipped: report.skipped, total: report.total })),
        Err(e @ StoreError::NoValidDocuments { .. }) => Err((StatusCode::BAD_REQUEST, e.to_string())),
        Err(e) => {
            tracing::warn!(error = %e, "ingest failed");
            Err((StatusCode::SERVICE_UNAVAILABLE, e.to_string()))
        }
    }
}

async fn rebuild_handler(State(state): State<AppState>, headers: HeaderMap) -> Result<Json<serde_json::Value>, (StatusCode, String)> {
    authorize(&state, &headers)?;
    let body = match state.service.rebuild_index().await {
        Some(BuildOutcome::Built { docs }) => serde_json::json!({ "outcome": "built", "docs": docs }),
        Some(BuildOutcome::EmptyCorpus) => serde_json::json!({ "outcome": "empty_corpus", "docs": 0 }),
        Some(BuildOutcome::Fresh | BuildOutcome::InFlight) | None => {
            return Err((StatusCode::SERVICE_UNAVAILABLE, "index build did not run".into()))
        }
    };
    Ok(Json(body))
}

fn authorize(state: &AppState, headers: &HeaderMap) -> Result<(), (StatusCode, String)> {
    let required = match &state.admin_token {
        Some(t) => t,
        None => return Err((StatusCode::UNAUTHORIZED, "ADMIN_TOKEN not set".into())),
    };
    let provided = headers.get("X-ADMIN-TOKEN").and_then(|v| v.to_str().ok()).unwrap_or("");
    if provided == required.as_str() {
        Ok(())
    } else {
        Err((StatusCode::UNAUTHORIZED, "invalid admin token".into()))
    }
}
