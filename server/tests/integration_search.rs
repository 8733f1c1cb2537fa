use async_trait::async_trait;
use axum::body::{Body, Bytes};
use axum::http::{Request, StatusCode};
use axum::Router;
use http_body_util::BodyExt;
use serde_json::Value;
use server::gateway::{Gateway, GatewayError};
use server::service::SearchService;
use server::{build_app, HttpConfig};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::tempdir;
use tower::ServiceExt;
use verse_core::persist::CorpusStore;
use verse_core::{Document, EngineConfig};

const TOKEN: &str = "s3cret";

#[derive(Default)]
struct FakeGateway {
    poems: HashMap<String, Vec<Document>>,
    calls: Mutex<Vec<String>>,
}

impl FakeGateway {
    fn with(mut self, author: &str, titles: &[(&str, &str)]) -> Self {
        let docs = titles
            .iter()
            .map(|(title, line)| Document::new(author, *title, vec![line.to_string()]))
            .collect();
        self.poems.insert(author.to_string(), docs);
        self
    }

    fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl Gateway for FakeGateway {
    async fn fetch_poems_by_author(&self, author: &str) -> Result<Vec<Document>, GatewayError> {
        self.calls.lock().unwrap().push(author.to_string());
        Ok(self.poems.get(author).cloned().unwrap_or_default())
    }
}

fn poem(author: &str, title: &str, line: &str) -> Document {
    Document::new(author, title, vec![line.to_string()])
}

fn sample_poems() -> Vec<Document> {
    vec![
        poem("Edgar Allan Poe", "The Raven", "Quoth the Raven \"Nevermore.\""),
        poem("Edgar Allan Poe", "Annabel Lee", "In a kingdom by the sea"),
        poem("Emily Dickinson", "Hope is the thing with feathers", "That perches in the soul"),
        poem("Emily Dickinson", "A Raven's Cousin", "A raven in the snow"),
        poem("Robert Frost", "The Road Not Taken", "Two roads diverged in a yellow wood"),
    ]
}

fn quiet_config() -> EngineConfig {
    let mut config = EngineConfig::default().without_background();
    config.availability_retries = 2;
    config.availability_retry_delay_ms = 10;
    config
}

fn service_with(config: EngineConfig, gateway: Arc<FakeGateway>) -> Arc<SearchService> {
    let store = CorpusStore::in_memory(config).unwrap();
    SearchService::new(Arc::new(store), gateway)
}

fn app_for(service: Arc<SearchService>) -> Router {
    build_app(service, HttpConfig { admin_token: Some(TOKEN.into()), cors_allow_origin: None })
}

async fn call(app: Router, req: Request<Body>) -> (StatusCode, Bytes) {
    let resp = app.oneshot(req).await.unwrap();
    let status = resp.status();
    let body = resp.into_body().collect().await.unwrap().to_bytes();
    (status, body)
}

async fn get(app: Router, uri: &str) -> (StatusCode, Bytes) {
    call(app, Request::get(uri).body(Body::empty()).unwrap()).await
}

async fn post_json(app: Router, uri: &str, token: Option<&str>, body: Value) -> (StatusCode, Bytes) {
    let mut req = Request::post(uri).header("content-type", "application/json");
    if let Some(token) = token {
        req = req.header("X-ADMIN-TOKEN", token);
    }
    call(app, req.body(Body::from(body.to_string())).unwrap()).await
}

#[tokio::test]
async fn author_query_ranks_author_poems_first() {
    let gateway = Arc::new(FakeGateway::default());
    let service = service_with(quiet_config(), Arc::clone(&gateway));
    service.ingest(sample_poems()).await.unwrap();
    let app = app_for(service);

    let (status, body) = get(app, "/search?q=edgar%20allan%20poe%20raven&k=5").await;
    assert_eq!(status, StatusCode::OK);
    let json: Value = serde_json::from_slice(&body).unwrap();
    let results = json["results"].as_array().unwrap();
    let titles: Vec<&str> = results.iter().map(|r| r["title"].as_str().unwrap()).collect();
    assert_eq!(&titles[..2], &["The Raven", "Annabel Lee"]);
    assert_eq!(results[0]["score"].as_f64().unwrap(), 1_010_100.0);
    assert_eq!(results[1]["score"].as_f64().unwrap(), 1_000_000.0);
    assert!(titles.contains(&"A Raven's Cousin"));
    assert_eq!(results[0]["snippet"].as_str().unwrap(), "Quoth the <em>Raven</em> \"Nevermore.\"");
    // served from the corpus, the remote source is never asked
    assert!(gateway.calls().is_empty());
}

#[tokio::test]
async fn title_query_without_author_uses_full_text() {
    let service = service_with(quiet_config(), Arc::new(FakeGateway::default()));
    service.ingest(sample_poems()).await.unwrap();

    let results = service.search("the road not taken").await;
    assert_eq!(results[0].document.title, "The Road Not Taken");

    assert!(service.search("").await.is_empty());
    assert!(service.search("  \t").await.is_empty());
}

#[tokio::test]
async fn unknown_author_is_fetched_then_indexed() {
    let gateway = Arc::new(FakeGateway::default().with(
        "Percy Bysshe Shelley",
        &[("Ozymandias", "I met a traveller from an antique land"), ("To a Skylark", "Hail to thee, blithe Spirit!")],
    ));
    let mut config = quiet_config();
    config.background_enabled = true;
    let service = service_with(config, Arc::clone(&gateway));
    service.ingest(sample_poems()).await.unwrap();
    let built_before = service.index().build_count();

    let results = service.search("percy bysshe shelley").await;
    let titles: Vec<&str> = results.iter().map(|r| r.document.title.as_str()).collect();
    assert_eq!(titles, vec!["Ozymandias", "To a Skylark"]);
    assert!(results.iter().all(|r| r.score == 1_000_000.0));
    assert_eq!(gateway.calls(), vec!["Percy Bysshe Shelley"]);
    assert!(service.prefetch().is_prefetched("Percy Bysshe Shelley"));

    // the rebuild runs in the background
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while service.index().build_count() == built_before {
        assert!(tokio::time::Instant::now() < deadline, "index never rebuilt");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    let results = service.search("ozymandias").await;
    assert_eq!(results[0].document.title, "Ozymandias");

    // second time around the corpus answers
    service.search("percy bysshe shelley").await;
    assert_eq!(gateway.calls().len(), 1);
}

#[tokio::test]
async fn empty_corpus_gives_empty_results() {
    let service = service_with(quiet_config(), Arc::new(FakeGateway::default()));
    assert!(service.search("raven").await.is_empty());
    assert_eq!(service.index().build_count(), 0);
    assert!(!service.readiness().snapshot().index_ready);
}

#[tokio::test]
async fn admin_endpoints_require_token() {
    let service = service_with(quiet_config(), Arc::new(FakeGateway::default()));
    let app = app_for(service);
    let docs = serde_json::to_value(sample_poems()).unwrap();

    let (status, _) = post_json(app.clone(), "/poems", None, docs.clone()).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    let (status, _) = post_json(app.clone(), "/poems", Some("wrong"), docs.clone()).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    let (status, _) = post_json(app.clone(), "/index/rebuild", None, Value::Null).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let no_token = build_app(
        service_with(quiet_config(), Arc::new(FakeGateway::default())),
        HttpConfig::default(),
    );
    let (status, _) = post_json(no_token, "/poems", Some(TOKEN), docs).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn ingest_endpoint_stores_and_indexes() {
    let dir = tempdir().unwrap();
    let store = CorpusStore::open(dir.path(), quiet_config()).unwrap();
    let service = SearchService::new(Arc::new(store), Arc::new(FakeGateway::default()));
    let app = app_for(Arc::clone(&service));

    let (status, _) = get(app.clone(), "/ready?timeout_ms=20").await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);

    let invalid = serde_json::json!([{"author": "", "title": "Nameless", "lines": ["x"]}]);
    let (status, _) = post_json(app.clone(), "/poems", Some(TOKEN), invalid).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let mut docs = serde_json::to_value(sample_poems()).unwrap();
    docs.as_array_mut().unwrap().push(serde_json::json!({"author": "Nobody", "title": "Empty", "lines": []}));
    let (status, body) = post_json(app.clone(), "/poems", Some(TOKEN), docs).await;
    assert_eq!(status, StatusCode::OK);
    let json: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(json["stored"], 5);
    assert_eq!(json["skipped"], 1);
    assert_eq!(json["total"], 5);

    let (status, body) = get(app.clone(), "/available").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(serde_json::from_slice::<Value>(&body).unwrap()["available"], true);

    let (status, _) = get(app.clone(), "/ready?timeout_ms=1000").await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = get(app.clone(), "/poem/the%20raven").await;
    assert_eq!(status, StatusCode::OK);
    let doc: Document = serde_json::from_slice(&body).unwrap();
    assert_eq!(doc.title, "The Raven");
    let (status, _) = get(app.clone(), "/poem/Lenore").await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, body) = post_json(app.clone(), "/index/rebuild", Some(TOKEN), Value::Null).await;
    assert_eq!(status, StatusCode::OK);
    let json: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(json["outcome"], "built");
    assert_eq!(json["docs"], 5);

    let (status, body) = get(app, "/search?q=nevermore").await;
    assert_eq!(status, StatusCode::OK);
    let json: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(json["total_hits"], 1);
    assert_eq!(json["results"][0]["author"], "Edgar Allan Poe");
}
