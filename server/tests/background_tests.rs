use async_trait::async_trait;
use server::fetch::AuthorFetcher;
use server::gateway::{Gateway, GatewayError};
use server::loader::{CorpusLoader, LoadError};
use server::prefetch::PrefetchCoordinator;
use server::readiness::Readiness;
use server::service::SearchService;
use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use time::OffsetDateTime;
use tokio::sync::Semaphore;
use verse_core::authors::AuthorMatcher;
use verse_core::persist::CorpusStore;
use verse_core::{Document, EngineConfig};

/// One poem per author. Fetches park on `gate` until it is opened; `failing` authors error out.
struct ScriptedGateway {
    started: Mutex<Vec<String>>,
    gate: Semaphore,
    failing: HashSet<String>,
    known: Option<HashSet<String>>,
}

impl ScriptedGateway {
    fn open() -> Self {
        Self { started: Mutex::new(Vec::new()), gate: Semaphore::new(Semaphore::MAX_PERMITS), failing: HashSet::new(), known: None }
    }

    fn closed() -> Self {
        Self { gate: Semaphore::new(0), ..Self::open() }
    }

    fn knowing(authors: &[&str]) -> Self {
        Self { known: Some(authors.iter().map(|a| a.to_string()).collect()), ..Self::open() }
    }

    fn failing(mut self, author: &str) -> Self {
        self.failing.insert(author.to_string());
        self
    }

    fn release(&self) {
        self.gate.add_permits(1_000);
    }

    fn started(&self) -> Vec<String> {
        self.started.lock().unwrap().clone()
    }
}

#[async_trait]
impl Gateway for ScriptedGateway {
    async fn fetch_poems_by_author(&self, author: &str) -> Result<Vec<Document>, GatewayError> {
        self.started.lock().unwrap().push(author.to_string());
        let _permit = self.gate.acquire().await.map_err(|_| GatewayError::Format {
            author: author.to_string(),
            reason: "gate closed".into(),
        })?;
        if self.failing.contains(author) {
            return Err(GatewayError::Format { author: author.to_string(), reason: "scripted failure".into() });
        }
        if self.known.as_ref().is_some_and(|k| !k.contains(author)) {
            return Ok(Vec::new());
        }
        Ok(vec![Document::new(author, format!("A Poem by {author}"), vec!["a line".into()])])
    }
}

async fn eventually(what: &str, mut cond: impl FnMut() -> bool) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while !cond() {
        assert!(tokio::time::Instant::now() < deadline, "timed out waiting for {what}");
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

fn coordinator(gateway: Arc<ScriptedGateway>, config: &EngineConfig) -> PrefetchCoordinator {
    let store = Arc::new(CorpusStore::in_memory(config.clone()).unwrap());
    let fetcher = Arc::new(AuthorFetcher::new(store, gateway));
    PrefetchCoordinator::new(fetcher, Arc::new(AuthorMatcher::default()), config)
}

#[tokio::test]
async fn new_letter_cancels_unstarted_work() {
    let gateway = Arc::new(ScriptedGateway::closed());
    let config = EngineConfig::default();
    let prefetch = coordinator(Arc::clone(&gateway), &config);
    prefetch.mark_prefetched("Andrew Marvell");

    let batch_a = prefetch.start('a').unwrap();
    let a_targets = batch_a.target_authors.len();
    assert!(!batch_a.target_authors.iter().any(|a| a == "Andrew Marvell"));
    assert!(a_targets > 4);

    eventually("two fetches in flight", || gateway.started().len() == 2).await;
    let batch_b = prefetch.start('b').unwrap();
    assert!(batch_a.is_cancelled());
    assert!(!batch_b.is_cancelled());
    gateway.release();

    assert_eq!(batch_a.join().await, 2);
    assert_eq!(batch_b.join().await, 1);

    let started_a: Vec<String> = gateway.started().into_iter().filter(|a| a.starts_with('A')).collect();
    assert_eq!(started_a.len(), 2);
    for author in &started_a {
        assert!(prefetch.is_prefetched(author));
    }
    assert!(prefetch.is_prefetched("Andrew Marvell"));
    assert!(prefetch.is_prefetched("Ben Jonson"));

    // coming back to 'a' only targets what is still missing
    let again = prefetch.start('a').unwrap();
    assert_eq!(again.target_authors.len(), a_targets - 2);
    again.cancel();
    again.join().await;
}

#[test]
fn concurrent_starts_leave_one_batch_running() {
    let rt = tokio::runtime::Builder::new_multi_thread().worker_threads(2).enable_all().build().unwrap();
    let gateway = Arc::new(ScriptedGateway::closed());
    let prefetch = coordinator(Arc::clone(&gateway), &EngineConfig::default());

    let mut batches = Vec::new();
    for _ in 0..200 {
        let barrier = std::sync::Barrier::new(2);
        let (a, b) = std::thread::scope(|s| {
            let start = |letter| {
                let _rt = rt.enter();
                barrier.wait();
                prefetch.start(letter).unwrap()
            };
            let a = s.spawn(move || start('a'));
            let b = s.spawn(move || start('b'));
            (a.join().unwrap(), b.join().unwrap())
        });
        assert_eq!(
            [a.is_cancelled(), b.is_cancelled()].iter().filter(|c| !**c).count(),
            1,
            "exactly one of two racing batches must survive"
        );
        batches.push(a);
        batches.push(b);
    }

    prefetch.cancel_active();
    assert!(batches.iter().all(|b| b.is_cancelled()));
    rt.block_on(async {
        gateway.release();
        for batch in batches {
            batch.join().await;
        }
    });
}

#[tokio::test]
async fn failed_author_does_not_stop_batch() {
    let gateway = Arc::new(ScriptedGateway::open().failing("Ben Jonson"));
    let prefetch = coordinator(Arc::clone(&gateway), &EngineConfig::default());

    assert_eq!(prefetch.start('b').unwrap().join().await, 0);
    assert!(!prefetch.is_prefetched("Ben Jonson"));

    let batch = prefetch.start('h').unwrap();
    let targets = batch.target_authors.clone();
    assert_eq!(batch.join().await, targets.len());
    assert!(targets.iter().all(|a| prefetch.is_prefetched(a)));
    assert!(prefetch.start('h').is_none());
}

#[tokio::test]
async fn author_lookup_serves_store_hits_and_fetches_the_rest() {
    let gateway = Arc::new(ScriptedGateway::open().failing("Oscar Wilde"));
    let store = Arc::new(CorpusStore::in_memory(EngineConfig::default()).unwrap());
    store.put_batch(&[Document::new("John Keats", "To Autumn", vec!["Season of mists".into()])]).unwrap();
    let fetcher = AuthorFetcher::new(Arc::clone(&store), Arc::clone(&gateway) as Arc<dyn Gateway>);

    let got = fetcher.documents_for_all(&["John Keats", "Oscar Wilde", "Robert Burns"]).await;
    assert_eq!(got.len(), 3);
    assert_eq!(got[0].documents[0].title, "To Autumn");
    assert!(!got[0].fetched);
    // a failed fetch yields nothing and does not stop the others
    assert!(got[1].documents.is_empty() && !got[1].fetched);
    assert_eq!(got[2].documents[0].title, "A Poem by Robert Burns");
    assert!(got[2].fetched);

    assert_eq!(gateway.started(), vec!["Oscar Wilde", "Robert Burns"]);
    assert_eq!(store.count(), 2);
}

#[tokio::test]
async fn prefetch_is_off_without_background_work() {
    let gateway = Arc::new(ScriptedGateway::open());
    let prefetch = coordinator(Arc::clone(&gateway), &EngineConfig::default().without_background());
    assert!(prefetch.start('a').is_none());
    assert!(gateway.started().is_empty());
}

fn seed_config(authors: &[&str]) -> EngineConfig {
    EngineConfig::default()
        .with_seed_authors(authors.iter().map(|a| a.to_string()).collect())
        .with_seed_batch_pause(Duration::ZERO)
}

fn loader_for(store: Arc<CorpusStore>, gateway: Arc<ScriptedGateway>) -> (Arc<CorpusLoader>, Arc<Readiness>) {
    let readiness = Arc::new(Readiness::new());
    let config = store.config().clone();
    let fetcher = Arc::new(AuthorFetcher::new(store, gateway));
    (Arc::new(CorpusLoader::new(fetcher, Arc::clone(&readiness), config)), readiness)
}

#[tokio::test]
async fn empty_store_is_seeded_in_chunks() {
    let seeds = ["William Shakespeare", "Oscar Wilde", "Emily Dickinson"];
    let gateway = Arc::new(ScriptedGateway::open().failing("Oscar Wilde"));
    let store = Arc::new(CorpusStore::in_memory(seed_config(&seeds)).unwrap());
    let (loader, readiness) = loader_for(Arc::clone(&store), Arc::clone(&gateway));

    loader.initialize().await.unwrap();
    assert_eq!(gateway.started(), seeds);
    assert_eq!(store.count(), 2);
    assert!(readiness.snapshot().corpus_available);
    assert!(!readiness.snapshot().background_loading);
}

#[tokio::test]
async fn nothing_loaded_is_an_error() {
    let gateway = Arc::new(ScriptedGateway::knowing(&[]));
    let store = Arc::new(CorpusStore::in_memory(seed_config(&["Nobody", "Anybody"])).unwrap());
    let (loader, readiness) = loader_for(store, gateway);

    assert!(matches!(loader.initialize().await, Err(LoadError::NothingLoaded)));
    assert!(!readiness.snapshot().corpus_available);
}

#[tokio::test]
async fn fresh_corpus_is_used_as_is() {
    let gateway = Arc::new(ScriptedGateway::open());
    let store = Arc::new(CorpusStore::in_memory(seed_config(&["Walt Whitman"])).unwrap());
    store.put_batch(&[Document::new("Robert Burns", "A Red, Red Rose", vec!["O my Luve".into()])]).unwrap();
    let (loader, readiness) = loader_for(store, Arc::clone(&gateway));

    loader.initialize().await.unwrap();
    assert!(readiness.snapshot().corpus_available);
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(gateway.started().is_empty());
}

#[tokio::test]
async fn overdue_author_refresh_runs_in_background() {
    let seeds = ["Walt Whitman", "Robert Burns"];
    let gateway = Arc::new(ScriptedGateway::open());
    let store = Arc::new(CorpusStore::in_memory(seed_config(&seeds)).unwrap());
    let two_days_ago = OffsetDateTime::now_utc() - time::Duration::days(2);
    store
        .put_batch_at(&[Document::new("Robert Burns", "A Red, Red Rose", vec!["O my Luve".into()])], two_days_ago)
        .unwrap();
    let (loader, readiness) = loader_for(Arc::clone(&store), Arc::clone(&gateway));

    loader.initialize().await.unwrap();
    assert!(readiness.snapshot().corpus_available);
    eventually("background refresh", || gateway.started().len() == 2 && !readiness.snapshot().background_loading).await;
    assert_eq!(store.count(), 3);
    assert!(!store.should_refresh_authors());
}

#[tokio::test]
async fn started_service_becomes_ready() {
    let seeds = ["Emily Dickinson", "Edgar Allan Poe"];
    let config = seed_config(&seeds).with_readiness_quiet(Duration::from_millis(20)).without_background();
    let store = Arc::new(CorpusStore::in_memory(config).unwrap());
    let service = SearchService::new(store, Arc::new(ScriptedGateway::knowing(&seeds)));

    service.start().await.unwrap();
    assert!(service.wait_until_ready(Duration::from_secs(5)).await);
    assert!(service.index().is_ready());

    let results = service.search("emily dickinson").await;
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].document.title, "A Poem by Emily Dickinson");
}
