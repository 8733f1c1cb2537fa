use anyhow::{Context, Result};
use axum::Router;
use clap::Parser;
use server::gateway::{PoetryDbGateway, POETRYDB_BASE};
use server::service::SearchService;
use server::{build_app, HttpConfig};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing_subscriber::{fmt, EnvFilter};
use verse_core::persist::CorpusStore;
use verse_core::EngineConfig;

#[derive(Parser)]
struct Args {
    /// Corpus store directory
    #[arg(long, env = "VERSEDEX_STORE", default_value = "./corpus")]
    store: PathBuf,
    /// Optional JSON file overriding engine defaults
    #[arg(long, env = "VERSEDEX_CONFIG")]
    config: Option<PathBuf>,
    /// Base URL of the PoetryDB-compatible source
    #[arg(long, env = "VERSEDEX_GATEWAY", default_value = POETRYDB_BASE)]
    gateway: String,
    /// Host to bind
    #[arg(long, default_value = "0.0.0.0")]
    host: String,
    /// Port to bind
    #[arg(long, default_value_t = 8080)]
    port: u16,
    #[arg(long, env = "ADMIN_TOKEN")]
    admin_token: Option<String>,
    /// Comma-separated allowed origins
    #[arg(long, env = "CORS_ALLOW_ORIGIN")]
    cors_allow_origin: Option<String>,
    /// Disable prefetching, background refresh and background rebuilds
    #[arg(long, default_value_t = false)]
    no_background: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    fmt().with_env_filter(EnvFilter::from_default_env()).init();
    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => EngineConfig::from_json_file(path)?,
        None => EngineConfig::default(),
    };
    if args.no_background {
        config = config.without_background();
    }

    let store = CorpusStore::open(&args.store, config)
        .with_context(|| format!("opening corpus store {}", args.store.display()))?;
    let gateway = PoetryDbGateway::new(&args.gateway)?;
    let service = SearchService::new(Arc::new(store), Arc::new(gateway));
    service.start();

    let app: Router = build_app(service, HttpConfig { admin_token: args.admin_token, cors_allow_origin: args.cors_allow_origin });
    let addr: SocketAddr = format!("{}:{}", args.host, args.port).parse()?;
    let listener = TcpListener::bind(addr).await?;
    tracing::info!(%addr, store = %args.store.display(), "server listening");
    axum::serve(listener, app).await?;
    Ok(())
}
