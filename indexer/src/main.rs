use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use time::format_description::well_known::Rfc3339;
use tracing_subscriber::{fmt, EnvFilter};
use verse_core::index::IndexBuilder;
use verse_core::persist::CorpusStore;
use verse_core::query::QueryEngine;
use verse_core::{Document, EngineConfig, StoreError};
use walkdir::WalkDir;

#[derive(Parser)]
#[command(name = "indexer")]
#[command(about = "Load poems into a corpus store and inspect it", long_about = None)]
struct Cli {
    /// Corpus store directory
    #[arg(long, global = true, default_value = "./corpus")]
    store: PathBuf,
    /// Optional JSON file overriding engine defaults
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Ingest poems from JSON/JSONL files or a directory of them
    Ingest {
        /// Input path (file or directory)
        #[arg(long)]
        input: PathBuf,
    },
    /// Print corpus metadata and availability
    Status,
    /// Run a full-text query against the corpus
    Query {
        q: String,
        #[arg(long, default_value_t = 10)]
        k: usize,
    },
}

fn main() -> Result<()> {
    fmt().with_env_filter(EnvFilter::from_default_env()).init();
    let cli = Cli::parse();
    let config = match &cli.config {
        Some(path) => EngineConfig::from_json_file(path)?,
        None => EngineConfig::default(),
    };
    let store = CorpusStore::open(&cli.store, config)
        .with_context(|| format!("opening corpus store {}", cli.store.display()))?;

    match cli.command {
        Commands::Ingest { input } => ingest(&store, &input),
        Commands::Status => status(&store),
        Commands::Query { q, k } => query(store, &q, k),
    }
}

fn ingest(store: &CorpusStore, input: &Path) -> Result<()> {
    let files = input_files(input);
    if files.is_empty() {
        anyhow::bail!("no .json or .jsonl files under {}", input.display());
    }

    let (mut stored, mut skipped) = (0usize, 0usize);
    for file in files {
        let docs = if file.extension().and_then(|s| s.to_str()) == Some("jsonl") {
            read_jsonl(&file)?
        } else {
            read_json(&file)?
        };
        match store.put_batch(&docs) {
            Ok(report) => {
                stored += report.stored;
                skipped += report.skipped;
            }
            Err(StoreError::NoValidDocuments { skipped: s }) => {
                tracing::warn!(file = %file.display(), skipped = s, "no valid poems in file");
                skipped += s;
            }
            Err(e) => return Err(e).with_context(|| format!("saving poems from {}", file.display())),
        }
    }

    tracing::info!(stored, skipped, total = store.count(), "ingest complete");
    Ok(())
}

fn input_files(input: &Path) -> Vec<PathBuf> {
    let mut files: Vec<PathBuf> = Vec::new();
    if input.is_dir() {
        for entry in WalkDir::new(input).sort_by_file_name().into_iter().filter_map(|e| e.ok()) {
            let p = entry.path();
            if p.is_file() {
                if let Some(ext) = p.extension().and_then(|s| s.to_str()) {
                    if matches!(ext, "json" | "jsonl") {
                        files.push(p.to_path_buf());
                    }
                }
            }
        }
    } else if input.is_file() {
        files.push(input.to_path_buf());
    }
    files
}

fn read_jsonl(file: &Path) -> Result<Vec<Document>> {
    let reader = BufReader::new(File::open(file)?);
    let mut docs = Vec::new();
    for (n, line) in reader.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() { continue; }
        let doc: Document = serde_json::from_str(&line)
            .with_context(|| format!("{}:{}", file.display(), n + 1))?;
        docs.push(doc);
    }
    Ok(docs)
}

/// A single poem object or an array of them, as PoetryDB returns.
fn read_json(file: &Path) -> Result<Vec<Document>> {
    let reader = BufReader::new(File::open(file)?);
    let json: serde_json::Value = serde_json::from_reader(reader)
        .with_context(|| format!("parsing {}", file.display()))?;
    let docs = match json {
        serde_json::Value::Array(arr) => arr
            .into_iter()
            .map(serde_json::from_value)
            .collect::<Result<Vec<Document>, _>>()?,
        serde_json::Value::Object(_) => vec![serde_json::from_value(json)?],
        _ => Vec::new(),
    };
    Ok(docs)
}

fn status(store: &CorpusStore) -> Result<()> {
    let Some(meta) = store.metadata() else {
        println!("no metadata");
        return Ok(());
    };
    println!("schema_version    {}", meta.schema_version);
    println!("total_documents   {}", meta.total_documents);
    println!("live_documents    {}", store.count());
    println!("last_updated      {}", meta.last_updated.format(&Rfc3339)?);
    println!("last_author_fetch {}", meta.last_author_fetch.format(&Rfc3339)?);
    println!("available         {}", store.is_available());
    println!("refresh_due       {}", store.should_refresh_authors());
    Ok(())
}

fn query(store: CorpusStore, q: &str, k: usize) -> Result<()> {
    let index = Arc::new(IndexBuilder::new(store.config().index_refresh()));
    let engine = QueryEngine::new(Arc::new(store), index);
    let results = engine.search(q);
    tracing::info!(hits = results.len(), "query complete");
    for r in results.into_iter().take(k) {
        println!("{:>10.4}  {}  {}", r.score, r.document.author, r.document.title);
    }
    Ok(())
}
