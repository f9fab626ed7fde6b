//! `quarry`: index a codebase and retrieve ranked context for questions about it.
//!
//! ```bash
//! quarry index ./my-project
//! quarry query "where is the retry policy configured?" -k 8
//! quarry query "how are tokens refreshed" --language python --prompt
//! quarry stats
//! quarry reset
//! ```

mod config;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, bail};
use clap::{Parser, Subcommand};
use quarry_index::embedding::{Embedder, HashEmbedder};
#[cfg(feature = "ollama")]
use quarry_index::embedding::OllamaEmbedder;
use quarry_index::in_memory_store::InMemoryVectorStore;
use quarry_index::sqlite_store::SqliteVectorStore;
use quarry_index::vector_store::VectorStore;
use quarry_index::{
    AnswerRequest, CodeIndexer, CodeRetriever, IndexCatalog, IndexError, IngestReport, Lang,
    RetrievalResult,
};
use tokio_util::sync::CancellationToken;

use crate::config::{Config, EmbeddingConfig, EmbeddingProvider, StorageBackend};

#[derive(Parser)]
#[command(
    name = "quarry",
    version,
    about = "Index a codebase into semantic chunks and retrieve ranked context for questions about it"
)]
struct Cli {
    /// Path to the configuration file (TOML).
    ///
    /// Defaults to `$QUARRY_CONFIG`, then `.quarry/config.toml`.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Project (collection) name; overrides the configured or derived one.
    ///
    /// Without it, `index DIR` uses DIR's name and every other command uses
    /// the current directory's name.
    #[arg(long, global = true)]
    project: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Index a file or directory. Unchanged chunks are not re-embedded.
    ///
    /// A directory is the project root; a single file is stored relative to
    /// the current directory. Ctrl-C stops between documents; files already
    /// stored stay stored.
    Index {
        #[arg(default_value = ".")]
        path: PathBuf,
        /// Print the ingestion report as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Retrieve the code most relevant to a question.
    Query {
        question: String,
        /// Number of chunks to return (default: `retrieval.top_k`).
        #[arg(short, long)]
        k: Option<usize>,
        /// Restrict results to one language, e.g. `rust` or `python`.
        #[arg(long)]
        language: Option<String>,
        /// Print the prompt for an answer-generation model instead of the chunks.
        #[arg(long, conflicts_with = "json")]
        prompt: bool,
        #[arg(long)]
        json: bool,
    },

    /// Show record counts for the project.
    Stats {
        #[arg(long)]
        json: bool,
    },

    /// Delete the project's index.
    Reset,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config_path = Config::resolve_path(cli.config.as_deref());
    let config = Config::load(&config_path)?;
    tracing::debug!(path = %config_path.display(), "configuration loaded");

    let catalog = open_catalog(&config).await?;
    let outcome = run(cli.command, cli.project, &config, &catalog).await;
    catalog.close().await;
    outcome
}

async fn run(
    command: Command,
    project: Option<String>,
    config: &Config,
    catalog: &IndexCatalog,
) -> anyhow::Result<()> {
    let project_for = |root: &Path| project.clone().unwrap_or_else(|| config.project_name(root));

    match command {
        Command::Index { path, json } => {
            let project_root = if path.is_dir() {
                path.clone()
            } else {
                std::env::current_dir().context("failed to read the current directory")?
            };
            let store = catalog.open(&project_for(&project_root)).await?;
            let indexer = CodeIndexer::new(store, config.indexer_config(&project_root));

            let cancel = CancellationToken::new();
            let on_signal = cancel.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    tracing::info!("interrupt received, stopping after the current document");
                    on_signal.cancel();
                }
            });

            let report = indexer
                .index_project(&path, &cancel)
                .await
                .with_context(|| format!("indexing {} failed", path.display()))?;
            if json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                let indexed = indexer.store().project();
                print_report(indexed, &report);
                if indexed != project_for(Path::new(".")) {
                    println!("query it from here with --project {indexed}");
                }
            }
        }
        Command::Query {
            question,
            k,
            language,
            prompt,
            json,
        } => {
            let project = project_for(Path::new("."));
            let store = catalog.open(&project).await?;
            let retriever = CodeRetriever::new(store, config.retrieval_config());
            let k = k.unwrap_or(config.retrieval.top_k);

            let result = match language.as_deref() {
                Some(id) => {
                    let Some(lang) = Lang::from_id(&id.to_lowercase()) else {
                        bail!("unknown language '{id}'");
                    };
                    retriever.retrieve_filtered(&question, k, lang).await
                }
                None => retriever.retrieve(&question, k).await,
            };
            let result = match result {
                Ok(result) => result,
                Err(e @ (IndexError::EmbeddingUnavailable(_) | IndexError::Timeout { .. })) => {
                    bail!("search unavailable: {e}");
                }
                Err(e) => return Err(e.into()),
            };

            if json {
                println!("{}", serde_json::to_string_pretty(&result)?);
            } else if prompt {
                println!("{}", AnswerRequest::from_result(&result).prompt());
            } else {
                print_result(&project, &result);
            }
        }
        Command::Stats { json } => {
            let store = catalog.open(&project_for(Path::new("."))).await?;
            let stats = store.stats().await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&stats)?);
            } else {
                println!("project:   {}", stats.project);
                println!(
                    "embedder:  {} ({} dims)",
                    stats.model.as_deref().unwrap_or("-"),
                    stats.dimension.map_or_else(|| "-".to_owned(), |d| d.to_string())
                );
                println!("files:     {}", stats.files);
                println!("chunks:    {}", stats.records);
                for (kind, n) in &stats.by_kind {
                    println!("  {kind:<16} {n}");
                }
            }
        }
        Command::Reset => {
            let store = catalog.open(&project_for(Path::new("."))).await?;
            store.writer()?.reset().await?;
            println!("project '{}' reset", store.project());
        }
    }
    Ok(())
}

async fn open_catalog(config: &Config) -> anyhow::Result<IndexCatalog> {
    let backend: Arc<dyn VectorStore> = match config.storage.backend {
        StorageBackend::Sqlite => {
            let path = &config.storage.path;
            if let Some(parent) = path.parent()
                && !parent.as_os_str().is_empty()
            {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("failed to create {}", parent.display()))?;
            }
            let store = SqliteVectorStore::open(&path.to_string_lossy())
                .await
                .with_context(|| format!("failed to open index at {}", path.display()))?;
            Arc::new(store)
        }
        StorageBackend::Memory => Arc::new(InMemoryVectorStore::new()),
    };
    let embedder = build_embedder(&config.embedding)?;
    Ok(IndexCatalog::new(backend, embedder, config.store_config()))
}

fn build_embedder(config: &EmbeddingConfig) -> anyhow::Result<Arc<dyn Embedder>> {
    match config.provider {
        EmbeddingProvider::Hash => Ok(Arc::new(HashEmbedder::new(config.dimension))),
        #[cfg(feature = "ollama")]
        EmbeddingProvider::Ollama => Ok(Arc::new(OllamaEmbedder::new(
            &config.base_url,
            config.model.clone(),
        ))),
        #[cfg(not(feature = "ollama"))]
        EmbeddingProvider::Ollama => {
            bail!("built without the `ollama` feature; set embedding.provider = \"hash\"")
        }
    }
}

fn print_report(project: &str, report: &IngestReport) {
    println!(
        "{project}: {} documents, {} chunks ({} embedded, {} unchanged), {} removed",
        report.documents_loaded,
        report.chunks_produced,
        report.chunks_embedded,
        report.chunks_unchanged,
        report.chunks_removed,
    );
    if report.files_removed > 0 {
        println!("{} deleted files dropped from the index", report.files_removed);
    }
    if !report.warnings.is_empty() {
        println!("{} warnings:", report.warnings.len());
        for warning in &report.warnings {
            println!("  {warning}");
        }
    }
    if report.cancelled {
        println!("cancelled before completion; run again to finish");
    }
}

fn print_result(project: &str, result: &RetrievalResult) {
    if result.is_empty() {
        println!("no relevant code found in project '{project}'");
        return;
    }
    for (i, chunk) in result.chunks.iter().enumerate() {
        println!("[{}] {}  score {:.2}", i + 1, chunk.citation(), chunk.score);
        println!("{}\n", chunk.chunk.text);
    }
    println!(
        "{} chunks, {} tokens, {} candidates",
        result.chunks.len(),
        result.total_tokens,
        result.candidates
    );
}
