//! Project ingestion: load → chunk → diff → embed → store.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use serde::Serialize;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::chunker::{ChunkerConfig, chunk_document};
use crate::error::{IndexError, Result};
use crate::loader::{LoadWarning, Loader, LoaderConfig, SourceDocument, document_path};
use crate::parser::ParseFailure;
use crate::store::{CodeStore, StoreWriter};

/// Documents buffered between the filesystem walk and the embedding stage.
const DOCUMENT_QUEUE: usize = 16;

#[derive(Debug, Clone, Default)]
pub struct IndexerConfig {
    pub loader: LoaderConfig,
    pub chunker: ChunkerConfig,
    /// Directory stored paths are relative to. Without one, an ingested
    /// directory is its own root and a lone file is stored by absolute path.
    pub project_root: Option<PathBuf>,
}

/// Per-file problem that did not stop the run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum IngestWarning {
    Load(LoadWarning),
    Parse(ParseFailure),
}

impl std::fmt::Display for IngestWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Load(w) => write!(f, "skipped {w}"),
            Self::Parse(p) => write!(f, "parse failed, windowed {p}"),
        }
    }
}

/// Summary of an ingestion run.
#[derive(Debug, Default, Serialize)]
pub struct IngestReport {
    pub documents_loaded: usize,
    pub chunks_produced: usize,
    /// Chunks sent to the embedding backend.
    pub chunks_embedded: usize,
    /// Chunks whose id and content hash were already stored.
    pub chunks_unchanged: usize,
    pub chunks_removed: usize,
    pub files_removed: usize,
    pub warnings: Vec<IngestWarning>,
    pub cancelled: bool,
    pub duration_ms: u64,
}

/// Orchestrates ingestion of a file or project tree into one project.
#[derive(Debug, Clone)]
pub struct CodeIndexer {
    store: CodeStore,
    config: IndexerConfig,
}

impl CodeIndexer {
    #[must_use]
    pub fn new(store: CodeStore, config: IndexerConfig) -> Self {
        Self { store, config }
    }

    #[must_use]
    pub fn store(&self) -> &CodeStore {
        &self.store
    }

    /// Ingest `root` (a file or directory) with incremental change detection.
    ///
    /// Cancellation is honored between documents; a document already being
    /// chunked and stored is finished first.
    ///
    /// # Errors
    ///
    /// - [`IndexError::IngestionInProgress`] if the project is being ingested elsewhere.
    /// - [`IndexError::Io`] if `root` does not exist.
    /// - Embedding and store errors, which abort the run. Documents stored
    ///   before the failure stay stored.
    pub async fn index_project(
        &self,
        root: &Path,
        cancel: &CancellationToken,
    ) -> Result<IngestReport> {
        let start = std::time::Instant::now();
        let writer = self.store.writer()?;
        let mut report = IngestReport::default();

        let is_dir = tokio::fs::metadata(root).await?.is_dir();
        let scope = self.scope(root).await?;
        let (tx, mut rx) = mpsc::channel(DOCUMENT_QUEUE);
        let walker = spawn_loader(
            Loader::new(self.config.loader.clone()),
            root.to_path_buf(),
            self.config.project_root.clone(),
            tx,
        );

        tracing::info!(project = self.store.project(), root = %root.display(), "indexing started");

        let mut seen: HashSet<String> = HashSet::new();
        loop {
            let item = tokio::select! {
                biased;
                () = cancel.cancelled() => {
                    report.cancelled = true;
                    break;
                }
                item = rx.recv() => item,
            };
            let Some(item) = item else { break };

            match item {
                Ok(doc) => {
                    report.documents_loaded += 1;
                    seen.insert(doc.path.clone());
                    self.ingest_document(&writer, &doc, &mut report).await?;
                }
                Err(warning) => {
                    tracing::warn!(path = %warning.path, reason = %warning.reason, "file skipped");
                    seen.insert(warning.path.clone());
                    report.warnings.push(IngestWarning::Load(warning));
                }
            }
        }

        drop(rx);
        walker
            .await
            .map_err(|e| IndexError::Other(format!("loader task failed: {e}")))??;

        if is_dir && !report.cancelled {
            self.remove_vanished(&writer, &scope, &seen, &mut report).await?;
        }

        report.duration_ms = start.elapsed().as_millis().try_into().unwrap_or(u64::MAX);
        tracing::info!(
            documents = report.documents_loaded,
            chunks = report.chunks_produced,
            embedded = report.chunks_embedded,
            unchanged = report.chunks_unchanged,
            removed = report.chunks_removed,
            warnings = report.warnings.len(),
            cancelled = report.cancelled,
            duration_ms = report.duration_ms,
            "indexing finished"
        );
        Ok(report)
    }

    async fn ingest_document(
        &self,
        writer: &StoreWriter,
        doc: &SourceDocument,
        report: &mut IngestReport,
    ) -> Result<()> {
        let output = chunk_document(doc, &self.config.chunker);
        if let Some(failure) = output.parse_failure {
            report.warnings.push(IngestWarning::Parse(failure));
        }
        report.chunks_produced += output.chunks.len();

        let existing = writer.existing(&doc.path).await?;
        let (unchanged, changed): (Vec<_>, Vec<_>) = output
            .chunks
            .into_iter()
            .partition(|c| existing.get(&c.chunk_id) == Some(&c.content_hash));

        let embedded = writer.upsert(&changed).await?;
        let current: HashSet<String> = unchanged
            .iter()
            .chain(&changed)
            .map(|c| c.chunk_id.clone())
            .collect();
        let removed = writer.delete_stale(&doc.path, &current).await?;

        report.chunks_embedded += embedded;
        report.chunks_unchanged += unchanged.len();
        report.chunks_removed += removed;

        tracing::debug!(
            path = %doc.path,
            embedded,
            unchanged = unchanged.len(),
            removed,
            "document indexed"
        );
        Ok(())
    }

    /// Stored-path prefix covered by an ingestion of `root`; empty when
    /// `root` is the project root itself.
    async fn scope(&self, root: &Path) -> Result<String> {
        let root = tokio::fs::canonicalize(root).await?;
        let base = match &self.config.project_root {
            Some(base) => Some(tokio::fs::canonicalize(base).await?),
            None => None,
        };
        Ok(document_path(&root, base.as_deref().or(Some(root.as_path()))))
    }

    async fn remove_vanished(
        &self,
        writer: &StoreWriter,
        scope: &str,
        seen: &HashSet<String>,
        report: &mut IngestReport,
    ) -> Result<()> {
        for path in writer.indexed_paths().await? {
            if seen.contains(&path) || !in_scope(&path, scope) {
                continue;
            }
            let removed = writer.remove_path(&path).await?;
            tracing::debug!(path = %path, removed, "removed vanished file");
            report.files_removed += 1;
            report.chunks_removed += removed;
        }
        Ok(())
    }
}

fn in_scope(path: &str, scope: &str) -> bool {
    if scope.is_empty() {
        return !Path::new(path).is_absolute();
    }
    path.strip_prefix(scope)
        .is_some_and(|rest| rest.is_empty() || rest.starts_with('/') || scope.ends_with('/'))
}

/// Walk `root` on a blocking thread, streaming documents into `tx`.
/// Stops early once the receiver is dropped.
fn spawn_loader(
    loader: Loader,
    root: PathBuf,
    base: Option<PathBuf>,
    tx: mpsc::Sender<std::result::Result<SourceDocument, LoadWarning>>,
) -> tokio::task::JoinHandle<Result<()>> {
    tokio::task::spawn_blocking(move || {
        for item in loader.load_under(&root, base.as_deref())? {
            if tx.blocking_send(item).is_err() {
                break;
            }
        }
        Ok(())
    })
}
