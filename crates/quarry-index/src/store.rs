//! Embedding store: per-project collections of embedded chunks.
//!
//! [`IndexCatalog`] is the long-lived resource owning the index backend and
//! the embedding function. [`IndexCatalog::open`] validates a project's
//! collection against the active embedder and returns a read handle,
//! [`CodeStore`]. Writes go through a [`StoreWriter`], of which at most one
//! exists per project at a time.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::{StreamExt, TryStreamExt};
use serde::Serialize;
use tokio::sync::OwnedMutexGuard;

use crate::chunker::{Chunk, ChunkKind};
use crate::context::contextualize_for_embedding;
use crate::embedding::Embedder;
use crate::error::{IndexError, Result};
use crate::vector_store::{CollectionInfo, Payload, VectorFilter, VectorPoint, VectorStore};

const MAX_PROJECT_NAME_LEN: usize = 64;

#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Texts per embedding call (default: 32).
    pub batch_size: usize,
    /// Embedding calls in flight per upsert (default: 4).
    pub embed_concurrency: usize,
    /// Deadline for one embedding call (default: 30s).
    pub embed_timeout: Duration,
    /// Deadline for one nearest-neighbor search (default: 10s).
    pub search_timeout: Duration,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            batch_size: 32,
            embed_concurrency: 4,
            embed_timeout: Duration::from_secs(30),
            search_timeout: Duration::from_secs(10),
        }
    }
}

/// A nearest-neighbor match with its stored chunk.
#[derive(Debug, Clone)]
pub struct SearchHit {
    pub chunk_id: String,
    pub metadata: Chunk,
    /// Cosine distance, `1 - similarity`.
    pub distance: f32,
}

impl SearchHit {
    #[must_use]
    pub fn score(&self) -> f32 {
        1.0 - self.distance
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct IndexStats {
    pub project: String,
    pub records: usize,
    pub files: usize,
    pub by_kind: BTreeMap<ChunkKind, usize>,
    pub fallback_records: usize,
    pub model: Option<String>,
    pub dimension: Option<usize>,
}

/// Owns the index backend and embedding function for every project.
pub struct IndexCatalog {
    backend: Arc<dyn VectorStore>,
    embedder: Arc<dyn Embedder>,
    config: StoreConfig,
    writers: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl std::fmt::Debug for IndexCatalog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IndexCatalog")
            .field("embedder", &self.embedder.model_id())
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl IndexCatalog {
    #[must_use]
    pub fn new(
        backend: Arc<dyn VectorStore>,
        embedder: Arc<dyn Embedder>,
        config: StoreConfig,
    ) -> Self {
        Self {
            backend,
            embedder,
            config,
            writers: Mutex::new(HashMap::new()),
        }
    }

    /// Open `project`, checking that its collection (if it exists) was built
    /// with the active embedding function.
    ///
    /// # Errors
    ///
    /// - [`IndexError::InvalidProject`] for a malformed name.
    /// - [`IndexError::DimensionMismatch`] if the collection's dimension differs.
    /// - [`IndexError::EmbedderMismatch`] if the collection used another embedder.
    /// - [`IndexError::EmbeddingUnavailable`] if dimension detection fails.
    pub async fn open(&self, project: &str) -> Result<CodeStore> {
        validate_project_name(project)?;

        let dimension = match self.embedder.dimension() {
            Some(d) => d,
            None => self.detect_dimension().await?,
        };

        if let Some(stored) = self.backend.collection_info(project).await? {
            check_collection(stored, dimension, self.embedder.model_id())?;
        }

        let writer_lock = {
            let mut writers = self
                .writers
                .lock()
                .map_err(|e| IndexError::Other(format!("writer registry poisoned: {e}")))?;
            Arc::clone(writers.entry(project.to_owned()).or_default())
        };

        tracing::debug!(project, dimension, model = self.embedder.model_id(), "opened project");
        Ok(CodeStore {
            project: project.to_owned(),
            dimension,
            backend: Arc::clone(&self.backend),
            embedder: Arc::clone(&self.embedder),
            config: self.config.clone(),
            writer_lock,
        })
    }

    /// Names of every project with a collection.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend cannot list collections.
    pub async fn projects(&self) -> Result<Vec<String>> {
        Ok(self.backend.list_collections().await?)
    }

    /// Release the index backend.
    pub async fn close(&self) {
        self.backend.close().await;
    }

    async fn detect_dimension(&self) -> Result<usize> {
        let vectors = embed_with_timeout(
            self.embedder.as_ref(),
            vec!["dimension".to_owned()],
            self.config.embed_timeout,
        )
        .await?;
        vectors
            .first()
            .map(Vec::len)
            .filter(|d| *d > 0)
            .ok_or_else(|| IndexError::EmbeddingUnavailable("dimension detection returned no vector".into()))
    }
}

/// Read handle on one project's collection.
#[derive(Clone)]
pub struct CodeStore {
    project: String,
    dimension: usize,
    backend: Arc<dyn VectorStore>,
    embedder: Arc<dyn Embedder>,
    config: StoreConfig,
    writer_lock: Arc<tokio::sync::Mutex<()>>,
}

impl std::fmt::Debug for CodeStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CodeStore")
            .field("project", &self.project)
            .field("dimension", &self.dimension)
            .field("embedder", &self.embedder.model_id())
            .finish_non_exhaustive()
    }
}

impl CodeStore {
    #[must_use]
    pub fn project(&self) -> &str {
        &self.project
    }

    #[must_use]
    pub fn dimension(&self) -> usize {
        self.dimension
    }

    #[must_use]
    pub fn model_id(&self) -> &str {
        self.embedder.model_id()
    }

    /// Embed a query with the collection's embedding function.
    ///
    /// # Errors
    ///
    /// Returns [`IndexError::EmbeddingUnavailable`] or [`IndexError::Timeout`]
    /// if the backend fails, and [`IndexError::DimensionMismatch`] if it
    /// returns a vector of the wrong size.
    pub async fn embed_query(&self, query: &str) -> Result<Vec<f32>> {
        let vector = embed_with_timeout(
            self.embedder.as_ref(),
            vec![query.to_owned()],
            self.config.embed_timeout,
        )
        .await?
        .into_iter()
        .next()
        .ok_or_else(|| IndexError::EmbeddingUnavailable("no vector for query".into()))?;
        self.check_dimension(vector.len())?;
        Ok(vector)
    }

    /// Nearest neighbors of `vector` by cosine distance, closest first.
    ///
    /// # Errors
    ///
    /// Returns [`IndexError::DimensionMismatch`] for a vector of the wrong
    /// size, [`IndexError::Timeout`] if the backend exceeds the search
    /// deadline, or a backend error.
    pub async fn search(
        &self,
        vector: Vec<f32>,
        k: usize,
        filter: Option<VectorFilter>,
    ) -> Result<Vec<SearchHit>> {
        self.check_dimension(vector.len())?;
        if k == 0 {
            return Ok(Vec::new());
        }
        let points = tokio::time::timeout(
            self.config.search_timeout,
            self.backend.search(&self.project, vector, k, filter),
        )
        .await
        .map_err(|_| IndexError::timeout("search", self.config.search_timeout))??;

        points
            .into_iter()
            .map(|p| {
                Ok(SearchHit {
                    metadata: chunk_from_payload(p.payload)?,
                    chunk_id: p.id,
                    distance: 1.0 - p.score,
                })
            })
            .collect()
    }

    /// Record counts for the project.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend cannot be read.
    pub async fn stats(&self) -> Result<IndexStats> {
        let info = self.backend.collection_info(&self.project).await?;
        let rows = self.backend.scroll(&self.project, None).await?;
        let mut files = BTreeSet::new();
        let mut by_kind = BTreeMap::new();
        for row in &rows {
            if let Some(path) = row.payload.get("path").and_then(|v| v.as_str()) {
                files.insert(path.to_owned());
            }
            if let Some(kind) = row
                .payload
                .get("kind")
                .and_then(|v| v.as_str())
                .and_then(ChunkKind::parse)
            {
                *by_kind.entry(kind).or_insert(0) += 1;
            }
        }
        Ok(IndexStats {
            project: self.project.clone(),
            records: rows.len(),
            files: files.len(),
            fallback_records: by_kind.get(&ChunkKind::FallbackWindow).copied().unwrap_or(0),
            by_kind,
            model: info.as_ref().map(|i| i.model.clone()),
            dimension: info.map(|i| i.dimension),
        })
    }

    /// Take the project's single writer.
    ///
    /// # Errors
    ///
    /// Returns [`IndexError::IngestionInProgress`] if another writer is alive.
    pub fn writer(&self) -> Result<StoreWriter> {
        let guard = Arc::clone(&self.writer_lock)
            .try_lock_owned()
            .map_err(|_| IndexError::IngestionInProgress(self.project.clone()))?;
        Ok(StoreWriter {
            store: self.clone(),
            _guard: guard,
        })
    }

    fn check_dimension(&self, actual: usize) -> Result<()> {
        if actual == self.dimension {
            Ok(())
        } else {
            Err(IndexError::DimensionMismatch {
                expected: self.dimension,
                actual,
            })
        }
    }
}

/// Exclusive write access to one project. Dropping it releases the lock.
#[derive(Debug)]
pub struct StoreWriter {
    store: CodeStore,
    _guard: OwnedMutexGuard<()>,
}

impl StoreWriter {
    #[must_use]
    pub fn store(&self) -> &CodeStore {
        &self.store
    }

    /// Embed and write `chunks`, overwriting records with the same id.
    ///
    /// Nothing is written unless every chunk was embedded successfully.
    ///
    /// # Errors
    ///
    /// - [`IndexError::EmbeddingUnavailable`] / [`IndexError::Timeout`] if embedding fails.
    /// - [`IndexError::DimensionMismatch`] if the embedder returns a wrong-sized vector
    ///   or the collection was created with another dimension.
    /// - [`IndexError::EmbedderMismatch`] if the collection was created by another embedder.
    /// - [`IndexError::UpsertFailure`] if the backend rejects the batch.
    pub async fn upsert(&self, chunks: &[Chunk]) -> Result<usize> {
        if chunks.is_empty() {
            return Ok(0);
        }
        let store = &self.store;
        let texts: Vec<String> = chunks.iter().map(contextualize_for_embedding).collect();
        let batches: Vec<Vec<String>> = texts
            .chunks(store.config.batch_size.max(1))
            .map(<[String]>::to_vec)
            .collect();

        let embedded: Vec<Vec<Vec<f32>>> = futures::stream::iter(batches)
            .map(|batch| {
                embed_with_timeout(store.embedder.as_ref(), batch, store.config.embed_timeout)
            })
            .buffered(store.config.embed_concurrency.max(1))
            .try_collect()
            .await?;
        let vectors: Vec<Vec<f32>> = embedded.into_iter().flatten().collect();

        if vectors.len() != chunks.len() {
            return Err(IndexError::EmbeddingUnavailable(format!(
                "backend returned {} vectors for {} chunks",
                vectors.len(),
                chunks.len()
            )));
        }
        for v in &vectors {
            store.check_dimension(v.len())?;
        }

        let info = CollectionInfo {
            model: store.embedder.model_id().to_owned(),
            dimension: store.dimension,
        };
        store
            .backend
            .ensure_collection(&store.project, &info)
            .await
            .map_err(|e| IndexError::UpsertFailure(e.to_string()))?;
        // Another handle may have created the collection after this one was opened.
        if let Some(stored) = store.backend.collection_info(&store.project).await? {
            check_collection(stored, store.dimension, store.embedder.model_id())?;
        }

        let points = chunks
            .iter()
            .zip(vectors)
            .map(|(chunk, vector)| {
                Ok(VectorPoint {
                    id: chunk.chunk_id.clone(),
                    vector,
                    payload: chunk_to_payload(chunk)?,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        store
            .backend
            .upsert(&store.project, points)
            .await
            .map_err(|e| IndexError::UpsertFailure(e.to_string()))?;

        tracing::debug!(project = %store.project, count = chunks.len(), "upserted chunks");
        Ok(chunks.len())
    }

    /// Remove records of `path` whose ids are not in `current_ids`.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend cannot be read or written.
    pub async fn delete_stale(&self, path: &str, current_ids: &HashSet<String>) -> Result<usize> {
        let stale: Vec<String> = self
            .existing(path)
            .await?
            .into_keys()
            .filter(|id| !current_ids.contains(id))
            .collect();
        let removed = stale.len();
        if removed > 0 {
            self.store
                .backend
                .delete_by_ids(&self.store.project, stale)
                .await?;
            tracing::debug!(path, removed, "evicted stale chunks");
        }
        Ok(removed)
    }

    /// Remove every record of `path`.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend cannot be read or written.
    pub async fn remove_path(&self, path: &str) -> Result<usize> {
        self.delete_stale(path, &HashSet::new()).await
    }

    /// Stored `chunk_id -> content_hash` for `path`.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend cannot be read.
    pub async fn existing(&self, path: &str) -> Result<HashMap<String, String>> {
        let rows = self
            .store
            .backend
            .scroll(&self.store.project, Some(VectorFilter::text_eq("path", path)))
            .await?;
        Ok(rows
            .into_iter()
            .map(|row| {
                let hash = row
                    .payload
                    .get("content_hash")
                    .and_then(|v| v.as_str())
                    .unwrap_or_default()
                    .to_owned();
                (row.id, hash)
            })
            .collect())
    }

    /// Every path with at least one record.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend cannot be read.
    pub async fn indexed_paths(&self) -> Result<BTreeSet<String>> {
        let rows = self.store.backend.scroll(&self.store.project, None).await?;
        Ok(rows
            .iter()
            .filter_map(|row| row.payload.get("path").and_then(|v| v.as_str()))
            .map(str::to_owned)
            .collect())
    }

    /// Destroy the project's collection and every record in it.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend cannot delete the collection.
    pub async fn reset(&self) -> Result<()> {
        self.store
            .backend
            .delete_collection(&self.store.project)
            .await?;
        tracing::info!(project = %self.store.project, "project reset");
        Ok(())
    }
}

/// Collection names double as project names.
///
/// # Errors
///
/// Returns [`IndexError::InvalidProject`] unless `name` is 1 to 64 characters
/// from `[A-Za-z0-9_.-]`.
pub fn validate_project_name(name: &str) -> Result<()> {
    let valid = !name.is_empty()
        && name.len() <= MAX_PROJECT_NAME_LEN
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-'));
    if valid {
        Ok(())
    } else {
        Err(IndexError::InvalidProject(name.to_owned()))
    }
}

/// Derive a valid project name, e.g. from a directory name.
#[must_use]
pub fn sanitize_project_name(raw: &str) -> String {
    let cleaned: String = raw
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-') {
                c
            } else {
                '-'
            }
        })
        .take(MAX_PROJECT_NAME_LEN)
        .collect();
    let trimmed = cleaned.trim_matches(|c| c == '-' || c == '.');
    if trimmed.is_empty() {
        "default".to_owned()
    } else {
        trimmed.to_owned()
    }
}

/// Dimension first: a dimension change is never compatible, whatever the model.
fn check_collection(stored: CollectionInfo, dimension: usize, model: &str) -> Result<()> {
    if stored.dimension != dimension {
        return Err(IndexError::DimensionMismatch {
            expected: stored.dimension,
            actual: dimension,
        });
    }
    if stored.model != model {
        return Err(IndexError::EmbedderMismatch {
            stored: stored.model,
            active: model.to_owned(),
        });
    }
    Ok(())
}

async fn embed_with_timeout(
    embedder: &dyn Embedder,
    texts: Vec<String>,
    timeout: Duration,
) -> Result<Vec<Vec<f32>>> {
    tokio::time::timeout(timeout, embedder.embed_batch(texts))
        .await
        .map_err(|_| IndexError::timeout("embed", timeout))?
        .map_err(|e| IndexError::EmbeddingUnavailable(e.to_string()))
}

fn chunk_to_payload(chunk: &Chunk) -> Result<Payload> {
    match serde_json::to_value(chunk)? {
        serde_json::Value::Object(map) => Ok(map.into_iter().collect()),
        other => Err(IndexError::Other(format!("chunk serialized to {other}"))),
    }
}

fn chunk_from_payload(payload: Payload) -> Result<Chunk> {
    let map: serde_json::Map<String, serde_json::Value> = payload.into_iter().collect();
    Ok(serde_json::from_value(serde_json::Value::Object(map))?)
}
