use std::path::PathBuf;

use quarry_index::retriever::DedupPolicy;
use serde::{Deserialize, Serialize};

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct Config {
    /// Collection name; derived from the indexed directory when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project: Option<String>,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub loader: LoaderSection,
    #[serde(default)]
    pub retrieval: RetrievalSection,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    #[default]
    Sqlite,
    Memory,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct StorageConfig {
    #[serde(default)]
    pub backend: StorageBackend,
    #[serde(default = "default_storage_path")]
    pub path: PathBuf,
}

fn default_storage_path() -> PathBuf {
    PathBuf::from(".quarry/index.db")
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: StorageBackend::default(),
            path: default_storage_path(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EmbeddingProvider {
    #[default]
    Ollama,
    Hash,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct EmbeddingConfig {
    #[serde(default)]
    pub provider: EmbeddingProvider,
    #[serde(default = "default_embedding_base_url")]
    pub base_url: String,
    #[serde(default = "default_embedding_model")]
    pub model: String,
    /// Vector size of the `hash` provider.
    #[serde(default = "default_embedding_dimension")]
    pub dimension: usize,
    #[serde(default = "default_embedding_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_embedding_concurrency")]
    pub concurrency: usize,
    #[serde(default = "default_embedding_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_embedding_base_url() -> String {
    "http://localhost:11434".into()
}

fn default_embedding_model() -> String {
    "nomic-embed-text".into()
}

fn default_embedding_dimension() -> usize {
    384
}

fn default_embedding_batch_size() -> usize {
    32
}

fn default_embedding_concurrency() -> usize {
    4
}

fn default_embedding_timeout_secs() -> u64 {
    30
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: EmbeddingProvider::default(),
            base_url: default_embedding_base_url(),
            model: default_embedding_model(),
            dimension: default_embedding_dimension(),
            batch_size: default_embedding_batch_size(),
            concurrency: default_embedding_concurrency(),
            timeout_secs: default_embedding_timeout_secs(),
        }
    }
}

#[derive(Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct ChunkingConfig {
    pub max_lines: usize,
    pub max_tokens: usize,
    pub window_lines: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        let defaults = quarry_index::ChunkerConfig::default();
        Self {
            max_lines: defaults.max_lines,
            max_tokens: defaults.max_tokens,
            window_lines: defaults.window_lines,
        }
    }
}

#[derive(Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct LoaderSection {
    /// Overrides the built-in extension allow-list.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub extensions: Option<Vec<String>>,
    pub max_file_size: u64,
    pub include_hidden: bool,
    pub respect_gitignore: bool,
}

impl Default for LoaderSection {
    fn default() -> Self {
        Self {
            extensions: None,
            max_file_size: quarry_index::loader::DEFAULT_MAX_FILE_SIZE,
            include_hidden: false,
            respect_gitignore: true,
        }
    }
}

#[derive(Debug, Deserialize, Serialize)]
pub struct RetrievalSection {
    #[serde(default = "default_retrieval_top_k")]
    pub top_k: usize,
    #[serde(default = "default_retrieval_over_fetch_factor")]
    pub over_fetch_factor: usize,
    #[serde(default = "default_retrieval_context_budget")]
    pub context_budget: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub score_threshold: Option<f32>,
    #[serde(default = "default_true")]
    pub prefer_shorter: bool,
    #[serde(default)]
    pub dedup: DedupPolicy,
    #[serde(default = "default_retrieval_fallback_weight")]
    pub fallback_weight: f32,
    #[serde(default = "default_retrieval_search_timeout_secs")]
    pub search_timeout_secs: u64,
}

fn default_retrieval_top_k() -> usize {
    5
}

fn default_retrieval_over_fetch_factor() -> usize {
    3
}

fn default_retrieval_context_budget() -> usize {
    3000
}

fn default_true() -> bool {
    true
}

fn default_retrieval_fallback_weight() -> f32 {
    1.0
}

fn default_retrieval_search_timeout_secs() -> u64 {
    10
}

impl Default for RetrievalSection {
    fn default() -> Self {
        Self {
            top_k: default_retrieval_top_k(),
            over_fetch_factor: default_retrieval_over_fetch_factor(),
            context_budget: default_retrieval_context_budget(),
            score_threshold: None,
            prefer_shorter: true,
            dedup: DedupPolicy::default(),
            fallback_weight: default_retrieval_fallback_weight(),
            search_timeout_secs: default_retrieval_search_timeout_secs(),
        }
    }
}
