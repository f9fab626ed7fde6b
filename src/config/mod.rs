mod env;
mod types;

#[cfg(test)]
mod tests;

pub use types::*;

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, bail};
use quarry_index::languages::default_extensions;
use quarry_index::store::sanitize_project_name;
use quarry_index::{ChunkerConfig, IndexerConfig, LoaderConfig, RetrievalConfig, StoreConfig};

pub const DEFAULT_CONFIG_PATH: &str = ".quarry/config.toml";

impl Config {
    /// Load configuration from a TOML file with env var overrides.
    ///
    /// Falls back to defaults when the file does not exist.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or parsed, or
    /// if the resulting configuration is invalid.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let mut config = if path.exists() {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("failed to read config file {}", path.display()))?;
            toml::from_str::<Self>(&content)
                .with_context(|| format!("failed to parse config file {}", path.display()))?
        } else {
            Self::default()
        };

        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Config file location: `--config`, then `QUARRY_CONFIG`, then the default.
    #[must_use]
    pub fn resolve_path(cli: Option<&Path>) -> PathBuf {
        if let Some(path) = cli {
            return path.to_path_buf();
        }
        std::env::var_os("QUARRY_CONFIG")
            .map_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH), PathBuf::from)
    }

    /// Reject settings the pipeline cannot run with.
    ///
    /// # Errors
    ///
    /// Returns a description of the first invalid setting.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.embedding.batch_size == 0 {
            bail!("embedding.batch_size must be at least 1");
        }
        if self.embedding.concurrency == 0 {
            bail!("embedding.concurrency must be at least 1");
        }
        if self.embedding.timeout_secs == 0 {
            bail!("embedding.timeout_secs must be at least 1");
        }
        if self.retrieval.search_timeout_secs == 0 {
            bail!("retrieval.search_timeout_secs must be at least 1");
        }
        if self.embedding.dimension == 0 {
            bail!("embedding.dimension must be at least 1");
        }
        if self.chunking.window_lines == 0 || self.chunking.max_lines == 0 {
            bail!("chunking.window_lines and chunking.max_lines must be at least 1");
        }
        if self.chunking.window_lines > self.chunking.max_lines {
            bail!(
                "chunking.window_lines ({}) exceeds chunking.max_lines ({})",
                self.chunking.window_lines,
                self.chunking.max_lines
            );
        }
        if self.chunking.max_tokens == 0 {
            bail!("chunking.max_tokens must be at least 1");
        }
        if self.retrieval.over_fetch_factor == 0 {
            bail!("retrieval.over_fetch_factor must be at least 1");
        }
        if self.retrieval.context_budget == 0 {
            bail!("retrieval.context_budget must be at least 1");
        }
        let weight = self.retrieval.fallback_weight;
        if !(weight > 0.0 && weight <= 1.0) {
            bail!("retrieval.fallback_weight must be in (0, 1], got {weight}");
        }
        if let Some(project) = &self.project {
            quarry_index::store::validate_project_name(project)
                .with_context(|| "invalid project setting")?;
        }
        Ok(())
    }

    /// Project name for `root`: the configured one, else the directory name.
    #[must_use]
    pub fn project_name(&self, root: &Path) -> String {
        if let Some(project) = &self.project {
            return project.clone();
        }
        let dir = std::fs::canonicalize(root).unwrap_or_else(|_| root.to_path_buf());
        let dir = if dir.is_file() {
            dir.parent().map(Path::to_path_buf).unwrap_or_default()
        } else {
            dir
        };
        dir.file_name()
            .map_or_else(|| "default".to_owned(), |name| sanitize_project_name(&name.to_string_lossy()))
    }

    #[must_use]
    pub fn loader_config(&self) -> LoaderConfig {
        LoaderConfig {
            extensions: self
                .loader
                .extensions
                .clone()
                .map_or_else(default_extensions, |exts| {
                    exts.iter()
                        .map(|e| e.trim_start_matches('.').to_lowercase())
                        .collect()
                }),
            max_file_size: self.loader.max_file_size,
            include_hidden: self.loader.include_hidden,
            respect_gitignore: self.loader.respect_gitignore,
        }
    }

    #[must_use]
    pub fn chunker_config(&self) -> ChunkerConfig {
        ChunkerConfig {
            max_lines: self.chunking.max_lines,
            max_tokens: self.chunking.max_tokens,
            window_lines: self.chunking.window_lines,
        }
    }

    /// Indexer settings with stored paths relative to `project_root`.
    #[must_use]
    pub fn indexer_config(&self, project_root: &Path) -> IndexerConfig {
        IndexerConfig {
            loader: self.loader_config(),
            chunker: self.chunker_config(),
            project_root: Some(project_root.to_path_buf()),
        }
    }

    #[must_use]
    pub fn store_config(&self) -> StoreConfig {
        StoreConfig {
            batch_size: self.embedding.batch_size,
            embed_concurrency: self.embedding.concurrency,
            embed_timeout: Duration::from_secs(self.embedding.timeout_secs),
            search_timeout: Duration::from_secs(self.retrieval.search_timeout_secs),
        }
    }

    #[must_use]
    pub fn retrieval_config(&self) -> RetrievalConfig {
        RetrievalConfig {
            over_fetch_factor: self.retrieval.over_fetch_factor,
            context_budget: self.retrieval.context_budget,
            score_threshold: self.retrieval.score_threshold,
            prefer_shorter: self.retrieval.prefer_shorter,
            dedup: self.retrieval.dedup,
            fallback_weight: self.retrieval.fallback_weight,
        }
    }
}
