use std::str::FromStr;

use serde::de::DeserializeOwned;

use super::Config;

/// Parse `key` if set; an unparsable value is logged and ignored.
fn parsed<T: FromStr>(key: &str) -> Option<T> {
    let v = std::env::var(key).ok()?;
    if let Ok(parsed) = v.trim().parse() {
        Some(parsed)
    } else {
        tracing::warn!("ignoring invalid {key} value: {v}");
        None
    }
}

/// Parse a lowercase enum value the same way the TOML file does.
fn variant<T: DeserializeOwned>(key: &str) -> Option<T> {
    let v = std::env::var(key).ok()?;
    if let Ok(kind) = serde_json::from_value(serde_json::Value::String(v.trim().to_lowercase())) {
        Some(kind)
    } else {
        tracing::warn!("ignoring invalid {key} value: {v}");
        None
    }
}

impl Config {
    pub(crate) fn apply_env_overrides(&mut self) {
        if let Ok(v) = std::env::var("QUARRY_PROJECT") {
            self.project = Some(v);
        }

        if let Some(backend) = variant("QUARRY_STORAGE_BACKEND") {
            self.storage.backend = backend;
        }
        if let Ok(v) = std::env::var("QUARRY_STORAGE_PATH") {
            self.storage.path = v.into();
        }

        if let Some(provider) = variant("QUARRY_EMBEDDING_PROVIDER") {
            self.embedding.provider = provider;
        }
        if let Ok(v) = std::env::var("QUARRY_EMBEDDING_BASE_URL") {
            self.embedding.base_url = v;
        }
        if let Ok(v) = std::env::var("QUARRY_EMBEDDING_MODEL") {
            self.embedding.model = v;
        }
        if let Some(n) = parsed("QUARRY_EMBEDDING_DIMENSION") {
            self.embedding.dimension = n;
        }
        if let Some(n) = parsed("QUARRY_EMBEDDING_BATCH_SIZE") {
            self.embedding.batch_size = n;
        }
        if let Some(n) = parsed("QUARRY_EMBEDDING_CONCURRENCY") {
            self.embedding.concurrency = n;
        }
        if let Some(secs) = parsed("QUARRY_EMBEDDING_TIMEOUT") {
            self.embedding.timeout_secs = secs;
        }

        if let Some(n) = parsed("QUARRY_CHUNKING_MAX_LINES") {
            self.chunking.max_lines = n;
        }
        if let Some(n) = parsed("QUARRY_CHUNKING_MAX_TOKENS") {
            self.chunking.max_tokens = n;
        }
        if let Some(n) = parsed("QUARRY_CHUNKING_WINDOW_LINES") {
            self.chunking.window_lines = n;
        }

        if let Some(bytes) = parsed("QUARRY_LOADER_MAX_FILE_SIZE") {
            self.loader.max_file_size = bytes;
        }
        if let Some(enabled) = parsed("QUARRY_LOADER_INCLUDE_HIDDEN") {
            self.loader.include_hidden = enabled;
        }
        if let Some(enabled) = parsed("QUARRY_LOADER_RESPECT_GITIGNORE") {
            self.loader.respect_gitignore = enabled;
        }

        if let Some(k) = parsed("QUARRY_RETRIEVAL_TOP_K") {
            self.retrieval.top_k = k;
        }
        if let Some(n) = parsed("QUARRY_RETRIEVAL_OVER_FETCH_FACTOR") {
            self.retrieval.over_fetch_factor = n;
        }
        if let Some(tokens) = parsed("QUARRY_RETRIEVAL_CONTEXT_BUDGET") {
            self.retrieval.context_budget = tokens;
        }
        if let Some(threshold) = parsed("QUARRY_RETRIEVAL_SCORE_THRESHOLD") {
            self.retrieval.score_threshold = Some(threshold);
        }
        if let Some(enabled) = parsed("QUARRY_RETRIEVAL_PREFER_SHORTER") {
            self.retrieval.prefer_shorter = enabled;
        }
        if let Some(policy) = variant("QUARRY_RETRIEVAL_DEDUP") {
            self.retrieval.dedup = policy;
        }
        if let Some(weight) = parsed("QUARRY_RETRIEVAL_FALLBACK_WEIGHT") {
            self.retrieval.fallback_weight = weight;
        }
        if let Some(secs) = parsed("QUARRY_RETRIEVAL_SEARCH_TIMEOUT") {
            self.retrieval.search_timeout_secs = secs;
        }
    }
}
