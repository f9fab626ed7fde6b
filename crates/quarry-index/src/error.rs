//! Error types for quarry-index.

use std::num::TryFromIntError;

use crate::vector_store::VectorStoreError;

/// Errors that abort an indexing or retrieval call.
///
/// Per-file problems are not errors: the loader yields
/// [`LoadWarning`](crate::loader::LoadWarning) values and the chunker attaches
/// a [`ParseFailure`](crate::parser::ParseFailure) to its output instead.
#[derive(Debug, thiserror::Error)]
pub enum IndexError {
    /// IO error reading source files.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// `SQLite` database error.
    #[error("database error: {0}")]
    Sqlite(#[from] sqlx::Error),

    /// Schema migration failed while opening the `SQLite` index.
    #[error("migration failed: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    /// Index backend error outside of an upsert.
    #[error("vector store error: {0}")]
    VectorStore(#[from] VectorStoreError),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// The embedding backend failed or returned an unusable response.
    #[error("embedding unavailable: {0}")]
    EmbeddingUnavailable(String),

    /// A vector of the wrong dimension reached a collection.
    #[error("dimension mismatch: collection expects {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    /// The collection was built with a different embedding function.
    #[error("embedder mismatch: collection was built with '{stored}', active embedder is '{active}'")]
    EmbedderMismatch { stored: String, active: String },

    /// Writing a batch of records failed; nothing from the batch was committed.
    #[error("upsert failed: {0}")]
    UpsertFailure(String),

    /// A backend call exceeded its deadline.
    #[error("{operation} timed out after {timeout_ms} ms")]
    Timeout {
        operation: &'static str,
        timeout_ms: u64,
    },

    /// Another ingestion holds the writer for this project.
    #[error("ingestion already in progress for project '{0}'")]
    IngestionInProgress(String),

    /// Project names double as collection names and are restricted.
    #[error("invalid project name '{0}'")]
    InvalidProject(String),

    /// Integer conversion error.
    #[error("integer conversion failed: {0}")]
    IntConversion(#[from] TryFromIntError),

    /// Generic catch-all error.
    #[error("{0}")]
    Other(String),
}

impl IndexError {
    /// Whether the failed call may succeed if retried unchanged.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::EmbeddingUnavailable(_)
                | Self::Timeout { .. }
                | Self::UpsertFailure(_)
                | Self::IngestionInProgress(_)
        )
    }

    pub(crate) fn timeout(operation: &'static str, after: std::time::Duration) -> Self {
        Self::Timeout {
            operation,
            timeout_ms: u64::try_from(after.as_millis()).unwrap_or(u64::MAX),
        }
    }
}

/// Result type alias using `IndexError`.
pub type Result<T> = std::result::Result<T, IndexError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backend_availability_errors_are_retryable() {
        assert!(IndexError::EmbeddingUnavailable("down".into()).is_retryable());
        assert!(IndexError::timeout("search", std::time::Duration::from_secs(2)).is_retryable());
        assert!(IndexError::UpsertFailure("locked".into()).is_retryable());
    }

    #[test]
    fn configuration_errors_are_not_retryable() {
        let err = IndexError::DimensionMismatch {
            expected: 384,
            actual: 768,
        };
        assert!(!err.is_retryable());
        assert!(
            !IndexError::EmbedderMismatch {
                stored: "a".into(),
                active: "b".into()
            }
            .is_retryable()
        );
    }

    #[test]
    fn timeout_message_names_operation() {
        let err = IndexError::timeout("embed", std::time::Duration::from_millis(1500));
        assert_eq!(err.to_string(), "embed timed out after 1500 ms");
    }
}
