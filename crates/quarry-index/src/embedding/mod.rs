//! Pluggable embedding functions.
//!
//! An [`Embedder`] maps text to fixed-dimension vectors. Its
//! [`model_id`](Embedder::model_id) is recorded with every collection so a
//! query is never embedded with a different function than the index.

mod hash;
#[cfg(feature = "ollama")]
mod ollama;

pub use hash::HashEmbedder;
#[cfg(feature = "ollama")]
pub use ollama::OllamaEmbedder;

use crate::vector_store::BoxFuture;

#[derive(Debug, thiserror::Error)]
pub enum EmbedError {
    #[error("embedding backend unavailable: {0}")]
    Unavailable(String),
    #[error("embedding backend returned no vectors")]
    EmptyResponse,
    #[error("malformed embedding response: {0}")]
    Malformed(String),
}

pub trait Embedder: Send + Sync {
    /// Stable identity of the embedding function, including its version.
    fn model_id(&self) -> &str;

    /// Vector dimension, when known without calling the backend.
    fn dimension(&self) -> Option<usize> {
        None
    }

    /// Embed a batch of texts, one vector per input, in input order.
    fn embed_batch(&self, texts: Vec<String>) -> BoxFuture<'_, Result<Vec<Vec<f32>>, EmbedError>>;
}

impl std::fmt::Debug for dyn Embedder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Embedder")
            .field("model_id", &self.model_id())
            .finish_non_exhaustive()
    }
}
