//! Structural code indexing and ranked retrieval.
//!
//! Source files are loaded from disk, split into structurally coherent
//! chunks (functions, classes, sections, with windowed fallback for anything
//! that does not parse), embedded through a pluggable [`embedding::Embedder`]
//! and stored per project behind a [`vector_store::VectorStore`]. Queries are
//! answered by over-fetching nearest neighbors, ranking, deduplicating and
//! packing them into a token budget for an external answer generator.

pub mod answer;
pub(crate) mod ast;
pub mod chunker;
pub mod context;
pub mod embedding;
pub mod error;
pub mod in_memory_store;
pub mod indexer;
pub mod languages;
pub mod loader;
pub(crate) mod markdown;
pub mod parser;
pub mod retriever;
pub mod sqlite_store;
pub mod store;
pub mod vector_store;
pub(crate) mod window;

pub use answer::AnswerRequest;
pub use chunker::{Chunk, ChunkKind, ChunkerConfig, chunk_document};
pub use error::{IndexError, Result};
pub use indexer::{CodeIndexer, IndexerConfig, IngestReport, IngestWarning};
pub use languages::Lang;
pub use loader::{LoadWarning, Loader, LoaderConfig, SourceDocument};
pub use parser::ParseFailure;
pub use retriever::{CodeRetriever, DedupPolicy, RetrievalConfig, RetrievalResult};
pub use store::{CodeStore, IndexCatalog, SearchHit, StoreConfig, StoreWriter};
