//! Query-time retrieval: over-fetch, rank, deduplicate, budget-pack.

use std::cmp::Ordering;
use std::fmt::Write;

use serde::{Deserialize, Serialize};

use crate::chunker::{Chunk, ChunkKind};
use crate::context::citation;
use crate::error::Result;
use crate::languages::Lang;
use crate::store::{CodeStore, SearchHit};
use crate::vector_store::VectorFilter;

/// When two candidates count as duplicates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DedupPolicy {
    /// Same path and intersecting line ranges.
    #[default]
    Overlap,
    /// Same path and identical line range.
    Exact,
}

/// Retrieval configuration.
#[derive(Debug, Clone)]
pub struct RetrievalConfig {
    /// Candidates fetched per requested result (default: 3).
    pub over_fetch_factor: usize,
    /// Maximum total `token_count` of returned chunks (default: 3000).
    pub context_budget: usize,
    /// Minimum similarity to accept, if set.
    pub score_threshold: Option<f32>,
    /// Break score ties in favor of the shorter chunk (default: true).
    pub prefer_shorter: bool,
    pub dedup: DedupPolicy,
    /// Multiplier applied to fallback-window scores before ranking (default: 1.0).
    pub fallback_weight: f32,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            over_fetch_factor: 3,
            context_budget: 3000,
            score_threshold: None,
            prefer_shorter: true,
            dedup: DedupPolicy::Overlap,
            fallback_weight: 1.0,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RetrievedChunk {
    #[serde(flatten)]
    pub chunk: Chunk,
    /// Cosine similarity to the query.
    pub score: f32,
}

impl RetrievedChunk {
    #[must_use]
    pub fn citation(&self) -> String {
        citation(
            &self.chunk.path,
            &self.chunk.symbol_name,
            self.chunk.start_line,
            self.chunk.end_line,
        )
    }
}

/// Ranked chunks plus the assembled context handed to answer generation.
#[derive(Debug, Clone, Serialize)]
pub struct RetrievalResult {
    pub query: String,
    pub chunks: Vec<RetrievedChunk>,
    pub context: String,
    pub total_tokens: usize,
    /// Candidates returned by the store before ranking and packing.
    pub candidates: usize,
}

impl RetrievalResult {
    fn empty(query: &str) -> Self {
        Self {
            query: query.to_owned(),
            chunks: Vec::new(),
            context: String::new(),
            total_tokens: 0,
            candidates: 0,
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    #[must_use]
    pub fn citations(&self) -> Vec<String> {
        self.chunks.iter().map(RetrievedChunk::citation).collect()
    }
}

/// Budget-aware code retriever over one project.
#[derive(Debug, Clone)]
pub struct CodeRetriever {
    store: CodeStore,
    config: RetrievalConfig,
}

impl CodeRetriever {
    #[must_use]
    pub fn new(store: CodeStore, config: RetrievalConfig) -> Self {
        Self { store, config }
    }

    /// Retrieve up to `k` chunks relevant to `query`.
    ///
    /// An empty index yields an empty result.
    ///
    /// # Errors
    ///
    /// Returns [`IndexError::EmbeddingUnavailable`](crate::error::IndexError::EmbeddingUnavailable)
    /// if the query cannot be embedded, or a store error if the search fails.
    pub async fn retrieve(&self, query: &str, k: usize) -> Result<RetrievalResult> {
        self.retrieve_inner(query, k, None).await
    }

    /// Retrieve with results restricted to one language.
    ///
    /// # Errors
    ///
    /// Same as [`retrieve`](Self::retrieve).
    pub async fn retrieve_filtered(
        &self,
        query: &str,
        k: usize,
        language: Lang,
    ) -> Result<RetrievalResult> {
        let filter = VectorFilter::text_eq("language", language.id());
        self.retrieve_inner(query, k, Some(filter)).await
    }

    async fn retrieve_inner(
        &self,
        query: &str,
        k: usize,
        filter: Option<VectorFilter>,
    ) -> Result<RetrievalResult> {
        if k == 0 {
            return Ok(RetrievalResult::empty(query));
        }

        let query_vector = self.store.embed_query(query).await?;
        let fetch = k.saturating_mul(self.config.over_fetch_factor.max(1));
        let hits = self.store.search(query_vector, fetch, filter).await?;
        let candidates = hits.len();

        let selected = select(hits, k, &self.config);
        let total_tokens = selected.iter().map(|c| c.chunk.token_count).sum();
        let context = format_as_context(&selected);

        tracing::debug!(
            project = self.store.project(),
            candidates,
            returned = selected.len(),
            total_tokens,
            "retrieved"
        );

        Ok(RetrievalResult {
            query: query.to_owned(),
            chunks: selected,
            context,
            total_tokens,
            candidates,
        })
    }
}

/// Rank, deduplicate, truncate to `k` and pack into the context budget.
fn select(hits: Vec<SearchHit>, k: usize, config: &RetrievalConfig) -> Vec<RetrievedChunk> {
    let mut ranked: Vec<(f32, RetrievedChunk)> = hits
        .into_iter()
        .map(|hit| RetrievedChunk {
            score: hit.score(),
            chunk: hit.metadata,
        })
        .filter(|c| config.score_threshold.is_none_or(|t| c.score >= t))
        .map(|c| (weighted_score(&c, config), c))
        .collect();
    ranked.sort_by(|a, b| rank_order(a, b, config.prefer_shorter));

    let mut kept: Vec<RetrievedChunk> = Vec::with_capacity(k);
    for (_, candidate) in ranked {
        if kept.len() == k {
            break;
        }
        if kept.iter().any(|c| is_duplicate(c, &candidate, config.dedup)) {
            continue;
        }
        kept.push(candidate);
    }

    let mut used = 0usize;
    let mut packed = Vec::with_capacity(kept.len());
    for candidate in kept {
        let cost = candidate.chunk.token_count;
        if !packed.is_empty() && used + cost > config.context_budget {
            break;
        }
        used += cost;
        packed.push(candidate);
    }
    packed
}

fn weighted_score(chunk: &RetrievedChunk, config: &RetrievalConfig) -> f32 {
    if chunk.chunk.kind == ChunkKind::FallbackWindow {
        chunk.score * config.fallback_weight
    } else {
        chunk.score
    }
}

fn rank_order(
    (a_score, a): &(f32, RetrievedChunk),
    (b_score, b): &(f32, RetrievedChunk),
    prefer_shorter: bool,
) -> Ordering {
    let span = |c: &RetrievedChunk| c.chunk.end_line - c.chunk.start_line;
    let by_length = if prefer_shorter {
        span(a).cmp(&span(b))
    } else {
        Ordering::Equal
    };
    b_score
        .total_cmp(a_score)
        .then(by_length)
        .then_with(|| a.chunk.path.cmp(&b.chunk.path))
        .then(a.chunk.start_line.cmp(&b.chunk.start_line))
        .then_with(|| a.chunk.chunk_id.cmp(&b.chunk.chunk_id))
}

fn is_duplicate(kept: &RetrievedChunk, candidate: &RetrievedChunk, policy: DedupPolicy) -> bool {
    let (a, b) = (&kept.chunk, &candidate.chunk);
    if a.path != b.path {
        return false;
    }
    match policy {
        DedupPolicy::Exact => a.start_line == b.start_line && a.end_line == b.end_line,
        DedupPolicy::Overlap => a.start_line <= b.end_line && b.start_line <= a.end_line,
    }
}

/// Format retrieved chunks as XML for the answer-generation prompt.
#[must_use]
pub fn format_as_context(chunks: &[RetrievedChunk]) -> String {
    if chunks.is_empty() {
        return String::new();
    }

    let mut out = String::from("<code_context>\n");

    for c in chunks {
        let chunk = &c.chunk;
        let _ = write!(
            out,
            "  <chunk file=\"{}\" lines=\"{}-{}\" symbol=\"{}\" kind=\"{}\" score=\"{:.2}\"",
            escape_attr(&chunk.path),
            chunk.start_line,
            chunk.end_line,
            escape_attr(&chunk.symbol_name),
            chunk.kind,
            c.score,
        );
        if chunk.kind == ChunkKind::FallbackWindow {
            out.push_str(" confidence=\"low\"");
        }
        out.push_str(">\n");
        out.push_str(&chunk.text);
        out.push_str("\n  </chunk>\n");
    }

    out.push_str("</code_context>");
    out
}

fn escape_attr(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for ch in value.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '"' => out.push_str("&quot;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            _ => out.push(ch),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::chunker::{chunk_id, estimate_tokens};
    use crate::embedding::HashEmbedder;
    use crate::in_memory_store::InMemoryVectorStore;
    use crate::store::{IndexCatalog, StoreConfig};

    fn chunk(path: &str, symbol: &str, kind: ChunkKind, lines: (usize, usize), tokens: usize) -> Chunk {
        Chunk {
            chunk_id: chunk_id(path, symbol, lines.0),
            path: path.into(),
            language: Lang::Python,
            kind,
            symbol_name: symbol.into(),
            start_line: lines.0,
            end_line: lines.1,
            text: format!("# {symbol}"),
            token_count: tokens,
            content_hash: String::new(),
            windowed: false,
            elided: Vec::new(),
            docstring: None,
        }
    }

    fn hit(chunk: Chunk, score: f32) -> SearchHit {
        SearchHit {
            chunk_id: chunk.chunk_id.clone(),
            metadata: chunk,
            distance: 1.0 - score,
        }
    }

    fn symbols(chunks: &[RetrievedChunk]) -> Vec<&str> {
        chunks.iter().map(|c| c.chunk.symbol_name.as_str()).collect()
    }

    #[test]
    fn ties_prefer_shorter_then_path() {
        let hits = vec![
            hit(chunk("b.py", "long", ChunkKind::Function, (1, 30), 10), 0.5),
            hit(chunk("b.py", "short", ChunkKind::Function, (40, 42), 10), 0.5),
            hit(chunk("a.py", "short_a", ChunkKind::Function, (40, 42), 10), 0.5),
            hit(chunk("c.py", "best", ChunkKind::Function, (1, 90), 10), 0.9),
        ];
        let selected = select(hits, 10, &RetrievalConfig::default());
        assert_eq!(symbols(&selected), vec!["best", "short_a", "short", "long"]);
    }

    #[test]
    fn length_ignored_when_not_preferring_shorter() {
        let config = RetrievalConfig {
            prefer_shorter: false,
            ..RetrievalConfig::default()
        };
        let hits = vec![
            hit(chunk("b.py", "short", ChunkKind::Function, (40, 42), 10), 0.5),
            hit(chunk("a.py", "long", ChunkKind::Function, (1, 30), 10), 0.5),
        ];
        assert_eq!(symbols(&select(hits, 10, &config)), vec!["long", "short"]);
    }

    #[test]
    fn overlapping_windows_keep_higher_score() {
        let hits = vec![
            hit(chunk("x.py", "x", ChunkKind::FallbackWindow, (1, 60), 10), 0.7),
            hit(chunk("x.py", "x", ChunkKind::FallbackWindow, (55, 114), 10), 0.8),
            hit(chunk("x.py", "x", ChunkKind::FallbackWindow, (120, 130), 10), 0.6),
        ];
        let selected = select(hits, 10, &RetrievalConfig::default());
        let ranges: Vec<_> = selected
            .iter()
            .map(|c| (c.chunk.start_line, c.chunk.end_line))
            .collect();
        assert_eq!(ranges, vec![(55, 114), (120, 130)]);
    }

    #[test]
    fn exact_dedup_keeps_overlapping_windows() {
        let config = RetrievalConfig {
            dedup: DedupPolicy::Exact,
            ..RetrievalConfig::default()
        };
        let hits = vec![
            hit(chunk("x.py", "a", ChunkKind::FallbackWindow, (1, 60), 10), 0.7),
            hit(chunk("x.py", "b", ChunkKind::FallbackWindow, (55, 114), 10), 0.8),
            hit(chunk("x.py", "c", ChunkKind::Block, (55, 114), 10), 0.6),
        ];
        assert_eq!(symbols(&select(hits, 10, &config)), vec!["b", "a"]);
    }

    #[test]
    fn dedup_happens_before_truncation_to_k() {
        let hits = vec![
            hit(chunk("x.py", "a", ChunkKind::FallbackWindow, (1, 60), 10), 0.9),
            hit(chunk("x.py", "b", ChunkKind::FallbackWindow, (55, 114), 10), 0.8),
            hit(chunk("y.py", "c", ChunkKind::Function, (1, 2), 10), 0.7),
        ];
        assert_eq!(symbols(&select(hits, 2, &RetrievalConfig::default())), vec!["a", "c"]);
    }

    #[test]
    fn budget_drops_lowest_ranked_first() {
        let config = RetrievalConfig {
            context_budget: 100,
            ..RetrievalConfig::default()
        };
        let hits = vec![
            hit(chunk("a.py", "a", ChunkKind::Function, (1, 2), 40), 0.9),
            hit(chunk("b.py", "b", ChunkKind::Function, (1, 2), 50), 0.8),
            hit(chunk("c.py", "c", ChunkKind::Function, (1, 2), 30), 0.7),
            hit(chunk("d.py", "d", ChunkKind::Function, (1, 2), 5), 0.6),
        ];
        let selected = select(hits, 10, &config);
        assert_eq!(symbols(&selected), vec!["a", "b"]);
        assert!(selected.iter().map(|c| c.chunk.token_count).sum::<usize>() <= 100);
    }

    #[test]
    fn single_oversized_chunk_is_still_returned() {
        let config = RetrievalConfig {
            context_budget: 10,
            ..RetrievalConfig::default()
        };
        let hits = vec![
            hit(chunk("a.py", "huge", ChunkKind::Function, (1, 200), 500), 0.9),
            hit(chunk("b.py", "tiny", ChunkKind::Function, (1, 1), 2), 0.8),
        ];
        assert_eq!(symbols(&select(hits, 5, &config)), vec!["huge"]);
    }

    #[test]
    fn threshold_and_fallback_weight() {
        let config = RetrievalConfig {
            score_threshold: Some(0.3),
            fallback_weight: 0.5,
            ..RetrievalConfig::default()
        };
        let hits = vec![
            hit(chunk("a.py", "window", ChunkKind::FallbackWindow, (1, 10), 5), 0.9),
            hit(chunk("b.py", "func", ChunkKind::Function, (1, 10), 5), 0.6),
            hit(chunk("c.py", "weak", ChunkKind::Function, (1, 10), 5), 0.2),
        ];
        let selected = select(hits, 5, &config);
        assert_eq!(symbols(&selected), vec!["func", "window"]);
        // reported score stays the raw similarity
        assert!((selected[1].score - 0.9).abs() < 1e-6);
    }

    #[test]
    fn context_carries_citations_and_escapes() {
        let mut c = chunk("src/a \"b\".py", "f", ChunkKind::FallbackWindow, (3, 4), 2);
        c.text = "x < y".into();
        let context = format_as_context(&[RetrievedChunk { chunk: c, score: 0.5 }]);
        assert!(context.starts_with("<code_context>\n"));
        assert!(context.contains("file=\"src/a &quot;b&quot;.py\" lines=\"3-4\" symbol=\"f\""));
        assert!(context.contains("kind=\"fallback-window\" score=\"0.50\" confidence=\"low\">"));
        assert!(context.contains("\nx < y\n"));
        assert!(context.ends_with("</code_context>"));
        assert!(format_as_context(&[]).is_empty());
    }

    async fn retriever_with(chunks: &[Chunk]) -> CodeRetriever {
        let catalog = IndexCatalog::new(
            Arc::new(InMemoryVectorStore::new()),
            Arc::new(HashEmbedder::new(128)),
            StoreConfig::default(),
        );
        let store = catalog.open("proj").await.unwrap();
        store.writer().unwrap().upsert(chunks).await.unwrap();
        CodeRetriever::new(store, RetrievalConfig::default())
    }

    fn source_chunk(path: &str, language: Lang, symbol: &str, text: &str) -> Chunk {
        Chunk {
            language,
            text: text.into(),
            token_count: estimate_tokens(text),
            ..chunk(path, symbol, ChunkKind::Function, (1, 1), 0)
        }
    }

    #[tokio::test]
    async fn empty_index_returns_empty_result() {
        let retriever = retriever_with(&[]).await;
        let result = retriever.retrieve("how do we parse config", 5).await.unwrap();
        assert!(result.is_empty());
        assert!(result.context.is_empty());
        assert_eq!(result.total_tokens, 0);
        assert_eq!(result.candidates, 0);
    }

    #[tokio::test]
    async fn retrieve_ranks_matching_chunk_first() {
        let retriever = retriever_with(&[
            source_chunk("math.py", Lang::Python, "add", "def add(a, b): return a + b"),
            source_chunk("io.py", Lang::Python, "read_file", "def read_file(path): return open(path).read()"),
        ])
        .await;
        let result = retriever.retrieve("read file path", 1).await.unwrap();
        assert_eq!(result.chunks.len(), 1);
        assert_eq!(result.chunks[0].chunk.symbol_name, "read_file");
        assert_eq!(result.citations(), vec!["io.py :: read_file (lines 1-1)"]);
        assert!(result.context.contains("file=\"io.py\""));
        assert_eq!(result.candidates, 2);
    }

    #[tokio::test]
    async fn retrieve_filtered_restricts_language() {
        let retriever = retriever_with(&[
            source_chunk("lib.rs", Lang::Rust, "parse", "fn parse(input: &str) {}"),
            source_chunk("parse.py", Lang::Python, "parse", "def parse(input): pass"),
        ])
        .await;
        let result = retriever
            .retrieve_filtered("parse input", 5, Lang::Rust)
            .await
            .unwrap();
        assert_eq!(result.chunks.len(), 1);
        assert_eq!(result.chunks[0].chunk.language, Lang::Rust);
    }

    #[tokio::test]
    async fn zero_k_is_empty() {
        let retriever =
            retriever_with(&[source_chunk("a.py", Lang::Python, "a", "def a(): pass")]).await;
        assert!(retriever.retrieve("a", 0).await.unwrap().is_empty());
    }
}
