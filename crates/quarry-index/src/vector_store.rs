//! Narrow interface over a vector-similarity index backend.
//!
//! Every operation is scoped to a named collection. Scores are cosine
//! similarity in `[-1, 1]`; callers derive cosine distance as `1 - score`.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;

#[derive(Debug, thiserror::Error)]
pub enum VectorStoreError {
    #[error("connection error: {0}")]
    Connection(String),
    #[error("collection error: {0}")]
    Collection(String),
    #[error("upsert error: {0}")]
    Upsert(String),
    #[error("search error: {0}")]
    Search(String),
    #[error("delete error: {0}")]
    Delete(String),
    #[error("scroll error: {0}")]
    Scroll(String),
    #[error("serialization error: {0}")]
    Serialization(String),
}

pub type Payload = HashMap<String, serde_json::Value>;

#[derive(Debug, Clone)]
pub struct VectorPoint {
    pub id: String,
    pub vector: Vec<f32>,
    pub payload: Payload,
}

/// Identity of the embedding function a collection was built with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollectionInfo {
    pub model: String,
    pub dimension: usize,
}

#[derive(Debug, Clone, Default)]
pub struct VectorFilter {
    pub must: Vec<FieldCondition>,
    pub must_not: Vec<FieldCondition>,
}

impl VectorFilter {
    /// Filter requiring `field == value`.
    #[must_use]
    pub fn text_eq(field: &str, value: impl Into<String>) -> Self {
        Self {
            must: vec![FieldCondition {
                field: field.to_owned(),
                value: FieldValue::Text(value.into()),
            }],
            must_not: Vec::new(),
        }
    }

    #[must_use]
    pub fn matches(&self, payload: &Payload) -> bool {
        self.must.iter().all(|cond| {
            payload
                .get(&cond.field)
                .is_some_and(|val| cond.value.matches(val))
        }) && !self.must_not.iter().any(|cond| {
            payload
                .get(&cond.field)
                .is_some_and(|val| cond.value.matches(val))
        })
    }
}

#[derive(Debug, Clone)]
pub struct FieldCondition {
    pub field: String,
    pub value: FieldValue,
}

#[derive(Debug, Clone)]
pub enum FieldValue {
    Integer(i64),
    Text(String),
}

impl FieldValue {
    fn matches(&self, val: &serde_json::Value) -> bool {
        match self {
            Self::Integer(i) => val.as_i64() == Some(*i),
            Self::Text(s) => val.as_str() == Some(s.as_str()),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ScoredVectorPoint {
    pub id: String,
    pub score: f32,
    pub payload: Payload,
}

/// Stored point without its vector, as returned by [`VectorStore::scroll`].
#[derive(Debug, Clone)]
pub struct StoredPayload {
    pub id: String,
    pub payload: Payload,
}

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

pub trait VectorStore: Send + Sync {
    /// Create the collection if missing, recording the embedder identity.
    /// An existing collection keeps its original info.
    fn ensure_collection(
        &self,
        collection: &str,
        info: &CollectionInfo,
    ) -> BoxFuture<'_, Result<(), VectorStoreError>>;

    fn collection_info(
        &self,
        collection: &str,
    ) -> BoxFuture<'_, Result<Option<CollectionInfo>, VectorStoreError>>;

    fn delete_collection(&self, collection: &str) -> BoxFuture<'_, Result<(), VectorStoreError>>;

    /// Insert or overwrite points by id. Either every point is written or none is.
    fn upsert(
        &self,
        collection: &str,
        points: Vec<VectorPoint>,
    ) -> BoxFuture<'_, Result<(), VectorStoreError>>;

    /// Top `limit` points by cosine similarity, best first, ties broken by id.
    /// A missing collection yields no results.
    fn search(
        &self,
        collection: &str,
        vector: Vec<f32>,
        limit: usize,
        filter: Option<VectorFilter>,
    ) -> BoxFuture<'_, Result<Vec<ScoredVectorPoint>, VectorStoreError>>;

    fn delete_by_ids(
        &self,
        collection: &str,
        ids: Vec<String>,
    ) -> BoxFuture<'_, Result<(), VectorStoreError>>;

    /// All points matching `filter`, ordered by id.
    fn scroll(
        &self,
        collection: &str,
        filter: Option<VectorFilter>,
    ) -> BoxFuture<'_, Result<Vec<StoredPayload>, VectorStoreError>>;

    fn count(&self, collection: &str) -> BoxFuture<'_, Result<usize, VectorStoreError>>;

    fn list_collections(&self) -> BoxFuture<'_, Result<Vec<String>, VectorStoreError>>;

    /// Release backend resources. Further calls may fail.
    fn close(&self) -> BoxFuture<'_, ()> {
        Box::pin(async {})
    }
}

pub(crate) fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}

/// Sort best-first with a deterministic id tie-break and keep `limit`.
pub(crate) fn rank_and_truncate(scored: &mut Vec<ScoredVectorPoint>, limit: usize) {
    scored.sort_by(|a, b| {
        b.score
            .total_cmp(&a.score)
            .then_with(|| a.id.cmp(&b.id))
    });
    scored.truncate(limit);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn payload(pairs: &[(&str, serde_json::Value)]) -> Payload {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_owned(), v.clone()))
            .collect()
    }

    #[test]
    fn cosine_identical_vectors() {
        let v = vec![1.0, 2.0, 3.0];
        assert!((cosine_similarity(&v, &v) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn cosine_orthogonal_vectors() {
        assert!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]).abs() < 1e-6);
    }

    #[test]
    fn cosine_zero_or_mismatched_vectors() {
        assert!(cosine_similarity(&[0.0, 0.0], &[1.0, 1.0]).abs() < f32::EPSILON);
        assert!(cosine_similarity(&[1.0], &[1.0, 1.0]).abs() < f32::EPSILON);
    }

    #[test]
    fn filter_must_and_must_not() {
        let p = payload(&[
            ("path", serde_json::json!("src/a.rs")),
            ("start_line", serde_json::json!(3)),
        ]);
        assert!(VectorFilter::text_eq("path", "src/a.rs").matches(&p));
        assert!(!VectorFilter::text_eq("path", "src/b.rs").matches(&p));
        assert!(!VectorFilter::text_eq("language", "rust").matches(&p));

        let excl = VectorFilter {
            must: Vec::new(),
            must_not: vec![FieldCondition {
                field: "start_line".into(),
                value: FieldValue::Integer(3),
            }],
        };
        assert!(!excl.matches(&p));
        assert!(VectorFilter::default().matches(&p));
    }

    #[test]
    fn ranking_breaks_ties_by_id() {
        let point = |id: &str, score| ScoredVectorPoint {
            id: id.into(),
            score,
            payload: Payload::new(),
        };
        let mut scored = vec![point("b", 0.5), point("c", 0.9), point("a", 0.5)];
        rank_and_truncate(&mut scored, 2);
        let ids: Vec<_> = scored.iter().map(|p| p.id.as_str()).collect();
        assert_eq!(ids, vec!["c", "a"]);
    }
}
