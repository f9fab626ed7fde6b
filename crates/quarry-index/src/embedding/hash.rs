use super::{EmbedError, Embedder};
use crate::vector_store::BoxFuture;

/// Deterministic, offline embedder based on signed feature hashing of
/// identifier-aware tokens. Useful for tests and air-gapped indexing.
#[derive(Debug, Clone)]
pub struct HashEmbedder {
    dimension: usize,
    model_id: String,
}

impl HashEmbedder {
    /// A zero `dimension` is raised to 1.
    #[must_use]
    pub fn new(dimension: usize) -> Self {
        let dimension = dimension.max(1);
        Self {
            dimension,
            model_id: format!("hash-v1-{dimension}"),
        }
    }

    #[must_use]
    pub fn embed_text(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0.0f32; self.dimension];
        for token in tokenize(text) {
            let digest = blake3::hash(token.as_bytes());
            let bytes = digest.as_bytes();
            let bucket = u64::from_le_bytes([
                bytes[0], bytes[1], bytes[2], bytes[3], bytes[4], bytes[5], bytes[6], bytes[7],
            ]);
            #[expect(clippy::cast_possible_truncation)]
            let idx = (bucket % self.dimension as u64) as usize;
            let sign = if bytes[8] & 1 == 0 { 1.0 } else { -1.0 };
            vector[idx] += sign;
        }
        let norm = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            for x in &mut vector {
                *x /= norm;
            }
        }
        vector
    }
}

impl Embedder for HashEmbedder {
    fn model_id(&self) -> &str {
        &self.model_id
    }

    fn dimension(&self) -> Option<usize> {
        Some(self.dimension)
    }

    fn embed_batch(&self, texts: Vec<String>) -> BoxFuture<'_, Result<Vec<Vec<f32>>, EmbedError>> {
        Box::pin(async move { Ok(texts.iter().map(|t| self.embed_text(t)).collect()) })
    }
}

/// Split on non-alphanumerics, then on `camelCase` humps; lowercase everything.
/// Compound identifiers also contribute their whole lowercased form.
fn tokenize(text: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    for word in text
        .split(|c: char| !c.is_alphanumeric() && c != '_')
        .filter(|w| !w.is_empty())
    {
        let mut parts = 0;
        for piece in word.split('_').filter(|p| !p.is_empty()) {
            let mut current = String::new();
            let mut prev_lower = false;
            for c in piece.chars() {
                if c.is_uppercase() && prev_lower && !current.is_empty() {
                    tokens.push(std::mem::take(&mut current));
                    parts += 1;
                }
                prev_lower = c.is_lowercase() || c.is_ascii_digit();
                current.extend(c.to_lowercase());
            }
            if !current.is_empty() {
                tokens.push(current);
                parts += 1;
            }
        }
        if parts > 1 {
            tokens.push(word.to_lowercase());
        }
    }
    tokens
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vector_store::cosine_similarity;

    #[test]
    fn tokenize_splits_identifiers() {
        assert_eq!(
            tokenize("parseHttpRequest(raw_bytes)"),
            vec!["parse", "http", "request", "parsehttprequest", "raw", "bytes", "raw_bytes"]
        );
        assert_eq!(tokenize("def add(a, b)"), vec!["def", "add", "a", "b"]);
        assert!(tokenize("  ,;  ").is_empty());
    }

    #[test]
    fn vectors_are_normalized_and_deterministic() {
        let e = HashEmbedder::new(64);
        let a = e.embed_text("fn add(a: i32, b: i32) -> i32");
        let b = e.embed_text("fn add(a: i32, b: i32) -> i32");
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
        let norm: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5);
    }

    #[test]
    fn empty_text_is_zero_vector() {
        let v = HashEmbedder::new(8).embed_text("");
        assert!(v.iter().all(|x| *x == 0.0));
    }

    #[test]
    fn shared_vocabulary_scores_higher() {
        let e = HashEmbedder::new(256);
        let query = e.embed_text("add two numbers");
        let close = e.embed_text("def add(a, b): return a + b  # add numbers");
        let far = e.embed_text("class HttpServer: listen on a socket");
        assert!(cosine_similarity(&query, &close) > cosine_similarity(&query, &far));
    }

    #[test]
    fn model_id_includes_dimension() {
        let e = HashEmbedder::new(384);
        assert_eq!(e.model_id(), "hash-v1-384");
        assert_eq!(e.dimension(), Some(384));
        assert_eq!(HashEmbedder::new(0).dimension(), Some(1));
    }

    #[tokio::test]
    async fn embed_batch_preserves_order() {
        let e = HashEmbedder::new(32);
        let out = e
            .embed_batch(vec!["alpha".into(), "beta".into()])
            .await
            .unwrap();
        assert_eq!(out.len(), 2);
        assert_eq!(out[0], e.embed_text("alpha"));
        assert_eq!(out[1], e.embed_text("beta"));
    }
}
