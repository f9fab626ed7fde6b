use ollama_rs::Ollama;
use ollama_rs::generation::embeddings::request::{EmbeddingsInput, GenerateEmbeddingsRequest};

use super::{EmbedError, Embedder};
use crate::vector_store::BoxFuture;

/// Embeddings from an Ollama server's `/api/embed` endpoint.
#[derive(Debug, Clone)]
pub struct OllamaEmbedder {
    client: Ollama,
    model: String,
    model_id: String,
}

impl OllamaEmbedder {
    #[must_use]
    pub fn new(base_url: &str, model: String) -> Self {
        let (host, port) = parse_host_port(base_url);
        Self {
            client: Ollama::new(host, port),
            model_id: format!("ollama/{model}"),
            model,
        }
    }
}

impl Embedder for OllamaEmbedder {
    fn model_id(&self) -> &str {
        &self.model_id
    }

    fn embed_batch(&self, texts: Vec<String>) -> BoxFuture<'_, Result<Vec<Vec<f32>>, EmbedError>> {
        Box::pin(async move {
            if texts.is_empty() {
                return Ok(Vec::new());
            }
            let expected = texts.len();
            let request =
                GenerateEmbeddingsRequest::new(self.model.clone(), EmbeddingsInput::Multiple(texts));

            let response = self
                .client
                .generate_embeddings(request)
                .await
                .map_err(|e| EmbedError::Unavailable(format!("Ollama embedding request failed: {e}")))?;

            if response.embeddings.is_empty() {
                return Err(EmbedError::EmptyResponse);
            }
            if response.embeddings.len() != expected {
                return Err(EmbedError::Malformed(format!(
                    "expected {expected} vectors, got {}",
                    response.embeddings.len()
                )));
            }
            Ok(response.embeddings)
        })
    }
}

fn parse_host_port(url: &str) -> (String, u16) {
    let url = url.trim_end_matches('/');
    if let Some(colon_pos) = url.rfind(':') {
        let port_str = &url[colon_pos + 1..];
        if let Ok(port) = port_str.parse::<u16>() {
            let host = url[..colon_pos].to_string();
            return (host, port);
        }
    }
    (url.to_string(), 11434)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn model_id_is_namespaced() {
        let e = OllamaEmbedder::new("http://localhost:11434", "nomic-embed-text".into());
        assert_eq!(e.model_id(), "ollama/nomic-embed-text");
        assert_eq!(e.dimension(), None);
    }

    #[test]
    fn parse_host_port_with_port() {
        assert_eq!(
            parse_host_port("http://localhost:11434/"),
            ("http://localhost".to_owned(), 11434)
        );
        assert_eq!(
            parse_host_port("http://10.0.0.2:8080"),
            ("http://10.0.0.2".to_owned(), 8080)
        );
    }

    #[test]
    fn parse_host_port_falls_back_to_default() {
        assert_eq!(
            parse_host_port("http://localhost"),
            ("http://localhost".to_owned(), 11434)
        );
        assert_eq!(
            parse_host_port("http://localhost:99999"),
            ("http://localhost:99999".to_owned(), 11434)
        );
    }

    #[tokio::test]
    async fn unreachable_server_is_unavailable() {
        let e = OllamaEmbedder::new("http://127.0.0.1:1", "m".into());
        let err = e.embed_batch(vec!["x".into()]).await.unwrap_err();
        assert!(matches!(err, EmbedError::Unavailable(_)));
    }

    #[tokio::test]
    async fn empty_batch_skips_request() {
        let e = OllamaEmbedder::new("http://127.0.0.1:1", "m".into());
        assert!(e.embed_batch(Vec::new()).await.unwrap().is_empty());
    }
}
