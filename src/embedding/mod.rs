//! Embedding client abstraction consumed by [`crate::processing`] and
//! [`crate::rag`]. The concrete embedding model is an external collaborator
//! (`spec.md` §6.2); this module defines the [`Embedder`] contract plus two
//! adapters: a deterministic hash-based fallback usable without any external
//! service, and an HTTP adapter for an Ollama-style embeddings endpoint.
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors raised by embedding providers.
#[derive(Debug, Error)]
pub enum EmbeddingError {
    /// Provider was unable to produce embeddings for the supplied input.
    #[error("failed to generate embeddings: {0}")]
    GenerationFailed(String),
    /// Provider returned a vector whose length does not match the collection dimension.
    #[error("embedding dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch {
        /// Dimension the collection was created with.
        expected: usize,
        /// Dimension actually produced by the embedder.
        actual: usize,
    },
    /// The embedder's health check failed or timed out.
    #[error("embedder unhealthy: {0}")]
    Unhealthy(String),
}

/// Interface implemented by embedding backends (`spec.md` §6.2).
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Produce one embedding vector per input text, in order.
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError>;
    /// Fixed dimension of vectors this embedder produces.
    fn dim(&self) -> usize;
    /// Best-effort liveness check; does not guarantee the next call succeeds.
    async fn health(&self) -> bool;
}

/// Deterministic, dependency-free embedder. Encodes a text's byte distribution
/// into a unit-norm vector; suitable as a fallback or for tests, not intended
/// to produce semantically meaningful embeddings.
pub struct HashEmbedder {
    dim: usize,
}

impl HashEmbedder {
    /// Construct a hash embedder producing vectors of the given dimension.
    pub const fn new(dim: usize) -> Self {
        Self { dim }
    }

    fn encode(text: &str, dim: usize) -> Vec<f32> {
        let mut embedding = vec![0.0_f32; dim];
        if text.is_empty() {
            return embedding;
        }

        for (idx, byte) in text.bytes().enumerate() {
            let position = idx % dim;
            embedding[position] += f32::from(byte) / 255.0;
        }

        let norm = embedding
            .iter()
            .map(|value| value * value)
            .sum::<f32>()
            .sqrt();
        if norm > 0.0 {
            for value in &mut embedding {
                *value /= norm;
            }
        }
        embedding
    }
}

#[async_trait]
impl Embedder for HashEmbedder {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        if texts.is_empty() {
            return Err(EmbeddingError::GenerationFailed(
                "no texts provided".to_string(),
            ));
        }
        if self.dim == 0 {
            return Err(EmbeddingError::GenerationFailed(
                "embedding dimension must be greater than zero".to_string(),
            ));
        }

        tracing::debug!(dim = self.dim, count = texts.len(), "generating embeddings (hash fallback)");
        Ok(texts.iter().map(|text| Self::encode(text, self.dim)).collect())
    }

    fn dim(&self) -> usize {
        self.dim
    }

    async fn health(&self) -> bool {
        true
    }
}

#[derive(Debug, Serialize)]
struct OllamaEmbeddingRequest<'a> {
    model: &'a str,
    prompt: &'a str,
}

#[derive(Debug, Deserialize)]
struct OllamaEmbeddingResponse {
    embedding: Vec<f32>,
}

/// HTTP adapter for an Ollama-style `/api/embeddings` endpoint.
pub struct HttpEmbedder {
    client: reqwest::Client,
    base_url: String,
    model: String,
    dim: usize,
}

impl HttpEmbedder {
    /// Construct an HTTP embedder against the given base URL and model.
    pub fn new(base_url: impl Into<String>, model: impl Into<String>, dim: usize) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into(),
            model: model.into(),
            dim,
        }
    }
}

#[async_trait]
impl Embedder for HttpEmbedder {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        if texts.is_empty() {
            return Err(EmbeddingError::GenerationFailed(
                "no texts provided".to_string(),
            ));
        }

        let mut vectors = Vec::with_capacity(texts.len());
        for text in texts {
            let response = self
                .client
                .post(format!("{}/api/embeddings", self.base_url))
                .json(&OllamaEmbeddingRequest {
                    model: &self.model,
                    prompt: text,
                })
                .send()
                .await
                .map_err(|error| EmbeddingError::GenerationFailed(error.to_string()))?;

            if !response.status().is_success() {
                return Err(EmbeddingError::GenerationFailed(format!(
                    "embedding provider returned status {}",
                    response.status()
                )));
            }

            let parsed: OllamaEmbeddingResponse = response
                .json()
                .await
                .map_err(|error| EmbeddingError::GenerationFailed(error.to_string()))?;

            if parsed.embedding.len() != self.dim {
                return Err(EmbeddingError::DimensionMismatch {
                    expected: self.dim,
                    actual: parsed.embedding.len(),
                });
            }
            vectors.push(parsed.embedding);
        }
        Ok(vectors)
    }

    fn dim(&self) -> usize {
        self.dim
    }

    async fn health(&self) -> bool {
        self.client
            .get(format!("{}/api/tags", self.base_url))
            .send()
            .await
            .map(|response| response.status().is_success())
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn hash_embedder_produces_unit_norm_vectors() {
        let embedder = HashEmbedder::new(16);
        let vectors = embedder
            .embed(&["hello world".to_string()])
            .await
            .expect("embed should succeed");
        assert_eq!(vectors.len(), 1);
        assert_eq!(vectors[0].len(), 16);
        let norm: f32 = vectors[0].iter().map(|v| v * v).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-4 || norm == 0.0);
    }

    #[tokio::test]
    async fn hash_embedder_rejects_empty_input() {
        let embedder = HashEmbedder::new(16);
        let result = embedder.embed(&[]).await;
        assert!(matches!(result, Err(EmbeddingError::GenerationFailed(_))));
    }

    #[tokio::test]
    async fn hash_embedder_is_deterministic() {
        let embedder = HashEmbedder::new(8);
        let a = embedder.embed(&["repeat me".to_string()]).await.unwrap();
        let b = embedder.embed(&["repeat me".to_string()]).await.unwrap();
        assert_eq!(a, b);
    }
}
