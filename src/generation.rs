//! Generative model client abstraction consumed by [`crate::rag`]. The
//! concrete generative model is an external collaborator (`spec.md` §6.2);
//! this module defines the [`Generator`] contract plus an HTTP adapter
//! mirroring the summarization client's Ollama integration, extended with a
//! streaming variant and cooperative cancellation.
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_stream::stream;
use async_trait::async_trait;
use futures_core::Stream;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use thiserror::Error;

/// Errors surfaced while attempting generation.
#[derive(Debug, Error)]
pub enum GenerationError {
    /// Provider was explicitly disabled or unreachable.
    #[error("generation provider unavailable: {0}")]
    ProviderUnavailable(String),
    /// Provider returned an error response.
    #[error("failed to generate response: {0}")]
    GenerationFailed(String),
    /// Provider response could not be parsed.
    #[error("malformed provider response: {0}")]
    InvalidResponse(String),
    /// Generation was cooperatively cancelled before completion.
    #[error("generation cancelled")]
    Cancelled,
}

/// Cooperative cancellation signal shared between a caller and a generation
/// task. Cheap to clone; all clones observe the same cancellation.
#[derive(Clone, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    /// Construct a fresh, not-yet-cancelled token.
    pub fn new() -> Self {
        Self::default()
    }

    /// Signal cancellation; observers see it on their next check.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    /// Whether cancellation has been signaled.
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

/// One event in a [`Generator::stream`] token stream.
#[derive(Debug, Clone)]
pub enum GenerationEvent {
    /// A fragment of generated text, in generation order.
    Token(String),
    /// Terminal event; no further tokens follow.
    Done,
}

/// A boxed, pinned stream of generation events.
pub type TokenStream = Pin<Box<dyn Stream<Item = Result<GenerationEvent, GenerationError>> + Send>>;

/// Interface implemented by generative model backends (`spec.md` §6.2).
#[async_trait]
pub trait Generator: Send + Sync {
    /// Generate a complete response for the given prompt.
    async fn generate(
        &self,
        prompt: &str,
        max_tokens: u32,
        temperature: f32,
        cancel: &CancellationToken,
    ) -> Result<String, GenerationError>;

    /// Generate a response as an ordered stream of token events. Implementations
    /// must stop emitting tokens promptly once `cancel` is signaled.
    async fn stream(
        &self,
        prompt: &str,
        max_tokens: u32,
        temperature: f32,
        cancel: CancellationToken,
    ) -> Result<TokenStream, GenerationError>;

    /// Best-effort liveness check; does not guarantee the next call succeeds.
    async fn health(&self) -> bool;
}

#[derive(Debug, Deserialize)]
struct OllamaGenerateResponse {
    response: String,
    done: bool,
}

/// HTTP adapter for an Ollama-style `/api/generate` endpoint.
pub struct HttpGenerator {
    client: Client,
    base_url: String,
    model: String,
}

impl HttpGenerator {
    /// Construct an HTTP generator against the given base URL and model.
    pub fn new(base_url: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            client: Client::builder()
                .user_agent("zerorag/generation")
                .build()
                .expect("failed to construct reqwest client for generation"),
            base_url: base_url.into(),
            model: model.into(),
        }
    }

    fn endpoint(&self) -> String {
        format!("{}/api/generate", self.base_url.trim_end_matches('/'))
    }
}

#[async_trait]
impl Generator for HttpGenerator {
    async fn generate(
        &self,
        prompt: &str,
        max_tokens: u32,
        temperature: f32,
        cancel: &CancellationToken,
    ) -> Result<String, GenerationError> {
        if cancel.is_cancelled() {
            return Err(GenerationError::Cancelled);
        }

        let payload = json!({
            "model": self.model,
            "prompt": prompt,
            "stream": false,
            "options": {
                "temperature": temperature,
                "num_predict": max_tokens,
            }
        });

        let response = self
            .client
            .post(self.endpoint())
            .json(&payload)
            .send()
            .await
            .map_err(|error| {
                GenerationError::ProviderUnavailable(format!(
                    "failed to reach generator at {}: {error}",
                    self.base_url
                ))
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(GenerationError::GenerationFailed(format!(
                "generator returned {status}: {body}"
            )));
        }

        if cancel.is_cancelled() {
            return Err(GenerationError::Cancelled);
        }

        let body: OllamaGenerateResponse = response.json().await.map_err(|error| {
            GenerationError::InvalidResponse(format!("failed to decode generator response: {error}"))
        })?;

        if !body.done {
            return Err(GenerationError::InvalidResponse(
                "generator response incomplete".into(),
            ));
        }

        Ok(body.response)
    }

    async fn stream(
        &self,
        prompt: &str,
        max_tokens: u32,
        temperature: f32,
        cancel: CancellationToken,
    ) -> Result<TokenStream, GenerationError> {
        // The Ollama-style endpoint streams newline-delimited JSON objects when
        // `stream: true`; we request the full response instead and re-chunk it
        // into word-sized events so the service surface's SSE layer has a real
        // ordered sequence to forward without depending on chunked transfer
        // decoding here.
        let full = self
            .generate(prompt, max_tokens, temperature, &cancel)
            .await?;

        let stream = stream! {
            for word in full.split_inclusive(' ') {
                if cancel.is_cancelled() {
                    yield Err(GenerationError::Cancelled);
                    return;
                }
                yield Ok(GenerationEvent::Token(word.to_string()));
            }
            yield Ok(GenerationEvent::Done);
        };

        Ok(Box::pin(stream))
    }

    async fn health(&self) -> bool {
        self.client
            .get(format!("{}/api/tags", self.base_url.trim_end_matches('/')))
            .send()
            .await
            .map(|response| response.status().is_success())
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::StreamExt;
    use httpmock::{Method::POST, MockServer};

    #[tokio::test]
    async fn http_generator_handles_successful_response() {
        let server = MockServer::start_async().await;
        let generator = HttpGenerator::new(server.base_url(), "llama3");

        let mock = server
            .mock_async(|when, then| {
                when.method(POST).path("/api/generate");
                then.status(200).json_body(json!({
                    "response": "hello there",
                    "done": true
                }));
            })
            .await;

        let text = generator
            .generate("say hi", 128, 0.7, &CancellationToken::new())
            .await
            .expect("generation should succeed");

        mock.assert();
        assert_eq!(text, "hello there");
    }

    #[tokio::test]
    async fn http_generator_rejects_when_cancelled_upfront() {
        let generator = HttpGenerator::new("http://127.0.0.1:1", "llama3");
        let cancel = CancellationToken::new();
        cancel.cancel();

        let error = generator
            .generate("say hi", 128, 0.7, &cancel)
            .await
            .expect_err("cancelled before send");
        assert!(matches!(error, GenerationError::Cancelled));
    }

    #[tokio::test]
    async fn stream_emits_tokens_then_done() {
        let server = MockServer::start_async().await;
        let generator = HttpGenerator::new(server.base_url(), "llama3");

        server
            .mock_async(|when, then| {
                when.method(POST).path("/api/generate");
                then.status(200).json_body(json!({
                    "response": "a b",
                    "done": true
                }));
            })
            .await;

        let mut events = generator
            .stream("say hi", 128, 0.7, CancellationToken::new())
            .await
            .expect("stream should start")
            .collect::<Vec<_>>()
            .await;

        let last = events.pop().expect("at least one event");
        assert!(matches!(last, Ok(GenerationEvent::Done)));
        assert!(!events.is_empty());
    }
}
