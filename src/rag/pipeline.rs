//! `RAGPipeline` orchestration (`spec.md` §4.4): classify, retrieve, pack
//! context, assemble a prompt, generate, and validate.
use std::collections::HashMap;
use std::pin::Pin;
use std::sync::Arc;

use futures_core::Stream;

use crate::embedding::Embedder;
use crate::generation::{CancellationToken, GenerationEvent, Generator};
use crate::vector_store::{SearchFilter, VectorStore};

use super::classify::classify;
use super::context::pack_context;
use super::prompt::build as build_prompt;
use super::safety::validate as run_validation;
use super::types::{RAGQuery, RAGResponse, RAGStreamEvent};

/// A boxed, pinned stream of RAG events, as consumed by the SSE endpoint.
pub type RAGEventStream = Pin<Box<dyn Stream<Item = RAGStreamEvent> + Send>>;

/// End-to-end query answering over an [`Embedder`], [`VectorStore`], and
/// [`Generator`].
pub struct RAGPipeline {
    embedder: Arc<dyn Embedder>,
    vector_store: Arc<VectorStore>,
    generator: Arc<dyn Generator>,
}

impl RAGPipeline {
    /// Construct a pipeline over the given collaborators.
    pub fn new(embedder: Arc<dyn Embedder>, vector_store: Arc<VectorStore>, generator: Arc<dyn Generator>) -> Self {
        Self { embedder, vector_store, generator }
    }

    /// Produce the full response synchronously, generating under `cancel` so a
    /// caller-driven timeout or disconnect can stop token production early.
    pub async fn answer(&self, query: RAGQuery, cancel: CancellationToken) -> Result<RAGResponse, crate::error::AppError> {
        query.validate().map_err(|error| crate::error::AppError::validation(error.to_string()))?;
        let start = crate::model::now_ms();

        let query_type = query.query_type.unwrap_or_else(|| classify(&query.query_text));
        let query_vectors = self.embedder.embed(std::slice::from_ref(&query.query_text)).await?;
        let query_vector = query_vectors
            .into_iter()
            .next()
            .ok_or_else(|| crate::error::AppError::Internal { request_id: "embed-empty".to_string() })?;

        let raw_results = self.vector_store.search(&query_vector, query.top_k, None::<&SearchFilter>).await?;
        let retained: Vec<_> = raw_results.into_iter().filter(|result| result.score >= query.score_threshold).collect();
        let packed = pack_context(&retained, query.max_context_length);

        let prompt = build_prompt(query_type, query.safety_level, query.response_format, &packed.text, &query.query_text);

        let answer = self.generator.generate(&prompt, query.max_tokens, query.temperature, &cancel).await?;

        let validation = run_validation(&answer, &packed.text, !packed.sources.is_empty(), query.response_format);

        let mut metadata = HashMap::new();
        metadata.insert("query_type".to_string(), format!("{query_type:?}"));
        metadata.insert("context_chars".to_string(), packed.text.chars().count().to_string());

        Ok(RAGResponse {
            answer: answer.clone(),
            sources: if query.include_sources { packed.sources } else { Vec::new() },
            response_time_ms: crate::model::now_ms().saturating_sub(start),
            tokens_used: approximate_token_count(&answer),
            validation_status: validation.status,
            safety_score: validation.safety_score,
            metadata,
        })
    }

    /// Produce an ordered event stream for the query (`spec.md` §4.4 "stream()").
    /// `progress` precedes any `content`; `sources` is emitted exactly once;
    /// `end` is always last. `cancel` stops token emission at the next
    /// generator yield point.
    pub async fn stream(&self, query: RAGQuery, cancel: CancellationToken) -> Result<RAGEventStream, crate::error::AppError> {
        query.validate().map_err(|error| crate::error::AppError::validation(error.to_string()))?;

        let query_type = query.query_type.unwrap_or_else(|| classify(&query.query_text));
        let query_vectors = self.embedder.embed(std::slice::from_ref(&query.query_text)).await?;
        let query_vector = query_vectors
            .into_iter()
            .next()
            .ok_or_else(|| crate::error::AppError::Internal { request_id: "embed-empty".to_string() })?;

        let raw_results = self.vector_store.search(&query_vector, query.top_k, None::<&SearchFilter>).await?;
        let retained: Vec<_> = raw_results.into_iter().filter(|result| result.score >= query.score_threshold).collect();
        let packed = pack_context(&retained, query.max_context_length);

        let prompt = build_prompt(query_type, query.safety_level, query.response_format, &packed.text, &query.query_text);
        let include_sources = query.include_sources;
        let sources = packed.sources.clone();

        let mut token_stream = self.generator.stream(&prompt, query.max_tokens, query.temperature, cancel.clone()).await?;

        let events = async_stream::stream! {
            yield RAGStreamEvent::Progress { stage: "retrieval_complete".to_string() };
            if include_sources {
                yield RAGStreamEvent::Sources { sources };
            }

            let mut truncated = false;
            loop {
                if cancel.is_cancelled() {
                    truncated = true;
                    break;
                }
                match futures_util::StreamExt::next(&mut token_stream).await {
                    Some(Ok(GenerationEvent::Token(delta))) => yield RAGStreamEvent::Content { delta },
                    Some(Ok(GenerationEvent::Done)) => break,
                    Some(Err(error)) => {
                        yield RAGStreamEvent::Error { message: error.to_string() };
                        truncated = true;
                        break;
                    }
                    None => break,
                }
            }
            yield RAGStreamEvent::End { truncated };
        };

        Ok(Box::pin(events))
    }
}

fn approximate_token_count(text: &str) -> u32 {
    text.split_whitespace().count() as u32
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::HashEmbedder;
    use crate::generation::GenerationError;
    use crate::model::{Chunk, VectorRecord, now_ms};
    use crate::vector_store::{MemoryBackend, MemoryMonitor, VectorBackend};
    use super::types::ValidationStatus;
    use async_trait::async_trait;
    use std::collections::HashMap as Map;

    struct EchoGenerator;

    #[async_trait]
    impl Generator for EchoGenerator {
        async fn generate(
            &self,
            prompt: &str,
            _max_tokens: u32,
            _temperature: f32,
            _cancel: &CancellationToken,
        ) -> Result<String, GenerationError> {
            if prompt.contains("No relevant context") {
                Ok("I could not find supporting documents, but generally vacation policies allow paid time off.".to_string())
            } else {
                Ok("The vacation policy allows twenty days of paid leave per year for full-time staff.".to_string())
            }
        }

        async fn stream(
            &self,
            _prompt: &str,
            _max_tokens: u32,
            _temperature: f32,
            _cancel: CancellationToken,
        ) -> Result<crate::generation::TokenStream, GenerationError> {
            let words = vec!["twenty".to_string(), "days".to_string(), "per".to_string(), "year".to_string()];
            let stream = async_stream::stream! {
                for word in words {
                    yield Ok(GenerationEvent::Token(word));
                }
                yield Ok(GenerationEvent::Done);
            };
            Ok(Box::pin(stream))
        }

        async fn health(&self) -> bool {
            true
        }
    }

    async fn pipeline_with_indexed_chunk() -> RAGPipeline {
        let embedder: Arc<dyn Embedder> = Arc::new(HashEmbedder::new(16));
        let primary: Arc<dyn VectorBackend> = Arc::new(MemoryBackend::new());
        let monitor = Arc::new(MemoryMonitor::new(1024, 2048));
        let store = Arc::new(VectorStore::new("docs", 16, 32, 3, primary, monitor));
        store.create_collection().await.unwrap();

        let vectors = embedder.embed(&["The vacation policy allows twenty days per year.".to_string()]).await.unwrap();
        let mut metadata = Map::new();
        metadata.insert("file_name".to_string(), "policies.txt".to_string());
        let chunk = Chunk {
            id: "chunk-1".to_string(),
            source_document_id: "doc-1".to_string(),
            chunk_index: 0,
            text: "The vacation policy allows twenty days per year.".to_string(),
            start_char: 0,
            end_char: 48,
            byte_size: 48,
            word_count: 8,
            sentence_count: 1,
            created_at: now_ms(),
            content_preview: "The vacation policy allows twenty days per year.".to_string(),
            metadata,
        };
        store
            .upsert(vec![VectorRecord { chunk_id: chunk.id.clone(), embedding: vectors[0].clone(), payload: chunk }])
            .await
            .unwrap();

        RAGPipeline::new(embedder, store, Arc::new(EchoGenerator))
    }

    #[tokio::test]
    async fn answer_returns_sources_and_valid_status() {
        let pipeline = pipeline_with_indexed_chunk().await;
        let query = RAGQuery {
            query_text: "What is the vacation policy?".to_string(),
            top_k: 3,
            score_threshold: 0.0,
            ..RAGQuery::default()
        };
        let response = pipeline.answer(query, CancellationToken::new()).await.unwrap();
        assert!(!response.sources.is_empty());
        assert_eq!(response.sources[0].file_name, "policies.txt");
        assert_eq!(response.validation_status, ValidationStatus::Valid);
        assert_eq!(response.safety_score, 1.0);
    }

    #[tokio::test]
    async fn answer_uses_fallback_template_on_empty_index() {
        let embedder: Arc<dyn Embedder> = Arc::new(HashEmbedder::new(16));
        let primary: Arc<dyn VectorBackend> = Arc::new(MemoryBackend::new());
        let monitor = Arc::new(MemoryMonitor::new(1024, 2048));
        let store = Arc::new(VectorStore::new("docs", 16, 32, 3, primary, monitor));
        store.create_collection().await.unwrap();
        let pipeline = RAGPipeline::new(embedder, store, Arc::new(EchoGenerator));

        let query = RAGQuery { query_text: "Hello".to_string(), ..RAGQuery::default() };
        let response = pipeline.answer(query, CancellationToken::new()).await.unwrap();
        assert!(response.sources.is_empty());
        assert!(!response.answer.is_empty());
        assert!(matches!(response.validation_status, ValidationStatus::Valid | ValidationStatus::Warning));
    }

    #[tokio::test]
    async fn stream_emits_progress_then_sources_then_content_then_end() {
        let pipeline = pipeline_with_indexed_chunk().await;
        let query = RAGQuery { query_text: "What is the vacation policy?".to_string(), ..RAGQuery::default() };
        let mut stream = pipeline.stream(query, CancellationToken::new()).await.unwrap();

        let mut events = Vec::new();
        use futures_util::StreamExt;
        while let Some(event) = stream.next().await {
            events.push(event);
        }

        assert!(matches!(events.first(), Some(RAGStreamEvent::Progress { .. })));
        assert!(matches!(events.last(), Some(RAGStreamEvent::End { .. })));
        assert!(events.iter().any(|event| matches!(event, RAGStreamEvent::Sources { .. })));
        assert!(events.iter().any(|event| matches!(event, RAGStreamEvent::Content { .. })));
    }

    #[tokio::test]
    async fn rejects_invalid_query_before_touching_collaborators() {
        let pipeline = pipeline_with_indexed_chunk().await;
        let query = RAGQuery { query_text: String::new(), ..RAGQuery::default() };
        let error = pipeline.answer(query, CancellationToken::new()).await.unwrap_err();
        assert!(matches!(error, crate::error::AppError::Validation(_)));
    }
}
