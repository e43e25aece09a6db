//! Query/response value types for the RAG pipeline (`spec.md` §3 "RAGQuery /
//! RAGResponse").
use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Heuristic classification of a query's intent, selecting a prompt template.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryType {
    /// No stronger signal matched.
    General,
    /// "what/when/where/who" style lookups.
    Factual,
    /// "analyze/explain/why" style reasoning.
    Analytical,
    /// "compare/difference" style contrasts.
    Comparative,
    /// "summarize/summary" style condensation.
    Summarization,
    /// "create/design/imagine" style generation.
    Creative,
}

/// Requested shape of the generated answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseFormat {
    /// Unstructured prose.
    Text,
    /// Markdown bullet list.
    BulletPoints,
    /// Markdown numbered list.
    NumberedList,
    /// Markdown table.
    Table,
    /// JSON object.
    Json,
    /// Short condensed prose.
    Summary,
}

/// Content-safety posture applied to generation and validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SafetyLevel {
    /// Default posture.
    Standard,
    /// Stricter refusal posture.
    Conservative,
    /// Looser posture for trusted callers.
    Permissive,
}

/// Aggregated outcome of the post-generation validation checks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValidationStatus {
    /// All checks passed.
    Valid,
    /// A soft check failed (adherence, quality); answer still returned.
    Warning,
    /// A hard check failed (safety).
    Error,
}

impl ValidationStatus {
    /// Combine two statuses, keeping the more severe of the two.
    pub fn worst(self, other: Self) -> Self {
        use ValidationStatus::*;
        match (self, other) {
            (Error, _) | (_, Error) => Error,
            (Warning, _) | (_, Warning) => Warning,
            _ => Valid,
        }
    }
}

/// Errors rejecting a query before it reaches retrieval.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum QueryValidationError {
    /// Query text was empty after trimming.
    #[error("query text must not be empty")]
    Empty,
    /// Query text exceeded the 1000-character cap.
    #[error("query text exceeds maximum length of {limit} characters")]
    TooLong {
        /// The configured cap.
        limit: usize,
    },
    /// `top_k` fell outside `1..=20`.
    #[error("top_k {value} must be between 1 and 20")]
    TopKOutOfRange {
        /// The rejected value.
        value: usize,
    },
    /// `score_threshold` fell outside `0.0..=1.0`.
    #[error("score_threshold {value} must be between 0.0 and 1.0")]
    ScoreThresholdOutOfRange {
        /// The rejected value.
        value: f32,
    },
    /// `max_context_length` fell outside `1000..=8000`.
    #[error("max_context_length {value} must be between 1000 and 8000")]
    ContextLengthOutOfRange {
        /// The rejected value.
        value: usize,
    },
    /// `max_tokens` fell outside `100..=4096`.
    #[error("max_tokens {value} must be between 100 and 4096")]
    MaxTokensOutOfRange {
        /// The rejected value.
        value: u32,
    },
    /// `temperature` fell outside `0.0..=2.0`.
    #[error("temperature {value} must be between 0.0 and 2.0")]
    TemperatureOutOfRange {
        /// The rejected value.
        value: f32,
    },
}

/// A query submitted to the RAG pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RAGQuery {
    /// Raw query text.
    pub query_text: String,
    /// Number of candidate chunks to retrieve, 1-20.
    pub top_k: usize,
    /// Minimum similarity score retained after retrieval, 0.0-1.0.
    pub score_threshold: f32,
    /// Character budget for packed context, 1000-8000.
    pub max_context_length: usize,
    /// Maximum tokens the generator may produce, 100-4096.
    pub max_tokens: u32,
    /// Sampling temperature, 0.0-2.0.
    pub temperature: f32,
    /// Whether to include `sources` in the response.
    pub include_sources: bool,
    /// Requested answer shape.
    pub response_format: ResponseFormat,
    /// Requested safety posture.
    pub safety_level: SafetyLevel,
    /// Caller-supplied override of the heuristic classification.
    pub query_type: Option<QueryType>,
}

impl Default for RAGQuery {
    fn default() -> Self {
        Self {
            query_text: String::new(),
            top_k: 5,
            score_threshold: 0.0,
            max_context_length: 4000,
            max_tokens: 512,
            temperature: 0.7,
            include_sources: true,
            response_format: ResponseFormat::Text,
            safety_level: SafetyLevel::Standard,
            query_type: None,
        }
    }
}

impl RAGQuery {
    /// Validate field ranges, per `spec.md` §8 "Boundaries".
    pub fn validate(&self) -> Result<(), QueryValidationError> {
        let trimmed = self.query_text.trim();
        if trimmed.is_empty() {
            return Err(QueryValidationError::Empty);
        }
        if trimmed.chars().count() > 1000 {
            return Err(QueryValidationError::TooLong { limit: 1000 });
        }
        if !(1..=20).contains(&self.top_k) {
            return Err(QueryValidationError::TopKOutOfRange { value: self.top_k });
        }
        if !(0.0..=1.0).contains(&self.score_threshold) {
            return Err(QueryValidationError::ScoreThresholdOutOfRange { value: self.score_threshold });
        }
        if !(1000..=8000).contains(&self.max_context_length) {
            return Err(QueryValidationError::ContextLengthOutOfRange { value: self.max_context_length });
        }
        if !(100..=4096).contains(&self.max_tokens) {
            return Err(QueryValidationError::MaxTokensOutOfRange { value: self.max_tokens });
        }
        if !(0.0..=2.0).contains(&self.temperature) {
            return Err(QueryValidationError::TemperatureOutOfRange { value: self.temperature });
        }
        Ok(())
    }
}

/// A single cited chunk backing the answer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Source {
    /// Identifier of the cited chunk.
    pub chunk_id: String,
    /// Originating file name.
    pub file_name: String,
    /// Short excerpt of the cited chunk.
    pub snippet: String,
    /// Retrieval similarity score.
    pub score: f32,
}

/// The RAG pipeline's synchronous answer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RAGResponse {
    /// Generated answer text.
    pub answer: String,
    /// Chunks backing the answer, in the order used for context packing.
    pub sources: Vec<Source>,
    /// Wall-clock time to produce this response.
    pub response_time_ms: u64,
    /// Approximate token count consumed by generation.
    pub tokens_used: u32,
    /// Aggregated validation outcome.
    pub validation_status: ValidationStatus,
    /// Safety-scan score, 0.0-1.0.
    pub safety_score: f32,
    /// Freeform derived metadata (query_type, context_chars, ...).
    pub metadata: HashMap<String, String>,
}

/// One event in a streamed answer (`spec.md` §4.4 "stream()").
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RAGStreamEvent {
    /// A progress marker preceding generation.
    Progress {
        /// Human-readable stage description.
        stage: String,
    },
    /// Cited sources, emitted exactly once.
    Sources {
        /// The sources backing this answer.
        sources: Vec<Source>,
    },
    /// A generated token or token group.
    Content {
        /// The text delta.
        delta: String,
    },
    /// A recoverable failure surfaced mid-stream.
    Error {
        /// Human-readable failure description.
        message: String,
    },
    /// Always the final event.
    End {
        /// Whether the stream ended due to cancellation/truncation.
        truncated: bool,
    },
}
