//! Crate-wide error taxonomy.
//!
//! Every component-level error (chunking, embedding, generation, backend, queue)
//! converts into [`AppError`] via `#[from]`, and the HTTP surface is the single
//! place that maps an `AppError` into a status code and JSON envelope. Background
//! workers never propagate an `AppError`; they log it and continue.

use thiserror::Error;

use crate::generation::GenerationError;
use crate::processing::ChunkingError;
use crate::{embedding::EmbeddingError, vector_store::BackendError};

/// Unified error type surfaced by the public API of every core component.
#[derive(Debug, Error)]
pub enum AppError {
    /// Caller-side error recoverable by the caller (bad file, invalid query, ...).
    #[error("{0}")]
    Validation(String),
    /// Missing or invalid API key on a protected route.
    #[error("{0}")]
    Unauthorized(String),
    /// Requested resource does not exist.
    #[error("not found: {0}")]
    NotFound(String),
    /// Retryable failure (backend timeout, generator overloaded).
    #[error("transient failure: {0}")]
    Transient(String),
    /// Non-retryable backend failure.
    #[error("permanent failure: {0}")]
    Permanent(String),
    /// State precondition failed (duplicate id, dimension mismatch).
    #[error("conflict: {0}")]
    Conflict(String),
    /// Throughput limit exceeded.
    #[error("rate limited, retry after {retry_after_secs}s")]
    RateLimited {
        /// Seconds the caller should wait before retrying.
        retry_after_secs: u64,
    },
    /// Cooperative cancellation or client disconnect.
    #[error("operation cancelled")]
    Cancelled,
    /// Unexpected internal error; logged with a stable request id.
    #[error("internal error (request_id={request_id})")]
    Internal {
        /// Identifier correlated with the logged detail.
        request_id: String,
    },
}

impl AppError {
    /// Construct a [`AppError::Validation`] from any displayable message.
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    /// Stable machine-readable error code used in HTTP envelopes and logs.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Validation(_) => "VALIDATION_ERROR",
            Self::Unauthorized(_) => "UNAUTHORIZED",
            Self::NotFound(_) => "NOT_FOUND",
            Self::Transient(_) => "TRANSIENT_ERROR",
            Self::Permanent(_) => "PERMANENT_ERROR",
            Self::Conflict(_) => "CONFLICT",
            Self::RateLimited { .. } => "RATE_LIMITED",
            Self::Cancelled => "CANCELLED",
            Self::Internal { .. } => "INTERNAL_ERROR",
        }
    }
}

impl From<BackendError> for AppError {
    fn from(error: BackendError) -> Self {
        match error {
            BackendError::Transient(message) => Self::Transient(message),
            BackendError::Permanent(message) => Self::Permanent(message),
            BackendError::DimensionMismatch { expected, actual } => Self::Conflict(format!(
                "dimension mismatch: collection expects {expected}, got {actual}"
            )),
            BackendError::QueueFull => Self::Transient("operation queue is full".to_string()),
        }
    }
}

impl From<ChunkingError> for AppError {
    fn from(error: ChunkingError) -> Self {
        Self::Validation(error.to_string())
    }
}

impl From<EmbeddingError> for AppError {
    fn from(error: EmbeddingError) -> Self {
        match error {
            EmbeddingError::DimensionMismatch { expected, actual } => Self::Permanent(format!(
                "embedder produced dimension {actual}, expected {expected}"
            )),
            other => Self::Transient(other.to_string()),
        }
    }
}

impl From<GenerationError> for AppError {
    fn from(error: GenerationError) -> Self {
        match error {
            GenerationError::Cancelled => Self::Cancelled,
            other => Self::Transient(other.to_string()),
        }
    }
}
