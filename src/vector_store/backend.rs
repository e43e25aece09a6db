//! The pluggable storage contract VectorStore delegates to (`spec.md` §6.3).
use async_trait::async_trait;
use thiserror::Error;

use crate::model::{SearchResult, VectorRecord};

/// Errors a [`VectorBackend`] may surface. The store retries `Transient`
/// failures with backoff and treats `Permanent` as immediately fatal for the
/// calling operation.
#[derive(Debug, Error, Clone)]
pub enum BackendError {
    /// Retryable failure: timeout, connection refused, 5xx.
    #[error("transient backend failure: {0}")]
    Transient(String),
    /// Non-retryable failure: malformed request, auth rejected, 4xx (non-409).
    #[error("permanent backend failure: {0}")]
    Permanent(String),
    /// A vector's length did not match the collection's declared dimension.
    #[error("dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch {
        /// Dimension the collection was created with.
        expected: usize,
        /// Dimension of the rejected vector.
        actual: usize,
    },
    /// The operation queue has reached its bounded capacity.
    #[error("operation queue is full")]
    QueueFull,
}

/// Optional constraints narrowing a similarity search to a payload subset.
#[derive(Debug, Clone, Default)]
pub struct SearchFilter {
    /// Restrict results to chunks from this source document.
    pub source_document_id: Option<String>,
    /// Restrict results to chunks carrying all of these metadata tags.
    pub metadata_equals: Vec<(String, String)>,
}

/// The storage contract a concrete vector database implements (`spec.md` §4.2,
/// "Backend interface (consumed)"). Both the Qdrant-style adapter and the
/// in-memory fallback implement this trait identically from VectorStore's
/// point of view.
#[async_trait]
pub trait VectorBackend: Send + Sync {
    /// Open/validate connectivity to the backend. Called once at startup.
    async fn open(&self) -> Result<(), BackendError>;

    /// Idempotently ensure a collection of the given dimension exists.
    async fn ensure_collection(&self, name: &str, dim: usize) -> Result<(), BackendError>;

    /// Insert or update the given records. Returns per-record failures rather
    /// than aborting the whole batch.
    async fn upsert(&self, records: &[VectorRecord]) -> Result<Vec<UpsertOutcome>, BackendError>;

    /// Remove the chunks with the given ids. Deleting an unknown id is a no-op success.
    async fn delete(&self, ids: &[String]) -> Result<(), BackendError>;

    /// Cosine-similarity search, optionally filtered, sorted by descending score.
    async fn search(
        &self,
        vector: &[f32],
        top_k: usize,
        filter: Option<&SearchFilter>,
    ) -> Result<Vec<SearchResult>, BackendError>;

    /// Document/vector counts and storage metrics.
    async fn stats(&self) -> Result<BackendStats, BackendError>;

    /// Release any held resources (connections, files). Best-effort.
    async fn close(&self) -> Result<(), BackendError>;
}

/// Per-record result of an `upsert` call.
#[derive(Debug, Clone)]
pub enum UpsertOutcome {
    /// The record was written successfully.
    Success {
        /// Identifier of the written chunk.
        chunk_id: String,
    },
    /// The record was rejected; `reason` explains why.
    Failure {
        /// Identifier of the rejected chunk.
        chunk_id: String,
        /// Proximate cause, suitable for a document's `error_message`.
        reason: String,
    },
}

/// Backend-reported storage metrics.
#[derive(Debug, Clone, Default)]
pub struct BackendStats {
    /// Number of vectors currently stored.
    pub vector_count: usize,
    /// Best-effort estimate of storage footprint, in bytes.
    pub storage_bytes: u64,
}
