//! Shared domain data model.
//!
//! These types are value objects with clearly owned lifecycles (see `spec.md` §3).
//! `DocumentPipeline` exclusively writes [`DocumentMetadata`]; `VectorStore`
//! exclusively owns the index and [`OperationQueueItem`]s; the service surface
//! exclusively owns [`StreamConnection`] and [`UploadProgress`] records.

use std::collections::HashMap;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Milliseconds since the Unix epoch, used for all timestamp fields.
///
/// Plain `u64` rather than a calendar type keeps the model free of a chrono
/// dependency the teacher's stack doesn't carry; callers that need calendar
/// arithmetic convert at the edge.
pub type TimestampMs = u64;

/// Current wall-clock time in milliseconds since the Unix epoch.
pub fn now_ms() -> TimestampMs {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Lifecycle state of a document moving through [`crate::processing`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentStatus {
    /// Upload accepted, not yet validated.
    Pending,
    /// Validating file size/format/name.
    Validating,
    /// Parsing raw bytes into text.
    Parsing,
    /// Splitting normalized text into chunks.
    Chunking,
    /// Generating chunk embeddings.
    Embedding,
    /// Writing vectors to the store.
    Storing,
    /// Ingestion finished successfully.
    Completed,
    /// Ingestion failed; see `error_message`.
    Failed,
    /// Ingestion was cooperatively cancelled.
    Cancelled,
    /// Document and its chunks were explicitly removed.
    Deleted,
}

/// High-level content classification of an ingested document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContentType {
    /// Prose text with no detected tabular/structured features.
    Text,
    /// Predominantly tabular/structured content (e.g. CSV).
    Structured,
    /// A mix of prose and structured elements (e.g. Markdown with tables).
    Mixed,
}

/// Immutable-after-creation metadata describing one uploaded document.
///
/// Only `status`, `error_message`, `processed_at`, and `processing_time_ms` are
/// mutated after creation, by [`crate::processing`] as the document advances
/// through its state machine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentMetadata {
    /// Opaque, globally unique identifier.
    pub id: String,
    /// Original uploaded file name.
    pub file_name: String,
    /// Size of the uploaded payload in bytes.
    pub file_size: u64,
    /// File extension, lower-cased, without the leading dot.
    pub file_type: String,
    /// Detected text encoding (e.g. `"utf-8"`).
    pub encoding: String,
    /// Word count of the normalized text.
    pub word_count: usize,
    /// Character count of the normalized text.
    pub char_count: usize,
    /// Sentence count of the normalized text.
    pub sentence_count: usize,
    /// Paragraph count of the normalized text.
    pub paragraph_count: usize,
    /// Line count of the raw text.
    pub line_count: usize,
    /// SHA-256 digest of the normalized text, hex-encoded.
    pub content_hash: String,
    /// Creation timestamp (upload acceptance time).
    pub created_at: TimestampMs,
    /// Timestamp of the most recent metadata mutation.
    pub last_modified: TimestampMs,
    /// Timestamp processing completed (success or failure), if it has.
    pub processed_at: Option<TimestampMs>,
    /// Wall-clock processing duration once finished.
    pub processing_time_ms: Option<u64>,
    /// Current pipeline state.
    pub status: DocumentStatus,
    /// Whether the document passed validation.
    pub is_valid: bool,
    /// Validation errors accumulated, if any.
    pub validation_errors: Vec<String>,
    /// Coarse content classification.
    pub content_type: ContentType,
    /// Whether the source appeared to contain tables.
    pub has_tables: bool,
    /// Whether the source appeared to reference images.
    pub has_images: bool,
    /// Whether the source appeared to contain hyperlinks.
    pub has_links: bool,
    /// Best-effort detected language code (e.g. `"en"`), if determinable.
    pub language_detected: Option<String>,
    /// Number of chunks produced once chunking has completed.
    pub chunk_count: usize,
    /// Proximate failure reason, set only when `status == Failed`.
    pub error_message: Option<String>,
}

/// A contiguous, immutable text fragment stored as one vector in the index.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Chunk {
    /// Stable identifier: `hash(source_document_id, chunk_index, start_char)`.
    pub id: String,
    /// Identifier of the document this chunk was extracted from.
    pub source_document_id: String,
    /// 0-based position of this chunk within its source document.
    pub chunk_index: usize,
    /// Chunk text.
    pub text: String,
    /// Inclusive start offset into the normalized source text, in characters.
    pub start_char: usize,
    /// Exclusive end offset into the normalized source text, in characters.
    pub end_char: usize,
    /// UTF-8 byte length of `text`.
    pub byte_size: usize,
    /// Word count of `text`.
    pub word_count: usize,
    /// Sentence count of `text`.
    pub sentence_count: usize,
    /// Creation timestamp.
    pub created_at: TimestampMs,
    /// First 100 characters of `text`, for display previews.
    pub content_preview: String,
    /// Free-form metadata (file name, source tags, ...).
    pub metadata: HashMap<String, String>,
}

impl Chunk {
    /// Derive the stable chunk id from its source document, index, and offset.
    pub fn derive_id(source_document_id: &str, chunk_index: usize, start_char: usize) -> String {
        let mut hasher = Sha256::new();
        hasher.update(source_document_id.as_bytes());
        hasher.update(b":");
        hasher.update(chunk_index.to_string().as_bytes());
        hasher.update(b":");
        hasher.update(start_char.to_string().as_bytes());
        hex::encode(hasher.finalize())
    }
}

/// `(chunk_id, embedding, payload)` tuple stored by the vector index.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VectorRecord {
    /// Identifier of the chunk this vector represents.
    pub chunk_id: String,
    /// Fixed-length embedding. Length must equal the collection dimension.
    pub embedding: Vec<f32>,
    /// The chunk and its metadata, stored alongside the vector.
    pub payload: Chunk,
}

impl VectorRecord {
    /// Reject zero vectors; the store never re-normalizes but refuses to index
    /// a vector with no direction, since cosine similarity is undefined for it.
    pub fn is_zero_vector(&self) -> bool {
        self.embedding.iter().all(|value| *value == 0.0)
    }
}

/// `(chunk_id, score, payload)` returned by a similarity search, sorted by
/// descending score with ties broken by ascending `chunk_id`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchResult {
    /// Identifier of the matched chunk.
    pub chunk_id: String,
    /// Cosine similarity mapped into `[0, 1]`.
    pub score: f32,
    /// The chunk and its metadata.
    pub payload: Chunk,
}

/// Priority of a queued vector store mutation; lower value dequeues first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[repr(u8)]
pub enum Priority {
    /// Dequeued before `Normal` and `Low` items.
    High = 1,
    /// Default priority.
    Normal = 2,
    /// Dequeued only after all `High` and `Normal` items.
    Low = 3,
}

/// Work enqueued for asynchronous application against the vector index.
#[derive(Debug, Clone)]
pub enum OperationPayload {
    /// Insert or update the given records.
    InsertBatch(Vec<VectorRecord>),
    /// Delete the chunks with the given ids.
    DeleteBatch(Vec<String>),
}

/// Severity of a [`PerformanceAlert`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertSeverity {
    /// Informational; no action required.
    Low,
    /// Worth watching.
    Medium,
    /// Should be investigated soon.
    High,
    /// Requires immediate attention (e.g. backend failover).
    Critical,
}

/// A recorded performance or health event, surfaced via `/health` and `/metrics`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PerformanceAlert {
    /// Short machine-readable kind, e.g. `"backend_failover"`, `"memory_pressure"`.
    pub kind: String,
    /// Severity of the event.
    pub severity: AlertSeverity,
    /// Human-readable description.
    pub message: String,
    /// When the alert was recorded.
    pub timestamp: TimestampMs,
    /// Freeform metric snapshot captured at alert time.
    pub metrics: HashMap<String, f64>,
}

/// Progress record for a single in-flight document ingestion.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadProgress {
    /// Identifier of the document being ingested.
    pub document_id: String,
    /// Current pipeline status.
    pub status: DocumentStatus,
    /// Completion percentage, `0..=100`.
    pub progress: u8,
    /// Human-readable description of the current step.
    pub current_step: String,
    /// Best-effort estimate of remaining processing time.
    pub estimated_time_remaining_ms: Option<u64>,
    /// Proximate failure cause, if `status == Failed`.
    pub error_message: Option<String>,
    /// Freeform metadata surfaced to clients (file name, chunk count, ...).
    pub metadata: HashMap<String, String>,
    /// When this record was created.
    pub created_at: TimestampMs,
    /// When this record was last updated.
    pub updated_at: TimestampMs,
}

impl UploadProgress {
    /// Progress checkpoints mirroring the pipeline's state machine boundaries.
    pub const PROGRESS_UPLOAD: u8 = 10;
    /// Validation boundary.
    pub const PROGRESS_VALIDATED: u8 = 20;
    /// Parsing boundary.
    pub const PROGRESS_PARSED: u8 = 40;
    /// Chunking boundary.
    pub const PROGRESS_CHUNKED: u8 = 60;
    /// Embedding boundary.
    pub const PROGRESS_EMBEDDED: u8 = 80;
    /// Storing boundary.
    pub const PROGRESS_STORED: u8 = 95;
    /// Terminal boundary.
    pub const PROGRESS_COMPLETE: u8 = 100;
}

/// Lifecycle state of a [`StreamConnection`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamStatus {
    /// Actively streaming tokens to the client.
    Active,
    /// Shutting down (cancelled or finished, draining).
    Closing,
    /// Fully closed; eligible for removal from the connection map.
    Closed,
}

/// A tracked Server-Sent-Events streaming session owned by the service surface.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamConnection {
    /// Unique identifier assigned at stream open.
    pub connection_id: String,
    /// When the stream was opened.
    pub created_at: TimestampMs,
    /// When the stream last produced an event.
    pub last_activity_at: TimestampMs,
    /// Current status.
    pub status: StreamStatus,
    /// Remote socket address, if known.
    pub remote_addr: Option<String>,
    /// Client-supplied user agent, if any.
    pub user_agent: Option<String>,
    /// The query text this stream is answering.
    pub query: String,
}
