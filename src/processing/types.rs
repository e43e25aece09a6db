//! Core data types and error definitions for the document processing pipeline.
use thiserror::Error;

use crate::model::{ContentType, DocumentStatus, TimestampMs};

/// Errors produced while turning normalized text into chunks.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ChunkingError {
    /// Ingestion configured an impossible chunk budget.
    #[error("chunk size must be greater than zero")]
    InvalidChunkSize,
    /// `chunk_overlap` was not strictly less than `chunk_size`.
    #[error("chunk overlap {overlap} must be less than chunk size {chunk_size}")]
    InvalidOverlap {
        /// Configured overlap.
        overlap: usize,
        /// Configured chunk size.
        chunk_size: usize,
    },
    /// The document produced more chunks than `max_chunks_per_document` allows.
    #[error("chunk count {actual} exceeds limit {limit}")]
    TooManyChunks {
        /// Number of chunks the algorithm produced.
        actual: usize,
        /// Configured upper bound.
        limit: usize,
    },
}

/// Errors produced while validating an upload before processing begins.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ValidationError {
    /// File exceeds `max_file_size`.
    #[error("file size {size} exceeds maximum {limit}")]
    FileTooLarge {
        /// Size of the rejected upload, in bytes.
        size: u64,
        /// Configured maximum.
        limit: u64,
    },
    /// File extension is not in `supported_formats`.
    #[error("unsupported file format: {0}")]
    UnsupportedFormat(String),
    /// File name looked suspicious (double extension, executable suffix).
    #[error("suspicious file name: {0}")]
    SuspiciousName(String),
    /// Advertised content type did not match the detected type.
    #[error("content type mismatch: advertised {advertised}, detected {detected}")]
    ContentTypeMismatch {
        /// Content type provided by the caller.
        advertised: String,
        /// Content type detected from the bytes.
        detected: String,
    },
}

/// Result of validating an upload request before ingestion starts
/// (`spec.md` §4.3 "validate").
#[derive(Debug, Clone)]
pub struct ValidationResult {
    /// Whether the upload passed every check.
    pub is_valid: bool,
    /// Accumulated validation failures; empty iff `is_valid`.
    pub errors: Vec<String>,
    /// Non-fatal observations surfaced to the caller.
    pub warnings: Vec<String>,
    /// Best-effort processing time estimate, in milliseconds.
    pub estimated_processing_time_ms: u64,
    /// Parser features available for this format (e.g. table flattening).
    pub supported_features: Vec<String>,
}

/// Request to validate a prospective upload without ingesting it.
#[derive(Debug, Clone)]
pub struct ValidateRequest {
    /// Original file name, including extension.
    pub file_name: String,
    /// Size of the file in bytes.
    pub file_size: u64,
    /// Caller-advertised MIME or extension-derived content type.
    pub content_type: String,
}

/// Paging parameters for [`crate::processing::DocumentPipeline::list`].
#[derive(Debug, Clone, Copy, Default)]
pub struct Paging {
    /// Maximum number of records to return.
    pub limit: usize,
    /// Number of records to skip before collecting `limit`.
    pub offset: usize,
}

/// Filter applied to [`crate::processing::DocumentPipeline::list`].
#[derive(Debug, Clone, Default)]
pub struct ListFilter {
    /// Restrict to documents in this status, if set.
    pub status: Option<DocumentStatus>,
}

/// Per-format parsing output prior to chunking.
#[derive(Debug, Clone)]
pub struct ParsedDocument {
    /// Normalized text ready for chunking.
    pub text: String,
    /// Coarse content classification detected during parsing.
    pub content_type: ContentType,
    /// Whether the source appeared to contain tables.
    pub has_tables: bool,
    /// Whether the source appeared to reference images.
    pub has_images: bool,
    /// Whether the source appeared to contain hyperlinks.
    pub has_links: bool,
}

/// Outcome of a completed (or failed) ingestion, returned internally by the
/// pipeline's processing task.
#[derive(Debug, Clone)]
pub struct IngestOutcome {
    /// Document identifier.
    pub document_id: String,
    /// Final status: `Completed`, `Failed`, or `Cancelled`.
    pub status: DocumentStatus,
    /// Number of chunks produced, if processing reached chunking.
    pub chunk_count: usize,
    /// Proximate failure cause, if `status == Failed`.
    pub error_message: Option<String>,
    /// Wall-clock processing duration.
    pub processing_time_ms: u64,
    /// Completion timestamp.
    pub completed_at: TimestampMs,
}
