//! Document ingestion pipeline: validation, per-format parsing,
//! character-based chunking, batched embedding, and vector storage.

pub mod chunking;
pub mod parsers;
pub mod pipeline;
pub mod types;
pub mod validate;

pub use chunking::{chunk_text, normalize_whitespace, ChunkSpan};
pub use pipeline::DocumentPipeline;
pub use types::{
    ChunkingError, IngestOutcome, ListFilter, Paging, ParsedDocument, ValidateRequest,
    ValidationError, ValidationResult,
};
