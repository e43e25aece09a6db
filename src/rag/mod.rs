//! Retrieval-augmented query answering: classification, retrieval, context
//! packing, prompt assembly, generation, and validation (`spec.md` §4.4, §4.5).

mod classify;
mod context;
mod pipeline;
mod prompt;
mod safety;
mod types;

pub use pipeline::{RAGEventStream, RAGPipeline};
pub use types::{
    QueryType, QueryValidationError, RAGQuery, RAGResponse, RAGStreamEvent, ResponseFormat,
    SafetyLevel, Source, ValidationStatus,
};
