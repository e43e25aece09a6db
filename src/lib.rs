#![deny(missing_docs)]

//! Core library for the ZeroRAG retrieval-augmented generation engine.
//!
//! A ZeroRAG process ingests documents through the [`processing`] pipeline,
//! maintains an index through the [`vector_store`] subsystem, and answers
//! queries through the [`rag`] pipeline. The [`service`] module wires all of
//! it behind an HTTP surface.

/// Environment-driven configuration and validated policy.
pub mod config;
/// Embedding client abstraction and adapters.
pub mod embedding;
/// Crate-wide error taxonomy shared by every component.
pub mod error;
/// Generative model client abstraction and adapters.
pub mod generation;
/// Structured logging and tracing setup.
pub mod logging;
/// Ingestion and RAG instrumentation counters.
pub mod metrics;
/// Shared domain data model (documents, chunks, records, alerts).
pub mod model;
/// Document processing pipeline: validate, parse, chunk, embed, store.
pub mod processing;
/// Retrieval + prompt assembly + generation orchestration.
pub mod rag;
/// HTTP service surface: routing, rate limiting, streaming, lifecycle.
pub mod service;
/// Vector store subsystem: backends, queue, memory monitor.
pub mod vector_store;
