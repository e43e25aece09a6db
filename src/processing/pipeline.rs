//! `DocumentPipeline` orchestration (`spec.md` §4.3): validate, parse,
//! chunk, embed, and store an uploaded document, tracking progress and
//! metadata throughout, with cooperative cancellation on delete.
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::RwLock;

use crate::config::Config;
use crate::embedding::Embedder;
use crate::model::{
    Chunk, ContentType, DocumentMetadata, DocumentStatus, UploadProgress, VectorRecord, now_ms,
};
use crate::vector_store::VectorStore;

use super::chunking::{chunk_text, normalize_whitespace, paragraph_count, sentence_count, word_count};
use super::parsers::parse;
use super::types::{IngestOutcome, ListFilter, Paging, ValidateRequest, ValidationResult};
use super::validate::validate;

const MAX_EMBEDDING_RETRIES: u32 = 3;

struct CancelFlag(AtomicBool);

/// In-process document registry plus the chunking/embedding/storage pipeline
/// that advances a document through its lifecycle.
pub struct DocumentPipeline {
    config: Arc<Config>,
    embedder: Arc<dyn Embedder>,
    vector_store: Arc<VectorStore>,
    documents: RwLock<HashMap<String, DocumentMetadata>>,
    progress: RwLock<HashMap<String, UploadProgress>>,
    chunk_ids: RwLock<HashMap<String, Vec<String>>>,
    cancellations: RwLock<HashMap<String, Arc<CancelFlag>>>,
}

impl DocumentPipeline {
    /// Construct a pipeline over the given embedder and vector store.
    pub fn new(config: Arc<Config>, embedder: Arc<dyn Embedder>, vector_store: Arc<VectorStore>) -> Self {
        Self {
            config,
            embedder,
            vector_store,
            documents: RwLock::new(HashMap::new()),
            progress: RwLock::new(HashMap::new()),
            chunk_ids: RwLock::new(HashMap::new()),
            cancellations: RwLock::new(HashMap::new()),
        }
    }

    /// Validate a prospective upload without ingesting it.
    pub fn validate(&self, request: &ValidateRequest) -> ValidationResult {
        validate(request, &self.config)
    }

    /// Accept an upload and kick off asynchronous processing; returns the
    /// new document's id immediately (`spec.md` §4.3 "ingest(): returns
    /// immediately"). Processing continues in a spawned background task.
    pub async fn ingest(self: Arc<Self>, file_name: String, bytes: Vec<u8>, content_type: String) -> String {
        let document_id = uuid::Uuid::new_v4().to_string();
        let now = now_ms();
        let file_type = file_name
            .rsplit_once('.')
            .map(|(_, ext)| ext.to_ascii_lowercase())
            .unwrap_or_default();

        let metadata = DocumentMetadata {
            id: document_id.clone(),
            file_name: file_name.clone(),
            file_size: bytes.len() as u64,
            file_type,
            encoding: "utf-8".to_string(),
            word_count: 0,
            char_count: 0,
            sentence_count: 0,
            paragraph_count: 0,
            line_count: bytes.iter().filter(|b| **b == b'\n').count() + 1,
            content_hash: String::new(),
            created_at: now,
            last_modified: now,
            processed_at: None,
            processing_time_ms: None,
            status: DocumentStatus::Pending,
            is_valid: false,
            validation_errors: Vec::new(),
            content_type: ContentType::Text,
            has_tables: false,
            has_images: false,
            has_links: false,
            language_detected: None,
            chunk_count: 0,
            error_message: None,
        };

        self.documents.write().await.insert(document_id.clone(), metadata);
        self.set_progress(&document_id, DocumentStatus::Pending, UploadProgress::PROGRESS_UPLOAD, "queued", None)
            .await;
        let cancel = Arc::new(CancelFlag(AtomicBool::new(false)));
        self.cancellations.write().await.insert(document_id.clone(), cancel.clone());

        let spawned_id = document_id.clone();
        tokio::spawn(async move {
            self.run(spawned_id, file_name, bytes, content_type, cancel).await;
        });
        document_id
    }

    async fn run(
        self: Arc<Self>,
        document_id: String,
        file_name: String,
        bytes: Vec<u8>,
        content_type: String,
        cancel: Arc<CancelFlag>,
    ) {
        let start = now_ms();
        let deadline = std::time::Duration::from_secs(self.config.upload_timeout_seconds);
        let outcome = match tokio::time::timeout(deadline, self.process(&document_id, &file_name, &bytes, &content_type, &cancel)).await {
            Ok(outcome) => outcome,
            Err(_) => {
                tracing::warn!(document_id, timeout_secs = self.config.upload_timeout_seconds, "upload processing deadline exceeded");
                failed_outcome(&document_id, "processing deadline exceeded".to_string(), start)
            }
        };
        self.finalize(&document_id, outcome).await;
    }

    async fn process(
        &self,
        document_id: &str,
        file_name: &str,
        bytes: &[u8],
        content_type: &str,
        cancel: &CancelFlag,
    ) -> IngestOutcome {
        let start = now_ms();

        self.set_status(document_id, DocumentStatus::Validating).await;
        self.set_progress(
            document_id,
            DocumentStatus::Validating,
            UploadProgress::PROGRESS_VALIDATED,
            "validating upload",
            None,
        )
        .await;
        let validation = validate(
            &ValidateRequest {
                file_name: file_name.to_string(),
                file_size: bytes.len() as u64,
                content_type: content_type.to_string(),
            },
            &self.config,
        );
        if !validation.is_valid {
            let message = validation.errors.join("; ");
            self.mark_validation_failed(document_id, validation.errors).await;
            return failed_outcome(document_id, message, start);
        }

        self.set_status(document_id, DocumentStatus::Parsing).await;
        self.set_progress(document_id, DocumentStatus::Parsing, UploadProgress::PROGRESS_PARSED, "parsing document", None)
            .await;
        let file_type = file_name.rsplit_once('.').map(|(_, ext)| ext.to_ascii_lowercase()).unwrap_or_default();
        let parsed = parse(&file_type, bytes);
        let normalized = normalize_whitespace(&parsed.text);

        if cancel.0.load(Ordering::SeqCst) {
            return cancelled_outcome(document_id, start);
        }

        self.set_status(document_id, DocumentStatus::Chunking).await;
        self.set_progress(document_id, DocumentStatus::Chunking, UploadProgress::PROGRESS_CHUNKED, "chunking text", None)
            .await;
        let spans = match chunk_text(
            &normalized,
            self.config.chunk_size,
            self.config.chunk_overlap,
            self.config.max_chunks_per_document,
        ) {
            Ok(spans) => spans,
            Err(error) => {
                let message = error.to_string();
                self.mark_failed(document_id, message.clone()).await;
                return failed_outcome(document_id, message, start);
            }
        };

        let chunks: Vec<Chunk> = spans
            .into_iter()
            .enumerate()
            .map(|(index, span)| {
                let id = Chunk::derive_id(document_id, index, span.start_char);
                let preview: String = span.text.chars().take(100).collect();
                Chunk {
                    id,
                    source_document_id: document_id.to_string(),
                    chunk_index: index,
                    start_char: span.start_char,
                    end_char: span.end_char,
                    byte_size: span.text.len(),
                    word_count: word_count(&span.text),
                    sentence_count: sentence_count(&span.text),
                    created_at: now_ms(),
                    content_preview: preview,
                    metadata: HashMap::from([("file_name".to_string(), file_name.to_string())]),
                    text: span.text,
                }
            })
            .collect();

        self.update_document_stats(document_id, &parsed, &normalized, chunks.len()).await;

        if cancel.0.load(Ordering::SeqCst) {
            return cancelled_outcome(document_id, start);
        }

        self.set_status(document_id, DocumentStatus::Embedding).await;
        self.set_progress(
            document_id,
            DocumentStatus::Embedding,
            UploadProgress::PROGRESS_EMBEDDED,
            "generating embeddings",
            None,
        )
        .await;

        let mut embeddings = Vec::with_capacity(chunks.len());
        for batch in chunks.chunks(self.config.batch_size.max(1)) {
            let texts: Vec<String> = batch.iter().map(|chunk| chunk.text.clone()).collect();
            match self.embed_with_retry(&texts).await {
                Ok(vectors) => embeddings.extend(vectors),
                Err(message) => {
                    self.mark_failed(document_id, message.clone()).await;
                    return failed_outcome(document_id, message, start);
                }
            }
            if cancel.0.load(Ordering::SeqCst) {
                return cancelled_outcome(document_id, start);
            }
        }

        let records: Vec<VectorRecord> = chunks
            .into_iter()
            .zip(embeddings.into_iter())
            .map(|(payload, embedding)| VectorRecord { chunk_id: payload.id.clone(), embedding, payload })
            .collect();
        let chunk_ids: Vec<String> = records.iter().map(|record| record.chunk_id.clone()).collect();

        self.set_status(document_id, DocumentStatus::Storing).await;
        self.set_progress(document_id, DocumentStatus::Storing, UploadProgress::PROGRESS_STORED, "storing vectors", None)
            .await;

        match self.vector_store.upsert(records).await {
            Ok(outcomes) => {
                let failures: Vec<String> = outcomes
                    .iter()
                    .filter_map(|outcome| match outcome {
                        crate::vector_store::UpsertOutcome::Failure { chunk_id, reason } => {
                            Some(format!("{chunk_id}: {reason}"))
                        }
                        _ => None,
                    })
                    .collect();
                if !failures.is_empty() {
                    // Roll back whatever did succeed so the index never holds a
                    // partially-stored document.
                    let _ = self.vector_store.delete(chunk_ids.clone()).await;
                    let message = format!("partial storage failure: {}", failures.join(", "));
                    self.mark_failed(document_id, message.clone()).await;
                    return failed_outcome(document_id, message, start);
                }
            }
            Err(error) => {
                let message = error.to_string();
                self.mark_failed(document_id, message.clone()).await;
                return failed_outcome(document_id, message, start);
            }
        }

        self.chunk_ids.write().await.insert(document_id.to_string(), chunk_ids);
        self.set_status(document_id, DocumentStatus::Completed).await;

        IngestOutcome {
            document_id: document_id.to_string(),
            status: DocumentStatus::Completed,
            chunk_count: self.documents.read().await.get(document_id).map(|d| d.chunk_count).unwrap_or(0),
            error_message: None,
            processing_time_ms: now_ms().saturating_sub(start),
            completed_at: now_ms(),
        }
    }

    async fn embed_with_retry(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, String> {
        let mut attempt = 0;
        loop {
            match self.embedder.embed(texts).await {
                Ok(vectors) => {
                    for vector in &vectors {
                        if vector.len() != self.config.embedding_dim {
                            return Err(format!(
                                "embedder produced dimension {}, expected {}",
                                vector.len(),
                                self.config.embedding_dim
                            ));
                        }
                    }
                    return Ok(vectors);
                }
                Err(error) => {
                    attempt += 1;
                    if attempt >= MAX_EMBEDDING_RETRIES {
                        return Err(error.to_string());
                    }
                    tracing::warn!(attempt, error = %error, "retrying embedding batch");
                }
            }
        }
    }

    async fn finalize(&self, document_id: &str, outcome: IngestOutcome) {
        self.cancellations.write().await.remove(document_id);
        let progress = match outcome.status {
            DocumentStatus::Completed => UploadProgress::PROGRESS_COMPLETE,
            _ => self.progress.read().await.get(document_id).map(|p| p.progress).unwrap_or(0),
        };
        self.set_progress(
            document_id,
            outcome.status,
            progress,
            status_label(outcome.status),
            outcome.error_message.clone(),
        )
        .await;

        let mut documents = self.documents.write().await;
        if let Some(metadata) = documents.get_mut(document_id) {
            metadata.status = outcome.status;
            metadata.processed_at = Some(outcome.completed_at);
            metadata.processing_time_ms = Some(outcome.processing_time_ms);
            metadata.last_modified = outcome.completed_at;
            if let Some(message) = &outcome.error_message {
                metadata.error_message = Some(message.clone());
            }
        }
    }

    async fn mark_validation_failed(&self, document_id: &str, errors: Vec<String>) {
        let mut documents = self.documents.write().await;
        if let Some(metadata) = documents.get_mut(document_id) {
            metadata.is_valid = false;
            metadata.validation_errors = errors;
            metadata.status = DocumentStatus::Failed;
            metadata.error_message = Some("validation failed".to_string());
        }
    }

    async fn mark_failed(&self, document_id: &str, message: String) {
        let mut documents = self.documents.write().await;
        if let Some(metadata) = documents.get_mut(document_id) {
            metadata.status = DocumentStatus::Failed;
            metadata.error_message = Some(message);
        }
    }

    async fn update_document_stats(&self, document_id: &str, parsed: &super::types::ParsedDocument, normalized: &str, chunk_count: usize) {
        let mut documents = self.documents.write().await;
        if let Some(metadata) = documents.get_mut(document_id) {
            metadata.is_valid = true;
            metadata.content_type = parsed.content_type;
            metadata.has_tables = parsed.has_tables;
            metadata.has_images = parsed.has_images;
            metadata.has_links = parsed.has_links;
            metadata.char_count = normalized.chars().count();
            metadata.word_count = word_count(normalized);
            metadata.sentence_count = sentence_count(normalized);
            metadata.paragraph_count = paragraph_count(normalized);
            metadata.chunk_count = chunk_count;
            metadata.content_hash = content_hash(normalized);
        }
    }

    async fn set_status(&self, document_id: &str, status: DocumentStatus) {
        let mut documents = self.documents.write().await;
        if let Some(metadata) = documents.get_mut(document_id) {
            metadata.status = status;
            metadata.last_modified = now_ms();
        }
    }

    async fn set_progress(
        &self,
        document_id: &str,
        status: DocumentStatus,
        progress: u8,
        current_step: &str,
        error_message: Option<String>,
    ) {
        let now = now_ms();
        let mut table = self.progress.write().await;
        let entry = table.entry(document_id.to_string()).or_insert_with(|| UploadProgress {
            document_id: document_id.to_string(),
            status,
            progress,
            current_step: current_step.to_string(),
            estimated_time_remaining_ms: None,
            error_message: error_message.clone(),
            metadata: HashMap::new(),
            created_at: now,
            updated_at: now,
        });
        entry.status = status;
        entry.progress = progress;
        entry.current_step = current_step.to_string();
        entry.error_message = error_message;
        entry.updated_at = now;
    }

    /// Current progress record for an in-flight or completed ingestion.
    pub async fn get_progress(&self, document_id: &str) -> Option<UploadProgress> {
        self.progress.read().await.get(document_id).cloned()
    }

    /// Document metadata, if it exists (any status, including `Deleted`).
    pub async fn get(&self, document_id: &str) -> Option<DocumentMetadata> {
        self.documents.read().await.get(document_id).cloned()
    }

    /// List documents matching `filter`, newest first, paginated by `paging`.
    pub async fn list(&self, filter: ListFilter, paging: Paging) -> Vec<DocumentMetadata> {
        let documents = self.documents.read().await;
        let mut matched: Vec<DocumentMetadata> = documents
            .values()
            .filter(|metadata| filter.status.map(|status| status == metadata.status).unwrap_or(true))
            .cloned()
            .collect();
        matched.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        let limit = if paging.limit == 0 { matched.len() } else { paging.limit };
        matched.into_iter().skip(paging.offset).take(limit).collect()
    }

    /// Remove a document's chunks from the index, cooperatively cancel any
    /// in-flight processing, and mark it deleted.
    pub async fn delete_document(&self, document_id: &str) -> Result<(), crate::vector_store::BackendError> {
        if let Some(cancel) = self.cancellations.read().await.get(document_id) {
            cancel.0.store(true, Ordering::SeqCst);
        }

        if let Some(ids) = self.chunk_ids.write().await.remove(document_id) {
            if !ids.is_empty() {
                self.vector_store.delete(ids).await?;
            }
        }

        let mut documents = self.documents.write().await;
        if let Some(metadata) = documents.get_mut(document_id) {
            metadata.status = DocumentStatus::Deleted;
            metadata.last_modified = now_ms();
        }
        Ok(())
    }
}

fn status_label(status: DocumentStatus) -> &'static str {
    match status {
        DocumentStatus::Pending => "queued",
        DocumentStatus::Validating => "validating",
        DocumentStatus::Parsing => "parsing",
        DocumentStatus::Chunking => "chunking",
        DocumentStatus::Embedding => "embedding",
        DocumentStatus::Storing => "storing",
        DocumentStatus::Completed => "completed",
        DocumentStatus::Failed => "failed",
        DocumentStatus::Cancelled => "cancelled",
        DocumentStatus::Deleted => "deleted",
    }
}

fn content_hash(text: &str) -> String {
    use sha2::{Digest, Sha256};
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    hex::encode(hasher.finalize())
}

fn failed_outcome(document_id: &str, message: String, start: u64) -> IngestOutcome {
    IngestOutcome {
        document_id: document_id.to_string(),
        status: DocumentStatus::Failed,
        chunk_count: 0,
        error_message: Some(message),
        processing_time_ms: now_ms().saturating_sub(start),
        completed_at: now_ms(),
    }
}

fn cancelled_outcome(document_id: &str, start: u64) -> IngestOutcome {
    IngestOutcome {
        document_id: document_id.to_string(),
        status: DocumentStatus::Cancelled,
        chunk_count: 0,
        error_message: None,
        processing_time_ms: now_ms().saturating_sub(start),
        completed_at: now_ms(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::HashEmbedder;
    use crate::vector_store::{MemoryBackend, MemoryMonitor, VectorBackend, VectorStore};

    fn test_config() -> Arc<Config> {
        Arc::new(Config {
            embedding_dim: 32,
            chunk_size: 200,
            chunk_overlap: 20,
            max_file_size: 1024 * 1024,
            supported_formats: vec!["txt".to_string(), "md".to_string(), "csv".to_string()],
            max_chunks_per_document: 100,
            top_k_default: 5,
            score_threshold_default: 0.0,
            max_context_length_default: 4000,
            memory_threshold_mb: 1024,
            memory_critical_threshold_mb: 2048,
            gc_interval_seconds: 30,
            batch_size: 8,
            rate_limit_per_minute: 60,
            upload_rate_limit_per_minute: 10,
            cors_origins: vec!["*".to_string()],
            api_key: None,
            stream_connection_timeout_minutes: 5,
            server_port: None,
            backend_failure_threshold: 3,
            query_timeout_seconds: 30,
            upload_timeout_seconds: 120,
            operation_queue_capacity: 1000,
            collection_name: "documents".to_string(),
        })
    }

    async fn test_pipeline() -> Arc<DocumentPipeline> {
        let config = test_config();
        let embedder: Arc<dyn Embedder> = Arc::new(HashEmbedder::new(config.embedding_dim));
        let primary: Arc<dyn VectorBackend> = Arc::new(MemoryBackend::new());
        let monitor = Arc::new(MemoryMonitor::new(config.memory_threshold_mb, config.memory_critical_threshold_mb));
        let store = Arc::new(VectorStore::new(
            config.collection_name.clone(),
            config.embedding_dim,
            config.batch_size,
            config.backend_failure_threshold,
            primary,
            monitor,
        ));
        store.create_collection().await.unwrap();
        Arc::new(DocumentPipeline::new(config, embedder, store))
    }

    async fn wait_for_terminal(pipeline: &DocumentPipeline, document_id: &str) -> DocumentMetadata {
        for _ in 0..200 {
            if let Some(metadata) = pipeline.get(document_id).await
                && matches!(
                    metadata.status,
                    DocumentStatus::Completed | DocumentStatus::Failed | DocumentStatus::Cancelled | DocumentStatus::Deleted
                )
            {
                return metadata;
            }
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        }
        panic!("document {document_id} did not reach a terminal state in time");
    }

    #[tokio::test]
    async fn ingest_completes_and_stores_chunks() {
        let pipeline = test_pipeline().await;
        let text = "Alpha bravo charlie delta echo. ".repeat(50);
        let document_id = pipeline.clone().ingest("notes.txt".to_string(), text.into_bytes(), "text/plain".to_string()).await;

        let metadata = wait_for_terminal(&pipeline, &document_id).await;
        assert_eq!(metadata.status, DocumentStatus::Completed);
        assert!(metadata.chunk_count > 0);

        let progress = pipeline.get_progress(&document_id).await.unwrap();
        assert_eq!(progress.progress, UploadProgress::PROGRESS_COMPLETE);
    }

    #[tokio::test]
    async fn ingest_rejects_unsupported_format_without_storing() {
        let pipeline = test_pipeline().await;
        let document_id = pipeline.clone().ingest("malware.exe".to_string(), b"x".to_vec(), "application/octet-stream".to_string()).await;
        let metadata = wait_for_terminal(&pipeline, &document_id).await;
        assert_eq!(metadata.status, DocumentStatus::Failed);
        assert!(!metadata.validation_errors.is_empty());
    }

    #[tokio::test]
    async fn delete_document_marks_deleted_and_removes_chunks() {
        let pipeline = test_pipeline().await;
        let text = "One sentence here. Another sentence follows.".repeat(20);
        let document_id = pipeline.clone().ingest("doc.txt".to_string(), text.into_bytes(), "text/plain".to_string()).await;
        wait_for_terminal(&pipeline, &document_id).await;
        pipeline.delete_document(&document_id).await.unwrap();
        let metadata = pipeline.get(&document_id).await.unwrap();
        assert_eq!(metadata.status, DocumentStatus::Deleted);
    }

    #[tokio::test]
    async fn list_filters_by_status_and_paginates() {
        let pipeline = test_pipeline().await;
        let mut ids = Vec::new();
        for i in 0..3 {
            let id = pipeline
                .clone()
                .ingest(format!("doc{i}.txt"), format!("content number {i}").into_bytes(), "text/plain".to_string())
                .await;
            ids.push(id);
        }
        for id in &ids {
            wait_for_terminal(&pipeline, id).await;
        }
        let all = pipeline.list(ListFilter::default(), Paging { limit: 2, offset: 0 }).await;
        assert_eq!(all.len(), 2);
        let completed = pipeline
            .list(ListFilter { status: Some(DocumentStatus::Completed) }, Paging::default())
            .await;
        assert_eq!(completed.len(), 3);
    }
}
