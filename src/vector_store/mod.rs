//! Vector store subsystem: owns the index, delegates persistence to a
//! pluggable [`VectorBackend`], and transparently falls back to an in-memory
//! implementation on sustained backend failure (`spec.md` §4.2).
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, AtomicU8, Ordering};
use std::time::Duration;

use tokio::sync::Mutex as AsyncMutex;

/// The storage contract a concrete vector database implements.
pub mod backend;
/// RSS sampling and cleanup-level classification.
pub mod memory_monitor;
/// Linear-scan, dependency-free fallback backend.
pub mod memory_backend;
/// Priority operation queue and its single draining worker.
pub mod queue;
/// HTTP adapter for a Qdrant-compatible vector database.
pub mod qdrant_backend;

pub use backend::{BackendError, BackendStats, SearchFilter, UpsertOutcome, VectorBackend};
pub use memory_backend::MemoryBackend;
pub use memory_monitor::{CleanupLevel, MemoryMonitor};
pub use qdrant_backend::QdrantBackend;
pub use queue::OperationQueue;

use crate::model::{OperationPayload, PerformanceAlert, Priority, SearchResult, VectorRecord, now_ms};

/// Lifecycle state of a collection (`spec.md` §4.2 "State machine").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum CollectionState {
    /// No collection has been created yet.
    Absent = 0,
    /// Primary backend is serving requests.
    Ready = 1,
    /// Primary backend degraded; serving from the in-memory fallback.
    Degraded = 2,
}

impl From<u8> for CollectionState {
    fn from(value: u8) -> Self {
        match value {
            1 => Self::Ready,
            2 => Self::Degraded,
            _ => Self::Absent,
        }
    }
}

/// Aggregated health snapshot (`spec.md` §4.2 "health()").
#[derive(Debug, Clone)]
pub struct HealthReport {
    /// Overall score, 0-100. Capped at 70 while degraded.
    pub score: u8,
    /// Human-readable issues contributing to a reduced score.
    pub issues: Vec<String>,
    /// Whether the primary backend is currently serving requests.
    pub backend_up: bool,
    /// Current process RSS, in megabytes, as last sampled.
    pub memory_mb: u64,
}

/// Owns the index and coordinates the primary/fallback backend pair, the
/// operation queue, and the memory monitor.
pub struct VectorStore {
    collection_name: String,
    dim: usize,
    batch_size: usize,
    failure_threshold: u32,
    primary: Arc<dyn VectorBackend>,
    fallback: Arc<MemoryBackend>,
    active: AsyncMutex<Arc<dyn VectorBackend>>,
    state: AtomicU8,
    consecutive_failures: AtomicU32,
    memory_monitor: Arc<MemoryMonitor>,
    alerts: AsyncMutex<Vec<PerformanceAlert>>,
}

const MAX_RETRIES: u32 = 3;
const ALERT_HISTORY_CAP: usize = 256;

impl VectorStore {
    /// Construct a store with the given primary backend; the in-memory
    /// fallback is always available and owned by the store.
    pub fn new(
        collection_name: impl Into<String>,
        dim: usize,
        batch_size: usize,
        failure_threshold: u32,
        primary: Arc<dyn VectorBackend>,
        memory_monitor: Arc<MemoryMonitor>,
    ) -> Self {
        let fallback = Arc::new(MemoryBackend::new());
        Self {
            collection_name: collection_name.into(),
            dim,
            batch_size: batch_size.max(1),
            failure_threshold: failure_threshold.max(1),
            active: AsyncMutex::new(primary.clone()),
            primary,
            fallback,
            state: AtomicU8::new(CollectionState::Absent as u8),
            consecutive_failures: AtomicU32::new(0),
            memory_monitor,
            alerts: AsyncMutex::new(Vec::new()),
        }
    }

    /// Current lifecycle state.
    pub fn state(&self) -> CollectionState {
        CollectionState::from(self.state.load(Ordering::SeqCst))
    }

    async fn record_alert(&self, alert: PerformanceAlert) {
        let mut alerts = self.alerts.lock().await;
        alerts.push(alert);
        if alerts.len() > ALERT_HISTORY_CAP {
            let overflow = alerts.len() - ALERT_HISTORY_CAP;
            alerts.drain(0..overflow);
        }
    }

    /// Recent performance/health alerts, most recent last.
    pub async fn alerts(&self) -> Vec<PerformanceAlert> {
        self.alerts.lock().await.clone()
    }

    /// Discard alert history down to the `keep` most recent entries, freeing
    /// the non-essential history buffer under memory pressure (`spec.md`
    /// §4.2 "above `memory_threshold_mb` a light cleanup runs... above
    /// critical, non-essential history buffers are truncated").
    pub async fn truncate_alert_history(&self, keep: usize) {
        let mut alerts = self.alerts.lock().await;
        if alerts.len() > keep {
            let overflow = alerts.len() - keep;
            alerts.drain(0..overflow);
        }
    }

    /// Idempotently ensure the collection exists with this store's dimension.
    pub async fn create_collection(&self) -> Result<(), BackendError> {
        let active = self.active.lock().await.clone();
        active.ensure_collection(&self.collection_name, self.dim).await?;
        self.fallback.ensure_collection(&self.collection_name, self.dim).await?;
        self.state.store(CollectionState::Ready as u8, Ordering::SeqCst);
        Ok(())
    }

    async fn with_failover<T, F, Fut>(&self, operation: F) -> Result<T, BackendError>
    where
        F: Fn(Arc<dyn VectorBackend>) -> Fut,
        Fut: std::future::Future<Output = Result<T, BackendError>>,
    {
        let active = self.active.lock().await.clone();
        let mut delay = Duration::from_millis(50);

        for attempt in 0..MAX_RETRIES {
            match operation(active.clone()).await {
                Ok(value) => {
                    self.consecutive_failures.store(0, Ordering::SeqCst);
                    return Ok(value);
                }
                Err(BackendError::Transient(message)) => {
                    tracing::warn!(attempt, error = %message, "transient backend failure, retrying");
                    if attempt + 1 < MAX_RETRIES {
                        tokio::time::sleep(delay).await;
                        delay *= 2;
                        continue;
                    }
                    let failures = self.consecutive_failures.fetch_add(1, Ordering::SeqCst) + 1;
                    if failures >= self.failure_threshold && self.state() != CollectionState::Degraded {
                        self.failover(&message).await;
                    }
                    return Err(BackendError::Transient(message));
                }
                Err(other) => return Err(other),
            }
        }
        unreachable!("loop always returns within MAX_RETRIES iterations")
    }

    async fn failover(&self, reason: &str) {
        tracing::error!(reason, "vector store failing over to in-memory backend");
        let mut active = self.active.lock().await;
        *active = self.fallback.clone();
        drop(active);
        self.state.store(CollectionState::Degraded as u8, Ordering::SeqCst);
        self.record_alert(PerformanceAlert {
            kind: "backend_failover".to_string(),
            severity: crate::model::AlertSeverity::Critical,
            message: format!("switched to in-memory backend: {reason}"),
            timestamp: now_ms(),
            metrics: Default::default(),
        })
        .await;
    }

    /// Explicitly attempt to restore the primary backend after a failover.
    /// The store never fails back on its own (`spec.md` §4.2 "Fallback").
    pub async fn reload(&self) -> Result<(), BackendError> {
        self.primary.open().await?;
        self.primary
            .ensure_collection(&self.collection_name, self.dim)
            .await?;
        let mut active = self.active.lock().await;
        *active = self.primary.clone();
        drop(active);
        self.state.store(CollectionState::Ready as u8, Ordering::SeqCst);
        self.consecutive_failures.store(0, Ordering::SeqCst);
        tracing::info!("vector store reloaded primary backend");
        Ok(())
    }

    /// Validate dimensions and batch-insert records synchronously.
    pub async fn upsert(&self, records: Vec<VectorRecord>) -> Result<Vec<UpsertOutcome>, BackendError> {
        let mut outcomes = Vec::with_capacity(records.len());
        for batch in records.chunks(self.batch_size) {
            let batch = batch.to_vec();
            let batch_outcomes = self
                .with_failover(move |backend| {
                    let batch = batch.clone();
                    async move { backend.upsert(&batch).await }
                })
                .await?;
            outcomes.extend(batch_outcomes);

            let rss_mb = self.memory_monitor.last_rss_mb();
            match self.memory_monitor.cleanup_level() {
                CleanupLevel::Light => {
                    tracing::debug!(rss_mb, "memory threshold exceeded between batches, running light cleanup");
                    self.truncate_alert_history(64).await;
                }
                CleanupLevel::Aggressive => {
                    tracing::warn!(rss_mb, "critical memory threshold exceeded between batches, running aggressive cleanup");
                    self.truncate_alert_history(0).await;
                }
                CleanupLevel::None => {
                    if rss_mb > 0 {
                        tracing::debug!(rss_mb, "checked memory usage between batches");
                    }
                }
            }
        }
        Ok(outcomes)
    }

    /// Enqueue an insert batch for asynchronous application.
    pub fn queue_upsert(&self, queue: &OperationQueue, records: Vec<VectorRecord>, priority: Priority) -> Result<(), BackendError> {
        queue.push(OperationPayload::InsertBatch(records), priority)
    }

    /// Validate and delete the given chunk ids synchronously.
    pub async fn delete(&self, ids: Vec<String>) -> Result<(), BackendError> {
        for batch in ids.chunks(self.batch_size) {
            let batch = batch.to_vec();
            self.with_failover(move |backend| {
                let batch = batch.clone();
                async move { backend.delete(&batch).await }
            })
            .await?;
        }
        Ok(())
    }

    /// Enqueue a delete batch for asynchronous application.
    pub fn queue_delete(&self, queue: &OperationQueue, ids: Vec<String>, priority: Priority) -> Result<(), BackendError> {
        queue.push(OperationPayload::DeleteBatch(ids), priority)
    }

    /// Cosine-similarity search against the currently active backend.
    pub async fn search(
        &self,
        vector: &[f32],
        top_k: usize,
        filter: Option<&SearchFilter>,
    ) -> Result<Vec<SearchResult>, BackendError> {
        let vector = vector.to_vec();
        let filter = filter.cloned();
        self.with_failover(move |backend| {
            let vector = vector.clone();
            let filter = filter.clone();
            async move { backend.search(&vector, top_k, filter.as_ref()).await }
        })
        .await
    }

    /// Run `search` once per input vector.
    pub async fn batch_search(
        &self,
        vectors: &[Vec<f32>],
        top_k: usize,
        filter: Option<&SearchFilter>,
    ) -> Result<Vec<Vec<SearchResult>>, BackendError> {
        let mut results = Vec::with_capacity(vectors.len());
        for vector in vectors {
            results.push(self.search(vector, top_k, filter).await?);
        }
        Ok(results)
    }

    /// Current vector count reported by the active backend.
    pub async fn count(&self) -> Result<usize, BackendError> {
        Ok(self.stats().await?.vector_count)
    }

    /// Storage metrics reported by the active backend.
    pub async fn stats(&self) -> Result<BackendStats, BackendError> {
        let active = self.active.lock().await.clone();
        active.stats().await
    }

    /// Aggregated health snapshot.
    pub async fn health(&self) -> HealthReport {
        let state = self.state();
        let mut issues = Vec::new();
        let backend_up = state != CollectionState::Degraded;
        if !backend_up {
            issues.push("serving from in-memory fallback".to_string());
        }

        let mut score: u8 = match self.stats().await {
            Ok(_) => 100,
            Err(error) => {
                issues.push(error.to_string());
                40
            }
        };
        if !backend_up {
            score = score.min(70);
        }

        HealthReport {
            score,
            issues,
            backend_up,
            memory_mb: self.memory_monitor.last_rss_mb(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Chunk, now_ms};
    use std::collections::HashMap;

    fn sample_record(id: &str) -> VectorRecord {
        VectorRecord {
            chunk_id: id.to_string(),
            embedding: vec![1.0, 0.0],
            payload: Chunk {
                id: id.to_string(),
                source_document_id: "doc".to_string(),
                chunk_index: 0,
                text: "hi".to_string(),
                start_char: 0,
                end_char: 2,
                byte_size: 2,
                word_count: 1,
                sentence_count: 1,
                created_at: now_ms(),
                content_preview: "hi".to_string(),
                metadata: HashMap::new(),
            },
        }
    }

    #[tokio::test]
    async fn create_collection_then_upsert_then_search_ranks_first() {
        let primary: Arc<dyn VectorBackend> = Arc::new(MemoryBackend::new());
        let monitor = Arc::new(MemoryMonitor::new(512, 1024));
        let store = VectorStore::new("docs", 2, 32, 3, primary, monitor);

        store.create_collection().await.unwrap();
        store.upsert(vec![sample_record("a")]).await.unwrap();

        let results = store.search(&[1.0, 0.0], 5, None).await.unwrap();
        assert_eq!(results[0].chunk_id, "a");
        assert!(results[0].score >= 0.99);
        assert_eq!(store.state(), CollectionState::Ready);
    }

    #[tokio::test]
    async fn delete_is_idempotent_on_unknown_id() {
        let primary: Arc<dyn VectorBackend> = Arc::new(MemoryBackend::new());
        let monitor = Arc::new(MemoryMonitor::new(512, 1024));
        let store = VectorStore::new("docs", 2, 32, 3, primary, monitor);
        store.create_collection().await.unwrap();
        store.delete(vec!["missing".to_string()]).await.unwrap();
    }

    #[tokio::test]
    async fn truncate_alert_history_drops_oldest_entries() {
        let primary: Arc<dyn VectorBackend> = Arc::new(MemoryBackend::new());
        let monitor = Arc::new(MemoryMonitor::new(512, 1024));
        let store = VectorStore::new("docs", 2, 32, 3, primary, monitor);

        for index in 0..5 {
            store
                .record_alert(PerformanceAlert {
                    kind: "test".to_string(),
                    severity: crate::model::AlertSeverity::Medium,
                    message: format!("alert {index}"),
                    timestamp: now_ms(),
                    metrics: HashMap::new(),
                })
                .await;
        }
        assert_eq!(store.alerts().await.len(), 5);

        store.truncate_alert_history(2).await;
        let remaining = store.alerts().await;
        assert_eq!(remaining.len(), 2);
        assert_eq!(remaining[0].message, "alert 3");
        assert_eq!(remaining[1].message, "alert 4");

        store.truncate_alert_history(0).await;
        assert!(store.alerts().await.is_empty());
    }
}
