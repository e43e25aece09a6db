//! Application wiring: composes every core component into one [`AppState`],
//! and [`App`] coordinates startup and shutdown (`spec.md` §4.6, §5).
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::task::JoinHandle;

use crate::config::Config;
use crate::embedding::Embedder;
use crate::generation::Generator;
use crate::metrics::ServiceMetrics;
use crate::processing::DocumentPipeline;
use crate::rag::RAGPipeline;
use crate::vector_store::{CleanupLevel, MemoryMonitor, OperationQueue, VectorBackend, VectorStore};

use super::connections::ConnectionRegistry;
use super::rate_limit::RateLimiter;

/// Everything an HTTP handler needs, cloned cheaply via `Arc` fields.
#[derive(Clone)]
pub struct AppState {
    /// Immutable runtime configuration.
    pub config: Arc<Config>,
    /// Document ingestion pipeline.
    pub documents: Arc<DocumentPipeline>,
    /// Retrieval-augmented query pipeline.
    pub rag: Arc<RAGPipeline>,
    /// Shared vector store, for storage stats and health reporting.
    pub vector_store: Arc<VectorStore>,
    /// Tracked SSE streaming sessions.
    pub connections: Arc<ConnectionRegistry>,
    /// Per-remote limiter applied to `/query` and `/query/stream`.
    pub query_limiter: Arc<RateLimiter>,
    /// Per-remote limiter applied to `/documents/upload`.
    pub upload_limiter: Arc<RateLimiter>,
    /// Request/response counters surfaced via `/metrics`.
    pub metrics: Arc<ServiceMetrics>,
    /// Embedder readiness, surfaced via `/health`.
    pub embedder: Arc<dyn Embedder>,
    /// Generator readiness, surfaced via `/health`.
    pub generator: Arc<dyn Generator>,
    /// Process start time, for `/health` uptime reporting.
    pub started_at: Instant,
}

/// Owns the composed [`AppState`] plus the background workers spawned at
/// startup, and drives the startup/shutdown sequence from `spec.md` §4.6.
pub struct App {
    /// Shared application state, cloned into every request handler.
    pub state: AppState,
    workers: Vec<JoinHandle<()>>,
    queue: Arc<OperationQueue>,
}

impl App {
    /// Run the startup sequence: readiness checks, collection creation, then
    /// spawn the queue worker, memory monitor, connection reaper, and GC tick.
    pub async fn bootstrap(
        config: Arc<Config>,
        embedder: Arc<dyn Embedder>,
        generator: Arc<dyn Generator>,
        primary_backend: Arc<dyn VectorBackend>,
    ) -> Result<Self, crate::error::AppError> {
        if !embedder.health().await {
            tracing::warn!("embedder failed initial readiness check; continuing with degraded health");
        }
        if !generator.health().await {
            tracing::warn!("generator failed initial readiness check; continuing with degraded health");
        }

        let memory_monitor = Arc::new(MemoryMonitor::new(config.memory_threshold_mb, config.memory_critical_threshold_mb));
        let queue_backend = primary_backend.clone();
        let vector_store = Arc::new(VectorStore::new(
            config.collection_name.clone(),
            config.embedding_dim,
            config.batch_size,
            config.backend_failure_threshold,
            primary_backend,
            memory_monitor.clone(),
        ));
        vector_store.create_collection().await?;

        let queue = Arc::new(OperationQueue::new(config.operation_queue_capacity));
        let documents = Arc::new(DocumentPipeline::new(config.clone(), embedder.clone(), vector_store.clone()));
        let rag = Arc::new(RAGPipeline::new(embedder.clone(), vector_store.clone(), generator.clone()));
        let connections = Arc::new(ConnectionRegistry::new());
        let query_limiter = Arc::new(RateLimiter::new(config.rate_limit_per_minute));
        let upload_limiter = Arc::new(RateLimiter::new(config.upload_rate_limit_per_minute));
        let metrics = Arc::new(ServiceMetrics::new());

        let state = AppState {
            config: config.clone(),
            documents,
            rag,
            vector_store: vector_store.clone(),
            connections: connections.clone(),
            query_limiter,
            upload_limiter,
            metrics,
            embedder,
            generator,
            started_at: Instant::now(),
        };

        let mut workers = Vec::new();
        workers.push(queue.spawn_worker(queue_backend));
        workers.push(memory_monitor.spawn(
            Duration::from_secs(5),
            {
                let metrics = state.metrics.clone();
                move |alert| metrics.record_alert(alert)
            },
            {
                let metrics = state.metrics.clone();
                let vector_store = vector_store.clone();
                move |level| {
                    let keep = match level {
                        CleanupLevel::Light => 32,
                        CleanupLevel::Aggressive => 0,
                        CleanupLevel::None => return,
                    };
                    tracing::warn!(level = level_label(level), keep, "memory pressure cleanup: truncating history buffers");
                    metrics.truncate_alert_history(keep);
                    let vector_store = vector_store.clone();
                    tokio::spawn(async move { vector_store.truncate_alert_history(keep).await });
                }
            },
        ));
        workers.push(connections.clone().spawn_reaper(
            Duration::from_secs(config.stream_connection_timeout_minutes * 60),
            Duration::from_secs(30),
        ));
        workers.push(spawn_gc_tick(vector_store.clone(), Duration::from_secs(config.gc_interval_seconds)));

        tracing::info!("zerorag service started");
        Ok(Self { state, workers, queue })
    }

    /// Stop accepting new work and drain the operation queue for a bounded
    /// time before the process exits (`spec.md` §4.6 "Coordinate shutdown").
    pub async fn shutdown(self, drain_timeout: Duration) {
        tracing::info!("zerorag service shutting down");
        let deadline = Instant::now() + drain_timeout;
        while !self.queue.is_empty() && Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        if !self.queue.is_empty() {
            tracing::warn!(pending = self.queue.len(), "operation queue did not drain before shutdown deadline");
        }
        for worker in self.workers {
            worker.abort();
        }
    }
}

fn level_label(level: CleanupLevel) -> &'static str {
    match level {
        CleanupLevel::None => "none",
        CleanupLevel::Light => "light",
        CleanupLevel::Aggressive => "aggressive",
    }
}

fn spawn_gc_tick(vector_store: Arc<VectorStore>, interval: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            match vector_store.health().await.backend_up {
                true => tracing::debug!("gc tick: backend healthy"),
                false => tracing::debug!("gc tick: serving from fallback backend"),
            }
        }
    })
}
