//! Priority operation queue processed by a single background worker
//! (`spec.md` §4.2 "Operation Queue", §5 "Queued mutations are applied in
//! priority-then-FIFO order"). A bounded capacity makes saturation explicit:
//! `queue_*` calls fail fast with [`BackendError::QueueFull`] rather than
//! blocking the caller.
use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::sync::{Arc, Mutex};

use tokio::sync::{Notify, oneshot};
use tokio::task::JoinHandle;

use crate::model::{OperationPayload, Priority, now_ms};
use crate::vector_store::backend::{BackendError, VectorBackend};

/// Outcome delivered to a queued operation's optional callback.
pub type OperationResult = Result<(), BackendError>;

struct QueueEntry {
    payload: OperationPayload,
    priority: Priority,
    seq: u64,
    callback: Option<oneshot::Sender<OperationResult>>,
}

impl PartialEq for QueueEntry {
    fn eq(&self, other: &Self) -> bool {
        self.priority == other.priority && self.seq == other.seq
    }
}
impl Eq for QueueEntry {}

impl PartialOrd for QueueEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for QueueEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        // BinaryHeap is a max-heap; reverse priority (High=1 should pop first)
        // and reverse seq (earlier enqueued should pop first within a priority).
        other
            .priority
            .cmp(&self.priority)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

struct Shared {
    heap: Mutex<BinaryHeap<QueueEntry>>,
    notify: Notify,
    capacity: usize,
    next_seq: AtomicU64,
}

/// Handle used to enqueue work and to spawn the single draining worker.
#[derive(Clone)]
pub struct OperationQueue {
    shared: Arc<Shared>,
}

impl OperationQueue {
    /// Construct a queue bounded to `capacity` pending items.
    pub fn new(capacity: usize) -> Self {
        Self {
            shared: Arc::new(Shared {
                heap: Mutex::new(BinaryHeap::new()),
                notify: Notify::new(),
                capacity,
                next_seq: AtomicU64::new(0),
            }),
        }
    }

    /// Number of items currently waiting to be applied.
    pub fn len(&self) -> usize {
        self.shared.heap.lock().expect("queue lock poisoned").len()
    }

    /// Whether the queue currently holds no pending items.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Enqueue work without waiting for a result.
    pub fn push(&self, payload: OperationPayload, priority: Priority) -> Result<(), BackendError> {
        self.push_with_callback(payload, priority, None)
    }

    /// Enqueue work, returning a receiver that resolves once the worker has
    /// applied (or failed to apply) the mutation.
    pub fn push_with_result(
        &self,
        payload: OperationPayload,
        priority: Priority,
    ) -> Result<oneshot::Receiver<OperationResult>, BackendError> {
        let (tx, rx) = oneshot::channel();
        self.push_with_callback(payload, priority, Some(tx))?;
        Ok(rx)
    }

    fn push_with_callback(
        &self,
        payload: OperationPayload,
        priority: Priority,
        callback: Option<oneshot::Sender<OperationResult>>,
    ) -> Result<(), BackendError> {
        let mut heap = self.shared.heap.lock().expect("queue lock poisoned");
        if heap.len() >= self.shared.capacity {
            return Err(BackendError::QueueFull);
        }
        let seq = self.shared.next_seq.fetch_add(1, AtomicOrdering::SeqCst);
        heap.push(QueueEntry {
            payload,
            priority,
            seq,
            callback,
        });
        drop(heap);
        self.shared.notify.notify_one();
        Ok(())
    }

    /// Spawn the single background worker draining this queue against `backend`.
    pub fn spawn_worker(&self, backend: Arc<dyn VectorBackend>) -> JoinHandle<()> {
        let shared = self.shared.clone();
        tokio::spawn(async move {
            loop {
                let entry = loop {
                    let mut heap = shared.heap.lock().expect("queue lock poisoned");
                    if let Some(entry) = heap.pop() {
                        break entry;
                    }
                    drop(heap);
                    shared.notify.notified().await;
                };

                let result = apply(&*backend, entry.payload).await;
                if let Err(error) = &result {
                    tracing::warn!(error = %error, "queue worker failed to apply operation");
                }
                if let Some(callback) = entry.callback {
                    // Callback failures (receiver dropped) are logged and never propagate.
                    if callback.send(result).is_err() {
                        tracing::debug!("queue callback receiver dropped before delivery");
                    }
                }
            }
        })
    }
}

async fn apply(backend: &dyn VectorBackend, payload: OperationPayload) -> OperationResult {
    match payload {
        OperationPayload::InsertBatch(records) => {
            let outcomes = backend.upsert(&records).await?;
            let failed: Vec<_> = outcomes
                .iter()
                .filter_map(|outcome| match outcome {
                    crate::vector_store::backend::UpsertOutcome::Failure { chunk_id, reason } => {
                        Some(format!("{chunk_id}: {reason}"))
                    }
                    _ => None,
                })
                .collect();
            if failed.is_empty() {
                Ok(())
            } else {
                Err(BackendError::Permanent(format!(
                    "partial upsert failure: {}",
                    failed.join(", ")
                )))
            }
        }
        OperationPayload::DeleteBatch(ids) => backend.delete(&ids).await,
    }
}

/// Timestamp convenience re-exported for queue item construction sites.
pub fn enqueued_at_now() -> crate::model::TimestampMs {
    now_ms()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vector_store::memory_backend::MemoryBackend;
    use std::time::Duration;

    #[tokio::test]
    async fn queue_full_is_reported_without_blocking() {
        let queue = OperationQueue::new(1);
        queue
            .push(OperationPayload::DeleteBatch(vec!["a".into()]), Priority::Normal)
            .expect("first push fits");
        let error = queue
            .push(OperationPayload::DeleteBatch(vec!["b".into()]), Priority::Normal)
            .unwrap_err();
        assert!(matches!(error, BackendError::QueueFull));
    }

    #[tokio::test]
    async fn worker_drains_and_applies_in_priority_order() {
        let queue = OperationQueue::new(10);
        let backend: Arc<dyn VectorBackend> = Arc::new(MemoryBackend::new());
        backend.ensure_collection("c", 2).await.unwrap();
        let _worker = queue.spawn_worker(backend.clone());

        let rx = queue
            .push_with_result(OperationPayload::DeleteBatch(vec!["x".into()]), Priority::High)
            .expect("enqueue succeeds");

        let result = tokio::time::timeout(Duration::from_secs(1), rx)
            .await
            .expect("worker responded in time")
            .expect("callback channel not dropped");
        assert!(result.is_ok());
    }
}
