//! In-memory fallback backend: a linear-scan cosine-similarity store guarded
//! by a reader-writer lock (`spec.md` §4.2 "Fallback", §5 "Shared-resource
//! policy"). Used transparently when the primary backend degrades, and
//! directly in tests.
use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;

use crate::model::{Chunk, SearchResult, VectorRecord};
use crate::vector_store::backend::{BackendError, BackendStats, SearchFilter, UpsertOutcome, VectorBackend};

struct Entry {
    embedding: Vec<f32>,
    payload: Chunk,
}

/// Linear-scan, RwLock-guarded vector store requiring no external service.
pub struct MemoryBackend {
    dim: RwLock<Option<usize>>,
    records: RwLock<HashMap<String, Entry>>,
}

impl MemoryBackend {
    /// Construct an empty in-memory backend.
    pub fn new() -> Self {
        Self {
            dim: RwLock::new(None),
            records: RwLock::new(HashMap::new()),
        }
    }
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a = a.iter().map(|v| v * v).sum::<f32>().sqrt();
    let norm_b = b.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    let cos = dot / (norm_a * norm_b);
    // Map [-1, 1] into [0, 1] per spec.md §9's open-question resolution.
    (cos + 1.0) / 2.0
}

fn matches_filter(payload: &Chunk, filter: &SearchFilter) -> bool {
    if let Some(source) = &filter.source_document_id
        && &payload.source_document_id != source
    {
        return false;
    }
    for (key, value) in &filter.metadata_equals {
        match payload.metadata.get(key) {
            Some(actual) if actual == value => {}
            _ => return false,
        }
    }
    true
}

#[async_trait]
impl VectorBackend for MemoryBackend {
    async fn open(&self) -> Result<(), BackendError> {
        Ok(())
    }

    async fn ensure_collection(&self, _name: &str, dim: usize) -> Result<(), BackendError> {
        let mut guard = self.dim.write().expect("memory backend dim lock poisoned");
        match *guard {
            Some(existing) if existing != dim => {
                return Err(BackendError::DimensionMismatch {
                    expected: existing,
                    actual: dim,
                });
            }
            _ => {
                *guard = Some(dim);
            }
        }
        Ok(())
    }

    async fn upsert(&self, records: &[VectorRecord]) -> Result<Vec<UpsertOutcome>, BackendError> {
        let dim = *self.dim.read().expect("memory backend dim lock poisoned");
        let mut outcomes = Vec::with_capacity(records.len());
        let mut guard = self
            .records
            .write()
            .expect("memory backend records lock poisoned");

        for record in records {
            if record.is_zero_vector() {
                outcomes.push(UpsertOutcome::Failure {
                    chunk_id: record.chunk_id.clone(),
                    reason: "zero vector rejected".to_string(),
                });
                continue;
            }
            if let Some(expected) = dim
                && record.embedding.len() != expected
            {
                outcomes.push(UpsertOutcome::Failure {
                    chunk_id: record.chunk_id.clone(),
                    reason: format!(
                        "dimension mismatch: expected {expected}, got {}",
                        record.embedding.len()
                    ),
                });
                continue;
            }

            guard.insert(
                record.chunk_id.clone(),
                Entry {
                    embedding: record.embedding.clone(),
                    payload: record.payload.clone(),
                },
            );
            outcomes.push(UpsertOutcome::Success {
                chunk_id: record.chunk_id.clone(),
            });
        }

        Ok(outcomes)
    }

    async fn delete(&self, ids: &[String]) -> Result<(), BackendError> {
        let mut guard = self
            .records
            .write()
            .expect("memory backend records lock poisoned");
        for id in ids {
            guard.remove(id);
        }
        Ok(())
    }

    async fn search(
        &self,
        vector: &[f32],
        top_k: usize,
        filter: Option<&SearchFilter>,
    ) -> Result<Vec<SearchResult>, BackendError> {
        let guard = self
            .records
            .read()
            .expect("memory backend records lock poisoned");

        let mut scored: Vec<SearchResult> = guard
            .values()
            .filter(|entry| filter.is_none_or(|f| matches_filter(&entry.payload, f)))
            .map(|entry| SearchResult {
                chunk_id: entry.payload.id.clone(),
                score: cosine_similarity(vector, &entry.embedding),
                payload: entry.payload.clone(),
            })
            .collect();

        scored.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.chunk_id.cmp(&b.chunk_id))
        });
        scored.truncate(top_k);
        Ok(scored)
    }

    async fn stats(&self) -> Result<BackendStats, BackendError> {
        let guard = self
            .records
            .read()
            .expect("memory backend records lock poisoned");
        let vector_count = guard.len();
        let storage_bytes = guard
            .values()
            .map(|entry| (entry.embedding.len() * std::mem::size_of::<f32>()) as u64)
            .sum();
        Ok(BackendStats {
            vector_count,
            storage_bytes,
        })
    }

    async fn close(&self) -> Result<(), BackendError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Chunk, now_ms};
    use std::collections::HashMap;

    fn sample_record(id: &str, vector: Vec<f32>) -> VectorRecord {
        VectorRecord {
            chunk_id: id.to_string(),
            embedding: vector,
            payload: Chunk {
                id: id.to_string(),
                source_document_id: "doc-1".to_string(),
                chunk_index: 0,
                text: "hello".to_string(),
                start_char: 0,
                end_char: 5,
                byte_size: 5,
                word_count: 1,
                sentence_count: 1,
                created_at: now_ms(),
                content_preview: "hello".to_string(),
                metadata: HashMap::new(),
            },
        }
    }

    #[tokio::test]
    async fn upsert_then_search_returns_top_rank_with_high_score() {
        let backend = MemoryBackend::new();
        backend.ensure_collection("c", 3).await.unwrap();
        backend
            .upsert(&[sample_record("a", vec![1.0, 0.0, 0.0])])
            .await
            .unwrap();

        let results = backend
            .search(&[1.0, 0.0, 0.0], 5, None)
            .await
            .unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].chunk_id, "a");
        assert!(results[0].score >= 0.99);
    }

    #[tokio::test]
    async fn rejects_zero_vector() {
        let backend = MemoryBackend::new();
        backend.ensure_collection("c", 3).await.unwrap();
        let outcomes = backend
            .upsert(&[sample_record("a", vec![0.0, 0.0, 0.0])])
            .await
            .unwrap();
        assert!(matches!(outcomes[0], UpsertOutcome::Failure { .. }));
    }

    #[tokio::test]
    async fn delete_is_idempotent() {
        let backend = MemoryBackend::new();
        backend.ensure_collection("c", 3).await.unwrap();
        backend.delete(&["unknown".to_string()]).await.unwrap();
    }

    #[tokio::test]
    async fn dimension_mismatch_on_recreate_is_rejected() {
        let backend = MemoryBackend::new();
        backend.ensure_collection("c", 3).await.unwrap();
        let error = backend.ensure_collection("c", 4).await.unwrap_err();
        assert!(matches!(error, BackendError::DimensionMismatch { .. }));
    }
}
