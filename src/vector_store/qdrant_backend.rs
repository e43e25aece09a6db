//! Qdrant-style HTTP backend, grounded on the teacher's `QdrantService` client:
//! PUT `/collections/{name}`, PUT `/collections/{name}/points`, POST
//! `/collections/{name}/points/query`, POST `/collections/{name}/points/delete`.
use reqwest::{Client, Method, StatusCode};
use serde::Deserialize;
use serde_json::{Value, json};

use async_trait::async_trait;

use crate::model::{Chunk, SearchResult, VectorRecord};
use crate::vector_store::backend::{BackendError, BackendStats, SearchFilter, UpsertOutcome, VectorBackend};

/// HTTP client for a Qdrant-compatible vector database.
pub struct QdrantBackend {
    client: Client,
    base_url: String,
    api_key: Option<String>,
    collection: String,
}

impl QdrantBackend {
    /// Construct a backend against the given base URL and collection name.
    pub fn new(base_url: impl Into<String>, collection: impl Into<String>, api_key: Option<String>) -> Self {
        Self {
            client: Client::builder()
                .user_agent("zerorag/vector_store")
                .build()
                .expect("failed to construct reqwest client for vector store"),
            base_url: base_url.into(),
            api_key,
            collection: collection.into(),
        }
    }

    fn request(&self, method: Method, path: &str) -> reqwest::RequestBuilder {
        let url = format!(
            "{}/{}",
            self.base_url.trim_end_matches('/'),
            path.trim_start_matches('/')
        );
        let mut req = self.client.request(method, url);
        if let Some(api_key) = &self.api_key
            && !api_key.is_empty()
        {
            req = req.header("api-key", api_key);
        }
        req
    }

    fn classify_status(status: StatusCode, body: String) -> BackendError {
        if status.is_server_error() || status == StatusCode::REQUEST_TIMEOUT {
            BackendError::Transient(format!("qdrant returned {status}: {body}"))
        } else {
            BackendError::Permanent(format!("qdrant returned {status}: {body}"))
        }
    }
}

#[derive(Deserialize)]
struct QueryResponse {
    result: QueryResult,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum QueryResult {
    Points(Vec<QueryPoint>),
    Object {
        #[serde(default)]
        points: Vec<QueryPoint>,
    },
}

#[derive(Deserialize)]
struct QueryPoint {
    id: Value,
    score: f32,
    #[serde(default)]
    payload: Option<Value>,
}

#[derive(Deserialize)]
struct CollectionInfoResponse {
    result: CollectionInfoResult,
}

#[derive(Deserialize)]
struct CollectionInfoResult {
    #[serde(default)]
    points_count: Option<u64>,
    #[serde(default)]
    config: Option<CollectionConfig>,
}

#[derive(Deserialize)]
struct CollectionConfig {
    params: CollectionParams,
}

#[derive(Deserialize)]
struct CollectionParams {
    vectors: VectorsConfig,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum VectorsConfig {
    Single { size: usize },
    Named(std::collections::HashMap<String, NamedVectorConfig>),
}

#[derive(Deserialize)]
struct NamedVectorConfig {
    size: usize,
}

impl CollectionInfoResult {
    fn vector_size(&self) -> Option<usize> {
        match self.config.as_ref()?.params.vectors {
            VectorsConfig::Single { size } => Some(size),
            VectorsConfig::Named(ref named) => named.values().next().map(|v| v.size),
        }
    }
}

fn stringify_point_id(id: Value) -> String {
    match id {
        Value::String(text) => text,
        Value::Number(number) => number.to_string(),
        other => other.to_string(),
    }
}

fn build_filter(filter: &SearchFilter) -> Option<Value> {
    let mut must = Vec::new();
    if let Some(source) = &filter.source_document_id {
        must.push(json!({
            "key": "source_document_id",
            "match": { "value": source }
        }));
    }
    for (key, value) in &filter.metadata_equals {
        must.push(json!({
            "key": format!("metadata.{key}"),
            "match": { "value": value }
        }));
    }
    if must.is_empty() {
        None
    } else {
        Some(json!({ "must": must }))
    }
}

#[async_trait]
impl VectorBackend for QdrantBackend {
    async fn open(&self) -> Result<(), BackendError> {
        let response = self
            .request(Method::GET, "collections")
            .send()
            .await
            .map_err(|error| BackendError::Transient(error.to_string()))?;
        if response.status().is_success() {
            Ok(())
        } else {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            Err(Self::classify_status(status, body))
        }
    }

    async fn ensure_collection(&self, name: &str, dim: usize) -> Result<(), BackendError> {
        let exists = self
            .request(Method::GET, &format!("collections/{name}"))
            .send()
            .await
            .map_err(|error| BackendError::Transient(error.to_string()))?;

        match exists.status() {
            StatusCode::OK => {
                let body: CollectionInfoResponse = exists
                    .json()
                    .await
                    .map_err(|error| BackendError::Transient(error.to_string()))?;
                match body.result.vector_size() {
                    Some(existing) if existing != dim => Err(BackendError::DimensionMismatch {
                        expected: existing,
                        actual: dim,
                    }),
                    _ => Ok(()),
                }
            }
            StatusCode::NOT_FOUND => {
                let response = self
                    .request(Method::PUT, &format!("collections/{name}"))
                    .json(&json!({ "vectors": { "size": dim, "distance": "Cosine" } }))
                    .send()
                    .await
                    .map_err(|error| BackendError::Transient(error.to_string()))?;
                if response.status().is_success() {
                    Ok(())
                } else {
                    let status = response.status();
                    let body = response.text().await.unwrap_or_default();
                    Err(Self::classify_status(status, body))
                }
            }
            status => {
                let body = exists.text().await.unwrap_or_default();
                Err(Self::classify_status(status, body))
            }
        }
    }

    async fn upsert(&self, records: &[VectorRecord]) -> Result<Vec<UpsertOutcome>, BackendError> {
        if records.is_empty() {
            return Ok(Vec::new());
        }

        let mut valid = Vec::new();
        let mut outcomes = Vec::with_capacity(records.len());
        for record in records {
            if record.is_zero_vector() {
                outcomes.push(UpsertOutcome::Failure {
                    chunk_id: record.chunk_id.clone(),
                    reason: "zero vector rejected".to_string(),
                });
                continue;
            }
            valid.push(record);
        }

        if valid.is_empty() {
            return Ok(outcomes);
        }

        let points: Vec<Value> = valid
            .iter()
            .map(|record| {
                json!({
                    "id": record.chunk_id,
                    "vector": record.embedding,
                    "payload": serde_json::to_value(&record.payload).unwrap_or(Value::Null),
                })
            })
            .collect();

        let response = self
            .request(Method::PUT, &format!("collections/{}/points", self.collection))
            .query(&[("wait", true)])
            .json(&json!({ "points": points }))
            .send()
            .await
            .map_err(|error| BackendError::Transient(error.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Self::classify_status(status, body));
        }

        outcomes.extend(valid.iter().map(|record| UpsertOutcome::Success {
            chunk_id: record.chunk_id.clone(),
        }));
        Ok(outcomes)
    }

    async fn delete(&self, ids: &[String]) -> Result<(), BackendError> {
        if ids.is_empty() {
            return Ok(());
        }
        let response = self
            .request(
                Method::POST,
                &format!("collections/{}/points/delete", self.collection),
            )
            .query(&[("wait", true)])
            .json(&json!({ "points": ids }))
            .send()
            .await
            .map_err(|error| BackendError::Transient(error.to_string()))?;

        if response.status().is_success() {
            Ok(())
        } else {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            Err(Self::classify_status(status, body))
        }
    }

    async fn search(
        &self,
        vector: &[f32],
        top_k: usize,
        filter: Option<&SearchFilter>,
    ) -> Result<Vec<SearchResult>, BackendError> {
        let mut body = json!({
            "query": vector,
            "limit": top_k,
            "with_payload": true,
        });
        if let Some(filter) = filter.and_then(build_filter) {
            body.as_object_mut()
                .expect("query body is an object")
                .insert("filter".to_string(), filter);
        }

        let response = self
            .request(
                Method::POST,
                &format!("collections/{}/points/query", self.collection),
            )
            .json(&body)
            .send()
            .await
            .map_err(|error| BackendError::Transient(error.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Self::classify_status(status, body));
        }

        let parsed: QueryResponse = response
            .json()
            .await
            .map_err(|error| BackendError::Transient(error.to_string()))?;
        let points = match parsed.result {
            QueryResult::Points(points) => points,
            QueryResult::Object { points } => points,
        };

        let mut results = Vec::with_capacity(points.len());
        for point in points {
            let payload: Chunk = match point.payload {
                Some(value) => serde_json::from_value(value).map_err(|error| {
                    BackendError::Permanent(format!("malformed payload: {error}"))
                })?,
                None => {
                    return Err(BackendError::Permanent(
                        "search result missing payload".to_string(),
                    ));
                }
            };
            results.push(SearchResult {
                chunk_id: stringify_point_id(point.id),
                score: (point.score + 1.0) / 2.0,
                payload,
            });
        }

        results.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.chunk_id.cmp(&b.chunk_id))
        });
        Ok(results)
    }

    async fn stats(&self) -> Result<BackendStats, BackendError> {
        let response = self
            .request(Method::GET, &format!("collections/{}", self.collection))
            .send()
            .await
            .map_err(|error| BackendError::Transient(error.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Self::classify_status(status, body));
        }

        let parsed: CollectionInfoResponse = response
            .json()
            .await
            .map_err(|error| BackendError::Transient(error.to_string()))?;

        Ok(BackendStats {
            vector_count: parsed.result.points_count.unwrap_or(0) as usize,
            storage_bytes: 0,
        })
    }

    async fn close(&self) -> Result<(), BackendError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::now_ms;
    use httpmock::{Method::{GET, PUT}, MockServer};
    use std::collections::HashMap;

    #[tokio::test]
    async fn ensure_collection_rejects_dimension_mismatch() {
        let server = MockServer::start_async().await;
        let backend = QdrantBackend::new(server.base_url(), "docs", None);

        server
            .mock_async(|when, then| {
                when.method(GET).path("/collections/docs");
                then.status(200).json_body(json!({
                    "result": { "config": { "params": { "vectors": { "size": 384, "distance": "Cosine" } } } },
                    "status": "ok",
                }));
            })
            .await;

        let error = backend.ensure_collection("docs", 768).await.unwrap_err();
        assert!(matches!(error, BackendError::DimensionMismatch { expected: 384, actual: 768 }));
    }

    #[tokio::test]
    async fn ensure_collection_accepts_matching_dimension() {
        let server = MockServer::start_async().await;
        let backend = QdrantBackend::new(server.base_url(), "docs", None);

        server
            .mock_async(|when, then| {
                when.method(GET).path("/collections/docs");
                then.status(200).json_body(json!({
                    "result": { "config": { "params": { "vectors": { "size": 384, "distance": "Cosine" } } } },
                    "status": "ok",
                }));
            })
            .await;

        backend.ensure_collection("docs", 384).await.expect("matching dimension is accepted");
    }

    #[tokio::test]
    async fn upsert_sends_points_and_reports_success() {
        let server = MockServer::start_async().await;
        let backend = QdrantBackend::new(server.base_url(), "docs", None);

        let mock = server
            .mock_async(|when, then| {
                when.method(PUT).path("/collections/docs/points");
                then.status(200).json_body(json!({ "result": {}, "status": "ok" }));
            })
            .await;

        let record = VectorRecord {
            chunk_id: "a".to_string(),
            embedding: vec![1.0, 0.0],
            payload: Chunk {
                id: "a".to_string(),
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
        };

        let outcomes = backend.upsert(&[record]).await.expect("upsert ok");
        mock.assert();
        assert!(matches!(outcomes[0], UpsertOutcome::Success { .. }));
    }
}
