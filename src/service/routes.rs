//! HTTP handlers implementing `spec.md` §6.1's surface, wired onto [`AppState`].
use std::collections::HashMap;
use std::net::SocketAddr;

use axum::extract::{ConnectInfo, Multipart, Path, Query, Request, State};
use axum::http::{HeaderMap, HeaderValue, StatusCode, header};
use axum::middleware::{self, Next};
use axum::response::Response;
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};

use crate::error::AppError;
use crate::model::{DocumentStatus, UploadProgress, now_ms};
use crate::processing::{ListFilter, Paging, ValidateRequest};
use crate::rag::RAGQuery;

use super::app::AppState;
use super::error_response::HttpError;
use super::rate_limit::RateLimitStatus;

/// Build the HTTP router exposing the full service surface over `state`.
///
/// `GET /` and `GET /health` are always open; every other route requires a
/// matching `Authorization: Bearer <api_key>` when `config.api_key` is set
/// (`spec.md` §4.1 "API key authentication").
pub fn router(state: AppState) -> Router {
    let public = Router::new().route("/", get(service_info)).route("/health", get(health));

    let protected = Router::new()
        .route("/health/services/{name}", get(health_service))
        .route("/metrics", get(metrics))
        .route("/documents/upload", post(upload_document))
        .route("/documents/validate", post(validate_document))
        .route("/documents/upload/{id}/progress", get(upload_progress))
        .route("/documents", get(list_documents))
        .route("/documents/{id}", get(get_document).delete(delete_document))
        .route("/query", post(query))
        .route("/query/stream", get(super::sse::query_stream))
        .route("/advanced/connections", get(list_connections))
        .route("/advanced/connections/{id}", delete(cancel_connection))
        .route("/advanced/cleanup", post(cleanup))
        .route("/advanced/storage/stats", get(storage_stats))
        .layer(middleware::from_fn_with_state(state.clone(), require_api_key));

    public.merge(protected).with_state(state)
}

async fn require_api_key(State(state): State<AppState>, request: Request, next: Next) -> Result<Response, HttpError> {
    let Some(expected) = state.config.api_key.as_deref() else {
        return Ok(next.run(request).await);
    };

    let provided = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "));

    if provided == Some(expected) {
        Ok(next.run(request).await)
    } else {
        Err(AppError::Unauthorized("missing or invalid API key".to_string()).into())
    }
}

fn remote_key(connect_info: Option<&ConnectInfo<SocketAddr>>) -> String {
    connect_info.map(|info| info.0.ip().to_string()).unwrap_or_else(|| "unknown".to_string())
}

fn rate_limit_headers(status: RateLimitStatus) -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert("X-RateLimit-Limit", HeaderValue::from(status.limit));
    headers.insert("X-RateLimit-Remaining", HeaderValue::from(status.remaining));
    headers.insert("X-RateLimit-Reset", HeaderValue::from(status.reset_seconds));
    headers
}

#[derive(Serialize)]
struct ServiceInfo {
    name: &'static str,
    version: &'static str,
    description: &'static str,
}

async fn service_info() -> Json<ServiceInfo> {
    Json(ServiceInfo {
        name: "zerorag",
        version: env!("CARGO_PKG_VERSION"),
        description: "Retrieval-augmented generation serving engine",
    })
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    uptime_seconds: u64,
    version: &'static str,
    services: HashMap<String, ServiceHealth>,
}

#[derive(Serialize, Clone)]
struct ServiceHealth {
    status: &'static str,
    detail: Option<String>,
}

async fn collect_health(state: &AppState) -> HashMap<String, ServiceHealth> {
    let mut services = HashMap::new();

    let vector_health = state.vector_store.health().await;
    services.insert(
        "vector_store".to_string(),
        ServiceHealth {
            status: if vector_health.backend_up { "healthy" } else { "degraded" },
            detail: if vector_health.issues.is_empty() { None } else { Some(vector_health.issues.join("; ")) },
        },
    );

    let embedder_ok = state.embedder.health().await;
    services.insert(
        "embedder".to_string(),
        ServiceHealth { status: if embedder_ok { "healthy" } else { "unhealthy" }, detail: None },
    );

    let generator_ok = state.generator.health().await;
    services.insert(
        "generator".to_string(),
        ServiceHealth { status: if generator_ok { "healthy" } else { "unhealthy" }, detail: None },
    );

    services
}

fn aggregate_status(services: &HashMap<String, ServiceHealth>) -> &'static str {
    if services.values().any(|service| service.status == "unhealthy") {
        "unhealthy"
    } else if services.values().any(|service| service.status == "degraded") {
        "degraded"
    } else {
        "healthy"
    }
}

async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    let services = collect_health(&state).await;
    Json(HealthResponse {
        status: aggregate_status(&services),
        uptime_seconds: state.started_at.elapsed().as_secs(),
        version: env!("CARGO_PKG_VERSION"),
        services,
    })
}

async fn health_service(State(state): State<AppState>, Path(name): Path<String>) -> Result<Json<ServiceHealth>, HttpError> {
    let services = collect_health(&state).await;
    services.get(&name).cloned().map(Json).ok_or_else(|| AppError::NotFound(format!("unknown service: {name}")).into())
}

async fn metrics(State(state): State<AppState>) -> Json<crate::metrics::MetricsSnapshot> {
    Json(state.metrics.snapshot())
}

#[derive(Serialize)]
struct UploadResponse {
    document_id: String,
    filename: String,
    file_size: u64,
    chunks_created: usize,
    processing_time: u64,
    status: String,
    metadata: HashMap<String, String>,
}

async fn upload_document(
    State(state): State<AppState>,
    connect_info: Option<ConnectInfo<SocketAddr>>,
    mut multipart: Multipart,
) -> Result<(HeaderMap, Json<UploadResponse>), HttpError> {
    let limit_status = state.upload_limiter.check(&remote_key(connect_info.as_ref())).await?;

    let mut file_bytes: Option<Vec<u8>> = None;
    let mut file_name = String::new();
    let mut metadata = HashMap::new();

    while let Some(field) = multipart.next_field().await.map_err(|error| AppError::validation(error.to_string()))? {
        match field.name().unwrap_or_default() {
            "file" => {
                file_name = field.file_name().unwrap_or("upload").to_string();
                let bytes = field.bytes().await.map_err(|error| AppError::validation(error.to_string()))?;
                file_bytes = Some(bytes.to_vec());
            }
            "metadata" => {
                let text = field.text().await.map_err(|error| AppError::validation(error.to_string()))?;
                if let Ok(parsed) = serde_json::from_str::<HashMap<String, String>>(&text) {
                    metadata = parsed;
                }
            }
            _ => continue,
        }
    }

    let bytes = file_bytes.ok_or_else(|| AppError::validation("multipart request did not include a `file` field"))?;
    if file_name.is_empty() {
        return Err(AppError::validation("uploaded file had no file name").into());
    }

    let file_size = bytes.len() as u64;
    let start = now_ms();
    let document_id = state.documents.clone().ingest(file_name.clone(), bytes, "application/octet-stream".to_string()).await;
    state.metrics.record_request("documents", true);

    Ok((
        rate_limit_headers(limit_status),
        Json(UploadResponse {
            document_id,
            filename: file_name,
            file_size,
            chunks_created: 0,
            processing_time: now_ms().saturating_sub(start),
            status: "processing".to_string(),
            metadata,
        }),
    ))
}

#[derive(Deserialize)]
struct ValidateDocumentRequest {
    filename: String,
    file_size: u64,
    content_type: String,
}

#[derive(Serialize)]
struct ValidateDocumentResponse {
    is_valid: bool,
    errors: Vec<String>,
    warnings: Vec<String>,
    estimated_processing_time: u64,
    supported_features: Vec<String>,
}

async fn validate_document(
    State(state): State<AppState>,
    Json(request): Json<ValidateDocumentRequest>,
) -> Json<ValidateDocumentResponse> {
    let result = state.documents.validate(&ValidateRequest {
        file_name: request.filename,
        file_size: request.file_size,
        content_type: request.content_type,
    });
    Json(ValidateDocumentResponse {
        is_valid: result.is_valid,
        errors: result.errors,
        warnings: result.warnings,
        estimated_processing_time: result.estimated_processing_time_ms,
        supported_features: result.supported_features,
    })
}

async fn upload_progress(State(state): State<AppState>, Path(id): Path<String>) -> Result<Json<UploadProgress>, HttpError> {
    state.documents.get_progress(&id).await.map(Json).ok_or_else(|| AppError::NotFound(format!("unknown upload: {id}")).into())
}

#[derive(Deserialize)]
struct ListDocumentsQuery {
    #[serde(default)]
    limit: usize,
    #[serde(default)]
    offset: usize,
    status: Option<DocumentStatus>,
}

async fn list_documents(State(state): State<AppState>, Query(query): Query<ListDocumentsQuery>) -> Json<Vec<crate::model::DocumentMetadata>> {
    let documents = state
        .documents
        .list(ListFilter { status: query.status }, Paging { limit: query.limit, offset: query.offset })
        .await;
    Json(documents)
}

async fn get_document(State(state): State<AppState>, Path(id): Path<String>) -> Result<Json<crate::model::DocumentMetadata>, HttpError> {
    state.documents.get(&id).await.map(Json).ok_or_else(|| AppError::NotFound(format!("unknown document: {id}")).into())
}

async fn delete_document(State(state): State<AppState>, Path(id): Path<String>) -> Result<StatusCode, HttpError> {
    state.documents.delete_document(&id).await.map_err(AppError::from)?;
    Ok(StatusCode::NO_CONTENT)
}

async fn query(
    State(state): State<AppState>,
    connect_info: Option<ConnectInfo<SocketAddr>>,
    Json(request): Json<RAGQuery>,
) -> Result<(HeaderMap, Json<crate::rag::RAGResponse>), HttpError> {
    let limit_status = state.query_limiter.check(&remote_key(connect_info.as_ref())).await?;

    let cancel = crate::generation::CancellationToken::new();
    let deadline = std::time::Duration::from_secs(state.config.query_timeout_seconds);
    let response = match tokio::time::timeout(deadline, state.rag.answer(request, cancel.clone())).await {
        Ok(response) => response,
        Err(_) => {
            cancel.cancel();
            Err(AppError::Cancelled)
        }
    };
    state.metrics.record_request("query", response.is_ok());
    Ok((rate_limit_headers(limit_status), Json(response?)))
}

async fn list_connections(State(state): State<AppState>) -> Json<Vec<crate::model::StreamConnection>> {
    Json(state.connections.list().await)
}

async fn cancel_connection(State(state): State<AppState>, Path(id): Path<String>) -> Result<StatusCode, HttpError> {
    if state.connections.cancel(&id).await {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(AppError::NotFound(format!("unknown connection: {id}")).into())
    }
}

#[derive(Deserialize, Default)]
struct CleanupRequest {
    document_ids: Option<Vec<String>>,
    older_than_days: Option<u32>,
    failed_uploads_only: Option<bool>,
    #[serde(default)]
    dry_run: bool,
}

#[derive(Serialize)]
struct CleanupReport {
    candidates: usize,
    deleted: usize,
    dry_run: bool,
}

const MS_PER_DAY: u64 = 24 * 60 * 60 * 1000;

/// Latest `created_at` (ms since epoch) still eligible for cleanup under
/// `older_than_days`, relative to `now`.
fn retention_cutoff(older_than_days: Option<u32>, now: u64) -> Option<u64> {
    older_than_days.map(|days| now.saturating_sub(days as u64 * MS_PER_DAY))
}

async fn cleanup(State(state): State<AppState>, Json(request): Json<CleanupRequest>) -> Result<Json<CleanupReport>, HttpError> {
    let candidates = if let Some(ids) = request.document_ids {
        ids
    } else {
        let status = if request.failed_uploads_only.unwrap_or(false) { Some(DocumentStatus::Failed) } else { None };
        let cutoff = retention_cutoff(request.older_than_days, now_ms());
        state
            .documents
            .list(ListFilter { status }, Paging::default())
            .await
            .into_iter()
            .filter(|metadata| cutoff.is_none_or(|cutoff| metadata.created_at <= cutoff))
            .map(|metadata| metadata.id)
            .collect()
    };

    let mut deleted = 0;
    if !request.dry_run {
        for id in &candidates {
            if state.documents.delete_document(id).await.is_ok() {
                deleted += 1;
            }
        }
    }

    Ok(Json(CleanupReport { candidates: candidates.len(), deleted, dry_run: request.dry_run }))
}

#[derive(Serialize)]
struct StorageStats {
    vector_count: usize,
    backend: &'static str,
}

async fn storage_stats(State(state): State<AppState>) -> Result<Json<StorageStats>, HttpError> {
    let stats = state.vector_store.stats().await.map_err(AppError::from)?;
    Ok(Json(StorageStats { vector_count: stats.vector_count, backend: "active" }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retention_cutoff_is_none_without_older_than_days() {
        assert_eq!(retention_cutoff(None, 10_000), None);
    }

    #[test]
    fn retention_cutoff_subtracts_days_in_milliseconds() {
        let now = 10 * MS_PER_DAY;
        assert_eq!(retention_cutoff(Some(3), now), Some(7 * MS_PER_DAY));
    }

    #[test]
    fn retention_cutoff_saturates_instead_of_underflowing() {
        assert_eq!(retention_cutoff(Some(365), 0), Some(0));
    }
}
