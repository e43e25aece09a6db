//! Maps [`AppError`] to the HTTP status codes and JSON error envelope
//! defined by `spec.md` §6.1/§7.
use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;

use crate::error::AppError;
use crate::model::now_ms;

/// `{error, detail, timestamp, request_id}` envelope returned on failure.
#[derive(Debug, Serialize)]
pub struct ErrorEnvelope {
    /// Stable machine-readable error code.
    pub error: String,
    /// Human-readable detail.
    pub detail: String,
    /// Time the error was produced.
    pub timestamp: u64,
    /// Correlates with server-side logs.
    pub request_id: String,
}

/// Newtype wrapper so handlers can `?`-propagate [`AppError`] and axum will
/// render the matching status code and envelope.
pub struct HttpError(pub AppError);

impl From<AppError> for HttpError {
    fn from(error: AppError) -> Self {
        Self(error)
    }
}

impl IntoResponse for HttpError {
    fn into_response(self) -> Response {
        let request_id = uuid::Uuid::new_v4().to_string();
        let status = match &self.0 {
            AppError::Validation(_) => StatusCode::BAD_REQUEST,
            AppError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Transient(_) => StatusCode::SERVICE_UNAVAILABLE,
            AppError::Permanent(_) => StatusCode::BAD_GATEWAY,
            AppError::Conflict(_) => StatusCode::CONFLICT,
            AppError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            AppError::Cancelled => StatusCode::BAD_REQUEST,
            AppError::Internal { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        };

        if matches!(status, StatusCode::INTERNAL_SERVER_ERROR) {
            tracing::error!(request_id, error = %self.0, "internal error");
        } else {
            tracing::warn!(request_id, code = self.0.code(), error = %self.0, "request failed");
        }

        let envelope = ErrorEnvelope {
            error: self.0.code().to_string(),
            detail: self.0.to_string(),
            timestamp: now_ms(),
            request_id,
        };
        (status, Json(envelope)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validation_maps_to_400() {
        let error = HttpError(AppError::validation("bad input"));
        let response = error.into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn unauthorized_maps_to_401() {
        let error = HttpError(AppError::Unauthorized("missing api key".into()));
        let response = error.into_response();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[test]
    fn rate_limited_maps_to_429() {
        let error = HttpError(AppError::RateLimited { retry_after_secs: 5 });
        let response = error.into_response();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    }

    #[test]
    fn transient_maps_to_503_and_permanent_to_502() {
        assert_eq!(HttpError(AppError::Transient("x".into())).into_response().status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(HttpError(AppError::Permanent("x".into())).into_response().status(), StatusCode::BAD_GATEWAY);
    }
}
