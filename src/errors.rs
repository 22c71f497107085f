//! Error types shared by the ingest and inference HTTP surfaces.

use axum::{
    body::Body,
    http::{Response, StatusCode},
    response::IntoResponse,
    Json,
};
use serde_json::json;

/// Errors surfaced to HTTP callers, mapped to the status codes in spec §6/§7.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("validation error: {0}")]
    Validation(String),

    #[error("event log unavailable: {0}")]
    EventLogUnavailable(String),

    #[error("feature store unavailable: {0}")]
    FeatureStoreUnavailable(String),

    #[error("columnar write failed: {0}")]
    ColumnarWrite(String),

    #[error("model invocation failed: {0}")]
    ModelInvocation(String),

    #[error("not found: {0}")]
    NotFound(String),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response<Body> {
        let (status, detail) = match &self {
            AppError::Validation(msg) => (StatusCode::UNPROCESSABLE_ENTITY, msg.clone()),
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, msg.clone()),
            AppError::EventLogUnavailable(msg)
            | AppError::FeatureStoreUnavailable(msg)
            | AppError::ColumnarWrite(msg)
            | AppError::ModelInvocation(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg.clone()),
        };

        if status.is_server_error() {
            tracing::error!("{self}");
        } else {
            tracing::warn!("{self}");
        }

        (status, Json(json!({ "detail": detail }))).into_response()
    }
}
