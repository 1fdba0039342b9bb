//! API Error Handling
//!
//! Unified error types and conversion for API responses.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};

use crate::service::export::ExportError;
use crate::service::orchestrator::GenerationError;

/// API error type
#[derive(Debug)]
pub enum ApiError {
    NotFound(String),
    BadRequest(String),
    Conflict(String),
    Unprocessable(String),
    InternalError(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::Conflict(msg) => (StatusCode::CONFLICT, msg),
            ApiError::Unprocessable(msg) => (StatusCode::UNPROCESSABLE_ENTITY, msg),
            ApiError::InternalError(msg) => {
                tracing::error!("Internal error: {}", msg);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal server error".to_string(),
                )
            }
        };

        (status, Json(serde_json::json!({ "error": message }))).into_response()
    }
}

impl From<GenerationError> for ApiError {
    fn from(err: GenerationError) -> Self {
        let message = err.to_string();
        match err {
            GenerationError::InvalidRequest(_) => ApiError::BadRequest(message),
            GenerationError::CourseNotFound(_)
            | GenerationError::ChapterNotFound { .. }
            | GenerationError::TaskNotFound(_) => ApiError::NotFound(message),
            GenerationError::ChapterBusy(_)
            | GenerationError::TaskAlreadyTerminal(_)
            | GenerationError::CourseNotRegenerable { .. } => ApiError::Conflict(message),
            GenerationError::Store(_) | GenerationError::Persistence(_) => {
                ApiError::InternalError(message)
            }
        }
    }
}

impl From<ExportError> for ApiError {
    fn from(err: ExportError) -> Self {
        let message = err.to_string();
        match err {
            ExportError::CourseNotFound(_) => ApiError::NotFound(message),
            ExportError::CourseNotReady { .. } => ApiError::Conflict(message),
            ExportError::UnsupportedFormat(_) => ApiError::Unprocessable(message),
            ExportError::Encoding(_) | ExportError::Persistence(_) => {
                ApiError::InternalError(message)
            }
        }
    }
}

pub type ApiResult<T> = Result<T, ApiError>;
