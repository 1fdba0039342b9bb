//! Course API Handlers
//!
//! Read access to courses, their tasks and their export packages.

use axum::{
    Json,
    extract::{Path, State},
    http::header,
    response::IntoResponse,
};
use coursecraft_core::domain::course::Course;
use coursecraft_core::domain::export::ExportFormat;
use coursecraft_core::domain::task::GenerationTask;
use uuid::Uuid;

use crate::api::AppState;
use crate::api::error::{ApiError, ApiResult};

/// GET /api/courses/{id}
/// Full course, including chapters persisted by a run still in progress
pub async fn get_course(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<Course>> {
    tracing::debug!("Getting course: {}", id);

    Ok(Json(state.orchestrator.get_course(id).await?))
}

/// GET /api/courses/{id}/tasks
pub async fn list_course_tasks(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<Vec<GenerationTask>>> {
    tracing::debug!("Listing tasks for course: {}", id);

    // Unknown courses are a 404 rather than an empty list.
    state.orchestrator.get_course(id).await?;

    Ok(Json(state.orchestrator.list_tasks(id).await?))
}

/// GET /api/courses/{id}/export/{format}
pub async fn export_course(
    State(state): State<AppState>,
    Path((id, format)): Path<(Uuid, String)>,
) -> ApiResult<impl IntoResponse> {
    let format: ExportFormat = format.parse().map_err(ApiError::BadRequest)?;

    tracing::info!("Exporting course {} as {}", id, format);

    let package = state.exporter.export(id, format).await?;
    let disposition = format!("attachment; filename=\"{}\"", package.file_name);

    Ok((
        [
            (header::CONTENT_TYPE, package.content_type.to_string()),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        package.bytes,
    ))
}
