//! Generation API Handlers
//!
//! HTTP endpoints for starting, polling and cancelling generation tasks.

use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
};
use coursecraft_core::domain::task::GenerationTask;
use coursecraft_core::dto::generation::{
    GenerationAccepted, RegenerateChapter, RegenerationAccepted, StartGeneration,
};
use uuid::Uuid;

use crate::api::AppState;
use crate::api::error::ApiResult;

/// POST /api/courses/generate
/// Accept a course generation request; the work continues in the background
pub async fn start_generation(
    State(state): State<AppState>,
    Json(req): Json<StartGeneration>,
) -> ApiResult<(StatusCode, Json<GenerationAccepted>)> {
    tracing::info!("Generation requested: '{}' ({})", req.title, req.audience.level);

    let accepted = state.orchestrator.start_generation(req).await?;

    Ok((StatusCode::ACCEPTED, Json(accepted)))
}

/// GET /api/tasks/{id}
pub async fn get_task(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<GenerationTask>> {
    tracing::debug!("Getting task: {}", id);

    Ok(Json(state.orchestrator.get_status(id).await?))
}

/// POST /api/tasks/{id}/cancel
pub async fn cancel_task(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<(StatusCode, Json<GenerationTask>)> {
    tracing::info!("Cancelling task: {}", id);

    let task = state.orchestrator.cancel(id).await?;

    Ok((StatusCode::ACCEPTED, Json(task)))
}

/// POST /api/courses/{id}/chapters/{chapter_id}/regenerate
pub async fn regenerate_chapter(
    State(state): State<AppState>,
    Path((course_id, chapter_id)): Path<(Uuid, Uuid)>,
    Json(req): Json<RegenerateChapter>,
) -> ApiResult<(StatusCode, Json<RegenerationAccepted>)> {
    tracing::info!(
        "Regeneration requested for chapter {} of course {}",
        chapter_id,
        course_id
    );

    let accepted = state
        .orchestrator
        .regenerate_chapter(course_id, chapter_id, Some(req.reason))
        .await?;

    Ok((StatusCode::ACCEPTED, Json(accepted)))
}
