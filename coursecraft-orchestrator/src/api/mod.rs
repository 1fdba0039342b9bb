//! API Module
//!
//! HTTP API layer for the orchestrator.
//! Each submodule handles endpoints for a specific domain.

pub mod course;
pub mod error;
pub mod generation;
pub mod health;
pub mod provider;

use axum::{
    Router,
    routing::{get, post},
};
use std::sync::Arc;
use tower_http::trace::TraceLayer;

use crate::service::{CourseOrchestrator, ExportAssembler};

/// Shared handler state
#[derive(Clone)]
pub struct AppState {
    pub orchestrator: CourseOrchestrator,
    pub exporter: Arc<ExportAssembler>,
}

/// Create the main API router with all endpoints
pub fn create_router(state: AppState) -> Router {
    Router::new()
        // Health check
        .route("/health", get(health::health_check))
        // Generation endpoints
        .route("/api/courses/generate", post(generation::start_generation))
        .route("/api/tasks/{id}", get(generation::get_task))
        .route("/api/tasks/{id}/cancel", post(generation::cancel_task))
        .route(
            "/api/courses/{id}/chapters/{chapter_id}/regenerate",
            post(generation::regenerate_chapter),
        )
        // Course endpoints
        .route("/api/courses/{id}", get(course::get_course))
        .route("/api/courses/{id}/tasks", get(course::list_course_tasks))
        .route("/api/courses/{id}/export/{format}", get(course::export_course))
        // Provider endpoints
        .route("/api/providers/usage", get(provider::provider_usage))
        // Add state and middleware
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}
