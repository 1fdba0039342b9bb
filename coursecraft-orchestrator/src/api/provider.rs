//! Provider API Handlers

use axum::{Json, extract::State};
use coursecraft_core::dto::provider::ProviderUsage;

use crate::api::AppState;

/// GET /api/providers/usage
/// Per-provider request, token and health counters
pub async fn provider_usage(State(state): State<AppState>) -> Json<Vec<ProviderUsage>> {
    Json(state.orchestrator.provider_usage())
}
