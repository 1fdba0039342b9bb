//! Health Check API Handler
//!
//! Liveness endpoint for monitoring.

use axum::{Json, extract::State};
use serde_json::{Value, json};

use crate::api::AppState;

/// GET /health
/// Reports liveness and the configured providers
pub async fn health_check(State(state): State<AppState>) -> Json<Value> {
    let providers: Vec<String> = state
        .orchestrator
        .provider_usage()
        .into_iter()
        .map(|u| u.provider_id)
        .collect();

    Json(json!({
        "status": "ok",
        "providers": providers,
    }))
}
