use axum::{extract::Extension, Json};
use serde::Serialize;

use crate::server::app::AppState;

#[derive(Serialize)]
pub struct HealthResponse {
    status: String,
    executions: usize,
}

/// Health check endpoint
///
/// The server holds no connections of its own at rest, so it is healthy
/// whenever it can answer.
pub async fn health_handler(Extension(state): Extension<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        executions: state.dispatcher.registry().len(),
    })
}
