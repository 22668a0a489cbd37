//! Application setup and server configuration.

use axum::{
    extract::Extension,
    routing::{get, post},
    Router,
};
use tower_http::trace::TraceLayer;

use crate::domains::executions::BatchDispatcher;
use crate::server::routes::{
    execution_status_handler, health_handler, start_device_config_handler,
    start_site_batch_handler,
};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub dispatcher: BatchDispatcher,
}

/// Build the Axum application router
pub fn build_app(dispatcher: BatchDispatcher) -> Router {
    let app_state = AppState { dispatcher };

    Router::new()
        .route("/api/config/start", post(start_device_config_handler))
        .route("/api/sites/create", post(start_site_batch_handler))
        .route("/api/executions/status", get(execution_status_handler))
        // Older clients poll here
        .route("/api/config/status", get(execution_status_handler))
        .route("/health", get(health_handler))
        .layer(Extension(app_state))
        .layer(TraceLayer::new_for_http())
}
