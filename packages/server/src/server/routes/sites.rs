use axum::{extract::rejection::JsonRejection, extract::Extension, Json};

use super::ApiError;
use crate::domains::executions::StartedExecution;
use crate::domains::sites::Site;
use crate::server::app::AppState;

/// Start provisioning a batch of sites
///
/// Body: `[{siteName, host, port, username, password, description}]`
pub async fn start_site_batch_handler(
    Extension(state): Extension<AppState>,
    payload: Result<Json<Vec<Site>>, JsonRejection>,
) -> Result<Json<StartedExecution>, ApiError> {
    let Json(sites) = payload?;
    let started = state.dispatcher.start_site_batch(sites)?;
    Ok(Json(started))
}
