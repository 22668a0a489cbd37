use axum::{extract::rejection::JsonRejection, extract::Extension, Json};

use super::ApiError;
use crate::domains::devices::DeviceConfigRequest;
use crate::domains::executions::StartedExecution;
use crate::server::app::AppState;

/// Start configuring every device matching a query
///
/// Body: `{query, attributes}` or `{query, message}`
pub async fn start_device_config_handler(
    Extension(state): Extension<AppState>,
    payload: Result<Json<DeviceConfigRequest>, JsonRejection>,
) -> Result<Json<StartedExecution>, ApiError> {
    let Json(request) = payload?;
    let started = state.dispatcher.start_device_config(request)?;
    Ok(Json(started))
}
