use axum::{
    extract::{rejection::QueryRejection, Extension, Query},
    Json,
};
use serde::Deserialize;

use super::ApiError;
use crate::common::{ExecutionId, RunId};
use crate::domains::executions::ExecutionStatus;
use crate::server::app::AppState;

#[derive(Debug, Deserialize)]
pub struct StatusQuery {
    #[serde(rename = "executionID")]
    pub execution_id: String,
    #[serde(rename = "runID", default)]
    pub run_id: Option<String>,
}

/// Current status of an execution; `runID` is optional
pub async fn execution_status_handler(
    Extension(state): Extension<AppState>,
    query: Result<Query<StatusQuery>, QueryRejection>,
) -> Result<Json<ExecutionStatus>, ApiError> {
    let Query(query) = query?;

    let execution_id = ExecutionId::parse(&query.execution_id)
        .map_err(|_| ApiError::BadRequest(format!("invalid executionID '{}'", query.execution_id)))?;
    let run_id = match query.run_id.as_deref().filter(|s| !s.is_empty()) {
        Some(raw) => Some(
            RunId::parse(raw).map_err(|_| ApiError::BadRequest(format!("invalid runID '{}'", raw)))?,
        ),
        None => None,
    };

    let status = state.dispatcher.status(execution_id, run_id)?;
    Ok(Json(status))
}
