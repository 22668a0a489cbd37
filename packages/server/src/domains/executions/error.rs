use thiserror::Error;

use crate::common::{ExecutionId, RunId};
use crate::domains::devices::DeviceValidationError;
use crate::domains::sites::SiteValidationError;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DispatchError {
    /// The request was rejected before anything was started
    #[error("invalid request: {0}")]
    Validation(String),

    #[error("unknown execution {0}")]
    UnknownExecution(ExecutionId),

    #[error("execution {execution_id} has no run {run_id}")]
    UnknownRun {
        execution_id: ExecutionId,
        run_id: RunId,
    },
}

impl From<SiteValidationError> for DispatchError {
    fn from(err: SiteValidationError) -> Self {
        DispatchError::Validation(err.to_string())
    }
}

impl From<DeviceValidationError> for DispatchError {
    fn from(err: DeviceValidationError) -> Self {
        DispatchError::Validation(err.to_string())
    }
}
