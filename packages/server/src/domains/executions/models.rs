use chrono::{DateTime, Utc};
use saga::{error_chain, BatchSummary, FailureKind, SagaExecution, StepFailure, UnitFailure};
use serde::Serialize;

use crate::common::{ExecutionId, RunId};
use crate::domains::devices::DeviceBatch;
use crate::domains::sites::{SiteBatch, SiteFailure};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionKind {
    SiteProvisioning,
    DeviceConfiguration,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionState {
    Running,
    Succeeded,
    Failed,
}

impl ExecutionState {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, ExecutionState::Running)
    }
}

/// Returned by every start call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct StartedExecution {
    #[serde(rename = "executionID")]
    pub execution_id: ExecutionId,
    #[serde(rename = "runID")]
    pub run_id: RunId,
}

/// Outcome of one unit (a site or a device) of a finished batch
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UnitStatus {
    pub label: String,
    pub succeeded: bool,
    /// Classification of the root cause; absent on success and for panics
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure_kind: Option<FailureKind>,
    /// Step-by-step record, for site sagas
    #[serde(skip_serializing_if = "Option::is_none")]
    pub saga: Option<SagaExecution>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub error_chain: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub compensation_failures: Vec<String>,
    pub requires_intervention: bool,
}

impl UnitStatus {
    fn succeeded(label: String, saga: Option<SagaExecution>) -> Self {
        Self {
            label,
            succeeded: true,
            failure_kind: None,
            saga,
            error_chain: Vec::new(),
            compensation_failures: Vec::new(),
            requires_intervention: false,
        }
    }

    fn failed(label: String, error_chain: Vec<String>) -> Self {
        Self {
            label,
            succeeded: false,
            failure_kind: None,
            saga: None,
            error_chain,
            compensation_failures: Vec::new(),
            requires_intervention: false,
        }
    }

    fn from_site_failure(label: String, failure: &SiteFailure) -> Self {
        Self {
            failure_kind: Some(failure.error.cause().kind()),
            saga: Some(failure.execution.clone()),
            compensation_failures: failure
                .error
                .compensation_failures()
                .iter()
                .flat_map(|f| error_chain(f))
                .collect(),
            requires_intervention: failure.requires_intervention(),
            ..Self::failed(label, error_chain(failure))
        }
    }

    fn from_device_failure(label: String, failure: &StepFailure) -> Self {
        Self {
            failure_kind: Some(failure.kind()),
            ..Self::failed(label, error_chain(failure))
        }
    }
}

/// Point-in-time view of an execution
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionStatus {
    #[serde(rename = "executionID")]
    pub execution_id: ExecutionId,
    #[serde(rename = "runID")]
    pub run_id: RunId,
    pub kind: ExecutionKind,
    pub state: ExecutionState,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary: Option<BatchSummary>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub units: Vec<UnitStatus>,
    /// Outermost error first; present once a failed execution is terminal
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub error_chain: Vec<String>,
    pub requires_intervention: bool,
}

impl ExecutionStatus {
    pub fn running(started: StartedExecution, kind: ExecutionKind) -> Self {
        Self {
            execution_id: started.execution_id,
            run_id: started.run_id,
            kind,
            state: ExecutionState::Running,
            started_at: Utc::now(),
            finished_at: None,
            summary: None,
            units: Vec::new(),
            error_chain: Vec::new(),
            requires_intervention: false,
        }
    }

    fn finish(
        &mut self,
        units: Vec<UnitStatus>,
        summary: Option<BatchSummary>,
        error_chain: Vec<String>,
    ) {
        self.state = if error_chain.is_empty() {
            ExecutionState::Succeeded
        } else {
            ExecutionState::Failed
        };
        self.finished_at = Some(Utc::now());
        self.requires_intervention = units.iter().any(|u| u.requires_intervention);
        self.units = units;
        self.summary = summary;
        self.error_chain = error_chain;
    }

    /// Record a finished site batch
    pub fn finish_sites(&mut self, batch: SiteBatch) {
        let summary = batch.summary();
        let units = batch
            .outcomes
            .iter()
            .map(|outcome| match &outcome.result {
                Ok(site) => UnitStatus::succeeded(outcome.label.clone(), Some(site.execution.clone())),
                Err(UnitFailure::Failed(failure)) => {
                    UnitStatus::from_site_failure(outcome.label.clone(), failure)
                }
                Err(panicked) => UnitStatus::failed(outcome.label.clone(), vec![panicked.to_string()]),
            })
            .collect();
        let chain = match batch.into_result() {
            Ok(_) => Vec::new(),
            Err(err) => error_chain(&err),
        };
        self.finish(units, Some(summary), chain);
    }

    /// Record a finished device configuration, or the search that prevented it
    pub fn finish_devices(&mut self, result: Result<DeviceBatch, StepFailure>) {
        let batch = match result {
            Ok(batch) => batch,
            Err(failure) => return self.finish(Vec::new(), None, error_chain(&failure)),
        };
        let summary = batch.summary();
        let units = batch
            .outcomes
            .iter()
            .map(|outcome| match &outcome.result {
                Ok(_) => UnitStatus::succeeded(outcome.label.clone(), None),
                Err(UnitFailure::Failed(failure)) => {
                    UnitStatus::from_device_failure(outcome.label.clone(), failure)
                }
                Err(panicked) => UnitStatus::failed(outcome.label.clone(), vec![panicked.to_string()]),
            })
            .collect();
        let chain = match batch.into_result() {
            Ok(_) => Vec::new(),
            Err(err) => error_chain(&err),
        };
        self.finish(units, Some(summary), chain);
    }
}
