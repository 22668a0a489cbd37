//! Saga coordinator: ordered steps, LIFO compensation, execution record.
//!
//! ```text
//! Pending ─► Running ─┬─► Succeeded
//!                     └─► Compensating ─┬─► CompensatedFailure
//!                                       └─► UncompensatedFailure
//! ```
//!
//! Step `k+1` never starts before step `k` succeeded. When a step is given up
//! on, every previously succeeded step that defines a compensation is undone,
//! newest first. The failed step itself is never compensated.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::error::{SagaDefinitionError, SagaError, StepError, StepFailure};
use crate::retry::{self, Backoff, RetryPolicy};
use crate::step::SagaStep;

/// Default time a single compensation may take, independent of cancellation.
pub const DEFAULT_COMPENSATION_GRACE: Duration = Duration::from_secs(60);

// =============================================================================
// Execution record
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SagaState {
    Pending,
    Running,
    Compensating,
    Succeeded,
    CompensatedFailure,
    UncompensatedFailure,
}

impl SagaState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SagaState::Succeeded | SagaState::CompensatedFailure | SagaState::UncompensatedFailure
        )
    }

    fn can_transition_to(&self, next: SagaState) -> bool {
        use SagaState::*;
        matches!(
            (self, next),
            (Pending, Running)
                | (Running, Succeeded)
                | (Running, Compensating)
                | (Compensating, CompensatedFailure)
                | (Compensating, UncompensatedFailure)
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Succeeded,
    Failed,
    Compensated,
    CompensationFailed,
}

/// What happened to one attempted step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepRecord {
    pub name: String,
    pub status: StepStatus,
    pub attempts: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub compensation_attempts: Option<u32>,
}

/// Ordered record of a saga run. Only the coordinator mutates it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SagaExecution {
    pub saga: String,
    pub state: SagaState,
    pub steps: Vec<StepRecord>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl SagaExecution {
    fn new(saga: &str) -> Self {
        Self {
            saga: saga.to_string(),
            state: SagaState::Pending,
            steps: Vec::new(),
            started_at: None,
            finished_at: None,
        }
    }

    fn transition(&mut self, next: SagaState) {
        debug_assert!(
            self.state.can_transition_to(next),
            "illegal saga transition {:?} -> {:?}",
            self.state,
            next
        );
        debug!(saga = %self.saga, from = ?self.state, to = ?next, "saga transition");
        match next {
            SagaState::Running => self.started_at = Some(Utc::now()),
            s if s.is_terminal() => self.finished_at = Some(Utc::now()),
            _ => {}
        }
        self.state = next;
    }

    /// Names of steps whose compensation ran to completion, in the order they ran.
    pub fn compensated_steps(&self) -> Vec<&str> {
        self.steps
            .iter()
            .rev()
            .filter(|s| s.status == StepStatus::Compensated)
            .map(|s| s.name.as_str())
            .collect()
    }
}

/// Result of [`Saga::run`]: the record, the final context, and the error if any.
#[derive(Debug)]
pub struct SagaRun<C> {
    pub execution: SagaExecution,
    pub context: C,
    pub error: Option<SagaError>,
}

impl<C> SagaRun<C> {
    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }

    pub fn into_result(self) -> Result<C, SagaError> {
        match self.error {
            None => Ok(self.context),
            Some(err) => Err(err),
        }
    }
}

// =============================================================================
// Saga definition
// =============================================================================

/// An immutable, validated sequence of steps over context `C`.
///
/// A `Saga` holds no per-run state and can be shared across concurrent runs.
pub struct Saga<C> {
    name: String,
    steps: Vec<Box<dyn SagaStep<C>>>,
    default_policy: RetryPolicy,
    deadline: Option<Duration>,
    compensation_grace: Duration,
}

pub struct SagaBuilder<C> {
    name: String,
    steps: Vec<Box<dyn SagaStep<C>>>,
    default_policy: RetryPolicy,
    deadline: Option<Duration>,
    compensation_grace: Duration,
}

impl<C> SagaBuilder<C>
where
    C: Send + Sync,
{
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            steps: Vec::new(),
            default_policy: RetryPolicy::default(),
            deadline: None,
            compensation_grace: DEFAULT_COMPENSATION_GRACE,
        }
    }

    pub fn step<S>(mut self, step: S) -> Self
    where
        S: SagaStep<C> + 'static,
    {
        self.steps.push(Box::new(step));
        self
    }

    /// Policy for steps that don't define their own.
    pub fn retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.default_policy = policy;
        self
    }

    /// Upper bound on the forward phase of every run.
    pub fn deadline(mut self, deadline: Duration) -> Self {
        self.deadline = Some(deadline);
        self
    }

    pub fn compensation_grace(mut self, grace: Duration) -> Self {
        self.compensation_grace = grace;
        self
    }

    /// Validate and freeze the definition.
    ///
    /// Every step except the last must be idempotent or compensated.
    pub fn build(self) -> Result<Saga<C>, SagaDefinitionError> {
        if self.steps.is_empty() {
            return Err(SagaDefinitionError::Empty { saga: self.name });
        }
        let last = self.steps.len() - 1;
        for step in &self.steps[..last] {
            if !step.is_idempotent() && !step.has_compensation() {
                return Err(SagaDefinitionError::UncompensatedStep {
                    saga: self.name,
                    step: step.name().to_string(),
                });
            }
        }
        Ok(Saga {
            name: self.name,
            steps: self.steps,
            default_policy: self.default_policy,
            deadline: self.deadline,
            compensation_grace: self.compensation_grace,
        })
    }
}

impl<C> Saga<C>
where
    C: Send + Sync,
{
    pub fn builder(name: impl Into<String>) -> SagaBuilder<C> {
        SagaBuilder::new(name)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn step_names(&self) -> Vec<&str> {
        self.steps.iter().map(|s| s.name()).collect()
    }

    /// Execute every step in order, compensating on failure.
    ///
    /// `cancel` (and the configured deadline) bound the forward phase only.
    /// Once compensation starts it runs to completion, each compensation
    /// limited by the grace period instead.
    pub async fn run(&self, mut ctx: C, cancel: &CancellationToken) -> SagaRun<C> {
        let mut execution = SagaExecution::new(&self.name);
        execution.transition(SagaState::Running);
        let deadline = self.deadline.map(|d| Instant::now() + d);

        // Indexes of succeeded steps; popped newest-first during compensation.
        let mut completed: Vec<usize> = Vec::with_capacity(self.steps.len());
        let mut failure = None;

        for (index, step) in self.steps.iter().enumerate() {
            match self
                .run_forward(step.as_ref(), &mut ctx, cancel, deadline)
                .await
            {
                Ok(attempts) => {
                    debug!(saga = %self.name, step = step.name(), attempts, "step succeeded");
                    execution.steps.push(StepRecord {
                        name: step.name().to_string(),
                        status: StepStatus::Succeeded,
                        attempts,
                        compensation_attempts: None,
                    });
                    completed.push(index);
                }
                Err(step_failure) => {
                    warn!(
                        saga = %self.name,
                        step = step.name(),
                        attempts = step_failure.attempts,
                        error = %step_failure.error,
                        "step failed, compensating"
                    );
                    execution.steps.push(StepRecord {
                        name: step.name().to_string(),
                        status: StepStatus::Failed,
                        attempts: step_failure.attempts,
                        compensation_attempts: None,
                    });
                    failure = Some(step_failure);
                    break;
                }
            }
        }

        let Some(cause) = failure else {
            execution.transition(SagaState::Succeeded);
            info!(saga = %self.name, "saga succeeded");
            return SagaRun {
                execution,
                context: ctx,
                error: None,
            };
        };

        execution.transition(SagaState::Compensating);
        let mut compensation_failures = Vec::new();
        while let Some(index) = completed.pop() {
            let step = self.steps[index].as_ref();
            if !step.has_compensation() {
                continue;
            }
            match self.run_compensation(step, &ctx).await {
                Ok(attempts) => {
                    info!(saga = %self.name, step = step.name(), attempts, "step compensated");
                    let record = &mut execution.steps[index];
                    record.status = StepStatus::Compensated;
                    record.compensation_attempts = Some(attempts);
                }
                Err(comp_failure) => {
                    error!(
                        saga = %self.name,
                        step = step.name(),
                        attempts = comp_failure.attempts,
                        error = %comp_failure.error,
                        "compensation failed"
                    );
                    let record = &mut execution.steps[index];
                    record.status = StepStatus::CompensationFailed;
                    record.compensation_attempts = Some(comp_failure.attempts);
                    compensation_failures.push(comp_failure);
                }
            }
        }

        let error = if compensation_failures.is_empty() {
            execution.transition(SagaState::CompensatedFailure);
            info!(saga = %self.name, cause = %cause.error, "saga failed, compensation complete");
            SagaError::StepFailed {
                saga: self.name.clone(),
                cause,
            }
        } else {
            execution.transition(SagaState::UncompensatedFailure);
            error!(
                saga = %self.name,
                requires_intervention = true,
                cause = %cause.error,
                failed_compensations = compensation_failures.len(),
                "saga left remote state inconsistent"
            );
            SagaError::CompensationFailed {
                saga: self.name.clone(),
                cause,
                compensation_failures,
            }
        };

        SagaRun {
            execution,
            context: ctx,
            error: Some(error),
        }
    }

    async fn run_forward(
        &self,
        step: &dyn SagaStep<C>,
        ctx: &mut C,
        cancel: &CancellationToken,
        deadline: Option<Instant>,
    ) -> Result<u32, StepFailure> {
        let policy = step
            .retry_policy()
            .unwrap_or_else(|| self.default_policy.clone());
        let mut backoff = Backoff::new(&policy);

        loop {
            if cancel.is_cancelled() {
                return Err(StepFailure::new(
                    step.name(),
                    backoff.attempts(),
                    StepError::cancelled("saga cancelled"),
                ));
            }
            let attempt = backoff.start_attempt();

            let result = tokio::select! {
                biased;
                _ = cancel.cancelled() => Err(StepError::cancelled("saga cancelled")),
                _ = sleep_until(deadline) => Err(StepError::cancelled("saga deadline exceeded")),
                result = step.execute(ctx) => result,
            };

            let error = match result {
                Ok(()) => return Ok(attempt),
                Err(error) => error,
            };
            let Some(delay) = backoff.on_failure(&error) else {
                return Err(StepFailure::new(step.name(), attempt, error));
            };

            warn!(
                saga = %self.name,
                step = step.name(),
                attempt,
                ?delay,
                error = %error,
                "step attempt failed, retrying"
            );
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    return Err(StepFailure::new(
                        step.name(),
                        attempt,
                        StepError::cancelled(format!("saga cancelled while retrying: {}", error)),
                    ));
                }
                _ = sleep_until(deadline) => {
                    return Err(StepFailure::new(
                        step.name(),
                        attempt,
                        StepError::cancelled(format!("saga deadline exceeded while retrying: {}", error)),
                    ));
                }
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }

    async fn run_compensation(&self, step: &dyn SagaStep<C>, ctx: &C) -> Result<u32, StepFailure> {
        let policy = step
            .retry_policy()
            .unwrap_or_else(|| self.default_policy.clone());
        let mut last_attempt = 0;

        let compensation = retry::execute(step.name(), &policy, |attempt| {
            last_attempt = attempt;
            async move { step.compensate(ctx).await.map(|()| attempt) }
        });

        match tokio::time::timeout(self.compensation_grace, compensation).await {
            Ok(result) => result,
            Err(_) => Err(StepFailure::new(
                step.name(),
                last_attempt,
                StepError::cancelled(format!(
                    "compensation exceeded grace period of {:?}",
                    self.compensation_grace
                )),
            )),
        }
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
