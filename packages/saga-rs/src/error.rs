//! Failure classification for steps, sagas, and batches.
//!
//! Every external call a step makes ends in either success or a [`StepError`].
//! The variant is the classification: it decides whether the retry executor
//! tries again and whether the coordinator compensates.
//!
//! # Taxonomy
//!
//! | Variant | Retried | Meaning |
//! |---|---|---|
//! | [`StepError::Validation`] | no | malformed input, surfaced immediately |
//! | [`StepError::Transient`] | yes | timeout, 5xx, connection failure |
//! | [`StepError::AlreadyExists`] | no | unique key already taken |
//! | [`StepError::Cancelled`] | no | caller cancellation or deadline observed |
//! | [`StepError::Terminal`] | no | any other permanent failure |
//!
//! Once a step has been given up on, the retry executor wraps the last error in
//! a [`StepFailure`] carrying the attempt count. The coordinator turns step
//! failures into a [`SagaError`]: `StepFailed` when compensation completed,
//! `CompensationFailed` when it did not.

use serde::{Deserialize, Serialize};
use thiserror::Error;

// =============================================================================
// Step errors
// =============================================================================

/// Coarse classification of a [`StepError`], stable enough to serialize.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    Validation,
    Transient,
    AlreadyExists,
    Cancelled,
    Terminal,
}

impl FailureKind {
    /// Only transient failures consume retry budget.
    pub fn is_retryable(&self) -> bool {
        matches!(self, FailureKind::Transient)
    }
}

/// Error returned by a single attempt of a step or compensation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StepError {
    /// Malformed topic, missing unique key, malformed request.
    #[error("validation error: {0}")]
    Validation(String),

    /// Timeout, remote 5xx, connection failure.
    #[error("transient remote error: {0}")]
    Transient(String),

    /// A resource with the same unique key already exists.
    ///
    /// Callers may treat this as a no-op success; it is never compensated.
    #[error("already exists: {0}")]
    AlreadyExists(String),

    /// The step observed cancellation or its deadline.
    #[error("cancelled: {0}")]
    Cancelled(String),

    /// Permanent failure with no more specific classification.
    #[error("{0}")]
    Terminal(String),
}

impl StepError {
    pub fn validation(message: impl Into<String>) -> Self {
        StepError::Validation(message.into())
    }

    pub fn transient(message: impl Into<String>) -> Self {
        StepError::Transient(message.into())
    }

    pub fn already_exists(message: impl Into<String>) -> Self {
        StepError::AlreadyExists(message.into())
    }

    pub fn cancelled(message: impl Into<String>) -> Self {
        StepError::Cancelled(message.into())
    }

    pub fn terminal(message: impl Into<String>) -> Self {
        StepError::Terminal(message.into())
    }

    pub fn kind(&self) -> FailureKind {
        match self {
            StepError::Validation(_) => FailureKind::Validation,
            StepError::Transient(_) => FailureKind::Transient,
            StepError::AlreadyExists(_) => FailureKind::AlreadyExists,
            StepError::Cancelled(_) => FailureKind::Cancelled,
            StepError::Terminal(_) => FailureKind::Terminal,
        }
    }

    pub fn is_retryable(&self) -> bool {
        self.kind().is_retryable()
    }

    pub fn is_already_exists(&self) -> bool {
        matches!(self, StepError::AlreadyExists(_))
    }
}

/// A step (or compensation) that was given up on.
///
/// `attempts` counts every invocation made, including the failing one. A
/// non-retryable error on the first try reports `attempts == 1`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("step '{step}' failed after {attempts} attempt(s)")]
pub struct StepFailure {
    pub step: String,
    pub attempts: u32,
    #[source]
    pub error: StepError,
}

impl StepFailure {
    pub fn new(step: impl Into<String>, attempts: u32, error: StepError) -> Self {
        Self {
            step: step.into(),
            attempts,
            error,
        }
    }

    pub fn kind(&self) -> FailureKind {
        self.error.kind()
    }
}

// =============================================================================
// Saga errors
// =============================================================================

/// Terminal failure of a saga.
#[derive(Debug, Clone, Error)]
pub enum SagaError {
    /// A step failed and every previously succeeded step was compensated.
    #[error("saga '{saga}' failed and was compensated")]
    StepFailed {
        saga: String,
        #[source]
        cause: StepFailure,
    },

    /// A step failed and at least one compensation failed too.
    ///
    /// Remote state is inconsistent; this is the only outcome that needs an
    /// operator.
    #[error(
        "saga '{saga}' failed and {} compensation(s) failed; manual intervention required",
        .compensation_failures.len()
    )]
    CompensationFailed {
        saga: String,
        #[source]
        cause: StepFailure,
        compensation_failures: Vec<StepFailure>,
    },
}

impl SagaError {
    /// The forward step failure that started compensation.
    pub fn cause(&self) -> &StepFailure {
        match self {
            SagaError::StepFailed { cause, .. } => cause,
            SagaError::CompensationFailed { cause, .. } => cause,
        }
    }

    pub fn compensation_failures(&self) -> &[StepFailure] {
        match self {
            SagaError::StepFailed { .. } => &[],
            SagaError::CompensationFailed {
                compensation_failures,
                ..
            } => compensation_failures,
        }
    }

    pub fn is_already_exists(&self) -> bool {
        self.cause().error.is_already_exists()
    }

    pub fn requires_intervention(&self) -> bool {
        matches!(self, SagaError::CompensationFailed { .. })
    }
}

/// Rejected saga definitions. Raised when the saga is built, never at run time.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SagaDefinitionError {
    #[error("saga '{saga}' has no steps")]
    Empty { saga: String },

    #[error(
        "step '{step}' in saga '{saga}' is neither idempotent nor compensated and is not the final step"
    )]
    UncompensatedStep { saga: String, step: String },
}

// =============================================================================
// Helpers
// =============================================================================

/// Flatten an error and its `source()` chain into display strings, outermost first.
pub fn error_chain(error: &(dyn std::error::Error + 'static)) -> Vec<String> {
    let mut chain = vec![error.to_string()];
    let mut current = error.source();
    while let Some(source) = current {
        chain.push(source.to_string());
        current = source.source();
    }
    chain
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_transient_is_retryable() {
        assert!(StepError::transient("timeout").is_retryable());
        assert!(!StepError::validation("bad topic").is_retryable());
        assert!(!StepError::already_exists("site1").is_retryable());
        assert!(!StepError::cancelled("deadline").is_retryable());
        assert!(!StepError::terminal("403").is_retryable());
    }

    #[test]
    fn step_failure_display_carries_attempts() {
        let failure = StepFailure::new("create_connection", 5, StepError::transient("503"));
        assert_eq!(
            failure.to_string(),
            "step 'create_connection' failed after 5 attempt(s)"
        );
    }

    #[test]
    fn error_chain_walks_sources() {
        let err = SagaError::StepFailed {
            saga: "provision_site".into(),
            cause: StepFailure::new("create_connection", 5, StepError::transient("503")),
        };
        let chain = error_chain(&err);
        assert_eq!(chain.len(), 3);
        assert!(chain[0].contains("compensated"));
        assert!(chain[1].contains("create_connection"));
        assert_eq!(chain[2], "transient remote error: 503");
    }

    #[test]
    fn compensation_failed_requires_intervention() {
        let err = SagaError::CompensationFailed {
            saga: "provision_site".into(),
            cause: StepFailure::new("update_policy", 1, StepError::terminal("403")),
            compensation_failures: vec![StepFailure::new(
                "create_gateway_thing",
                5,
                StepError::transient("503"),
            )],
        };
        assert!(err.requires_intervention());
        assert_eq!(err.compensation_failures().len(), 1);
        assert!(err.to_string().contains("1 compensation(s) failed"));
    }

    #[test]
    fn already_exists_is_visible_through_saga_error() {
        let err = SagaError::StepFailed {
            saga: "provision_site".into(),
            cause: StepFailure::new(
                "create_gateway_thing",
                1,
                StepError::already_exists("siteName=site1"),
            ),
        };
        assert!(err.is_already_exists());
        assert!(!err.requires_intervention());
    }
}
