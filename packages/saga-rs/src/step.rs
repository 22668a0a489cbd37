use async_trait::async_trait;

use crate::error::StepError;
use crate::retry::RetryPolicy;

/// One forward action of a saga plus its optional compensation.
///
/// `C` is the saga's context. Forward actions record what they created in it
/// (for example a resource ID) so later steps and compensations can read it.
/// A context belongs to exactly one saga run; nothing is shared across runs.
///
/// Both `execute` and `compensate` may be invoked more than once for the same
/// logical step (retries, at-least-once delivery) and must be idempotent.
#[async_trait]
pub trait SagaStep<C>: Send + Sync
where
    C: Send + Sync,
{
    /// Stable name used in logs, execution records, and errors.
    fn name(&self) -> &str;

    /// Retry policy for this step. `None` uses the saga's default.
    fn retry_policy(&self) -> Option<RetryPolicy> {
        None
    }

    /// Whether repeating this step's side effect is harmless.
    ///
    /// A non-final step must either be idempotent or define a compensation.
    fn is_idempotent(&self) -> bool {
        false
    }

    /// Whether [`SagaStep::compensate`] undoes this step.
    fn has_compensation(&self) -> bool {
        false
    }

    async fn execute(&self, ctx: &mut C) -> Result<(), StepError>;

    /// Semantically undo a previously succeeded `execute`.
    ///
    /// Runs against whatever state the remote side is in, including state a
    /// previous compensation attempt already cleaned up.
    async fn compensate(&self, _ctx: &C) -> Result<(), StepError> {
        Ok(())
    }
}
