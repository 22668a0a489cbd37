//! Fan-out coordinator: run N independent units concurrently and join on all.
//!
//! Units are spawned on the runtime's worker pool. A unit that fails or
//! panics is recorded and its siblings keep running; the batch succeeds only
//! when every unit succeeded.

use std::any::Any;
use std::fmt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use serde::Serialize;
use thiserror::Error;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, warn};

/// Why one unit of a batch did not succeed.
#[derive(Debug, Clone, Error)]
pub enum UnitFailure<E> {
    #[error("{0}")]
    Failed(E),

    #[error("unit panicked: {0}")]
    Panicked(String),
}

/// Terminal outcome of one unit, tagged with its position and label.
#[derive(Debug, Clone)]
pub struct UnitOutcome<T, E> {
    pub index: usize,
    pub label: String,
    pub result: Result<T, UnitFailure<E>>,
}

impl<T, E> UnitOutcome<T, E> {
    pub fn is_success(&self) -> bool {
        self.result.is_ok()
    }
}

/// A unit that failed, as reported by [`BatchError`].
#[derive(Debug, Clone)]
pub struct FailedUnit<E> {
    pub index: usize,
    pub label: String,
    pub failure: UnitFailure<E>,
}

/// Aggregate failure of a batch: which units failed and why.
#[derive(Debug, Clone, Error)]
#[error("{} of {total} unit(s) failed", .failures.len())]
pub struct BatchError<E>
where
    E: fmt::Debug + fmt::Display,
{
    pub total: usize,
    pub succeeded: usize,
    pub failures: Vec<FailedUnit<E>>,
}

impl<E> BatchError<E>
where
    E: fmt::Debug + fmt::Display,
{
    pub fn failed_labels(&self) -> Vec<&str> {
        self.failures.iter().map(|f| f.label.as_str()).collect()
    }
}

/// Counts for status reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct BatchSummary {
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
}

/// All unit outcomes of one fan-out, ordered by submission index.
#[derive(Debug, Clone)]
pub struct BatchExecution<T, E> {
    pub outcomes: Vec<UnitOutcome<T, E>>,
}

impl<T, E> BatchExecution<T, E> {
    pub fn total(&self) -> usize {
        self.outcomes.len()
    }

    pub fn succeeded(&self) -> usize {
        self.outcomes.iter().filter(|o| o.is_success()).count()
    }

    pub fn is_success(&self) -> bool {
        self.outcomes.iter().all(|o| o.is_success())
    }

    pub fn summary(&self) -> BatchSummary {
        let succeeded = self.succeeded();
        BatchSummary {
            total: self.total(),
            succeeded,
            failed: self.total() - succeeded,
        }
    }

    /// Successful values in submission order, or every failure.
    pub fn into_result(self) -> Result<Vec<T>, BatchError<E>>
    where
        E: fmt::Debug + fmt::Display,
    {
        let total = self.outcomes.len();
        let mut values = Vec::with_capacity(total);
        let mut failures = Vec::new();
        for outcome in self.outcomes {
            match outcome.result {
                Ok(value) => values.push(value),
                Err(failure) => failures.push(FailedUnit {
                    index: outcome.index,
                    label: outcome.label,
                    failure,
                }),
            }
        }
        if failures.is_empty() {
            Ok(values)
        } else {
            Err(BatchError {
                total,
                succeeded: values.len(),
                failures,
            })
        }
    }
}

/// Concurrent dispatcher for independent units.
#[derive(Debug, Clone, Default)]
pub struct FanOut {
    max_concurrency: Option<usize>,
}

impl FanOut {
    /// No bound on concurrently running units.
    pub fn new() -> Self {
        Self::default()
    }

    /// At most `limit` units run at once. A limit of zero is treated as one.
    pub fn with_max_concurrency(limit: usize) -> Self {
        Self {
            max_concurrency: Some(limit.max(1)),
        }
    }

    pub fn max_concurrency(&self) -> Option<usize> {
        self.max_concurrency
    }

    /// Run `unit` for every `(label, input)` pair and wait for all of them.
    ///
    /// No unit's failure or panic cancels another. Outcomes come back in
    /// submission order regardless of completion order.
    pub async fn run<I, U, F, Fut, T, E>(&self, inputs: I, unit: F) -> BatchExecution<T, E>
    where
        I: IntoIterator<Item = (String, U)>,
        F: Fn(U) -> Fut,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
        T: Send + 'static,
        E: Send + 'static,
    {
        let semaphore = self.max_concurrency.map(|n| Arc::new(Semaphore::new(n)));
        let mut set = JoinSet::new();
        let mut labels = Vec::new();

        for (index, (label, input)) in inputs.into_iter().enumerate() {
            let future = unit(input);
            let semaphore = semaphore.clone();
            labels.push(label);
            set.spawn(async move {
                // Never closed, so acquisition only fails if the runtime is shutting down.
                let _permit = match semaphore {
                    Some(semaphore) => semaphore.acquire_owned().await.ok(),
                    None => None,
                };
                let result = AssertUnwindSafe(future).catch_unwind().await;
                (index, result)
            });
        }

        let total = labels.len();
        debug!(units = total, max_concurrency = ?self.max_concurrency, "fan-out dispatched");

        let mut slots: Vec<Option<Result<T, UnitFailure<E>>>> = (0..total).map(|_| None).collect();
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok((index, Ok(result))) => {
                    slots[index] = Some(result.map_err(UnitFailure::Failed));
                }
                Ok((index, Err(payload))) => {
                    let message = panic_message(payload.as_ref());
                    warn!(unit = %labels[index], panic = %message, "fan-out unit panicked");
                    slots[index] = Some(Err(UnitFailure::Panicked(message)));
                }
                Err(join_error) => {
                    // The slot stays empty and is reported below.
                    warn!(error = %join_error, "fan-out task did not complete");
                }
            }
        }

        let outcomes = labels
            .into_iter()
            .zip(slots)
            .enumerate()
            .map(|(index, (label, slot))| UnitOutcome {
                index,
                label,
                result: slot
                    .unwrap_or_else(|| Err(UnitFailure::Panicked("task aborted".to_string()))),
            })
            .collect::<Vec<_>>();

        let execution = BatchExecution { outcomes };
        debug!(
            units = total,
            succeeded = execution.succeeded(),
            "fan-out joined"
        );
        execution
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
