//! Bounded exponential-backoff retry.
//!
//! The wait after failed attempt `n` (1-based) is
//! `initial_interval * backoff_coefficient^(n-1)`, capped at `max_interval`
//! when one is set. Only [`StepError::Transient`] failures are retried;
//! everything else propagates on the attempt that produced it.

use std::future::Future;
use std::time::Duration;

use tracing::{debug, warn};

use crate::error::{StepError, StepFailure};

/// Retry parameters for one step.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    pub initial_interval: Duration,
    pub backoff_coefficient: f64,
    /// Total invocations allowed, including the first. Values below 1 act as 1.
    pub max_attempts: u32,
    pub max_interval: Option<Duration>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            initial_interval: Duration::from_secs(1),
            backoff_coefficient: 2.0,
            max_attempts: 5,
            max_interval: None,
        }
    }
}

impl RetryPolicy {
    pub fn new(initial_interval: Duration, backoff_coefficient: f64, max_attempts: u32) -> Self {
        Self {
            initial_interval,
            backoff_coefficient,
            max_attempts,
            max_interval: None,
        }
    }

    /// A policy that makes exactly one attempt.
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    pub fn with_max_interval(mut self, max_interval: Duration) -> Self {
        self.max_interval = Some(max_interval);
        self
    }

    fn attempt_budget(&self) -> u32 {
        self.max_attempts.max(1)
    }

    /// Delay to wait after failed attempt `attempt` before trying again.
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(i32::MAX as u32) as i32;
        let secs = self.initial_interval.as_secs_f64() * self.backoff_coefficient.powi(exponent);
        let delay = Duration::try_from_secs_f64(secs).unwrap_or(Duration::MAX);
        match self.max_interval {
            Some(cap) => delay.min(cap),
            None => delay,
        }
    }
}

/// Attempt bookkeeping for callers that drive their own loop.
///
/// [`execute`] is built on this; the saga coordinator uses it directly because
/// forward steps borrow the saga context mutably on every attempt.
#[derive(Debug)]
pub struct Backoff<'a> {
    policy: &'a RetryPolicy,
    attempts: u32,
}

impl<'a> Backoff<'a> {
    pub fn new(policy: &'a RetryPolicy) -> Self {
        Self {
            policy,
            attempts: 0,
        }
    }

    /// Mark the start of an attempt and return its 1-based number.
    pub fn start_attempt(&mut self) -> u32 {
        self.attempts += 1;
        self.attempts
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Decide what to do after the current attempt failed.
    ///
    /// Returns the delay before the next attempt, or `None` when the error
    /// must propagate (non-retryable, or budget exhausted).
    pub fn on_failure(&self, error: &StepError) -> Option<Duration> {
        if !error.is_retryable() || self.attempts >= self.policy.attempt_budget() {
            return None;
        }
        Some(self.policy.delay_after(self.attempts))
    }
}

/// Run `op` under `policy`, sleeping between transient failures.
///
/// `op` receives the 1-based attempt number. On give-up the last error is
/// returned inside a [`StepFailure`] named `step`.
pub async fn execute<T, F, Fut>(
    step: &str,
    policy: &RetryPolicy,
    mut op: F,
) -> Result<T, StepFailure>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, StepError>>,
{
    let mut backoff = Backoff::new(policy);
    loop {
        let attempt = backoff.start_attempt();
        match op(attempt).await {
            Ok(value) => {
                if attempt > 1 {
                    debug!(step, attempt, "step succeeded after retry");
                }
                return Ok(value);
            }
            Err(error) => match backoff.on_failure(&error) {
                Some(delay) => {
                    warn!(step, attempt, ?delay, error = %error, "step attempt failed, retrying");
                    tokio::time::sleep(delay).await;
                }
                None => return Err(StepFailure::new(step, attempt, error)),
            },
        }
    }
}
