//! Test helpers for sagas.
//!
//! [`ScriptedStep`] is a step whose failures are scripted up front, and
//! [`Journal`] records every attempt in order so tests can assert on
//! execution and compensation ordering.
//!
//! ```ignore
//! let journal = Journal::new();
//! let saga = Saga::<()>::builder("demo")
//!     .step(ScriptedStep::new("one", &journal).compensated())
//!     .step(ScriptedStep::new("two", &journal).fail_always(StepError::terminal("boom")))
//!     .build()?;
//! saga.run((), &CancellationToken::new()).await;
//! assert_eq!(journal.entries(), vec!["execute:one", "execute:two", "compensate:one"]);
//! ```

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use crate::error::StepError;
use crate::retry::RetryPolicy;
use crate::step::SagaStep;

/// Shared, ordered log of step attempts.
#[derive(Debug, Clone, Default)]
pub struct Journal {
    entries: Arc<Mutex<Vec<String>>>,
}

impl Journal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, entry: impl Into<String>) {
        self.entries.lock().unwrap().push(entry.into());
    }

    pub fn entries(&self) -> Vec<String> {
        self.entries.lock().unwrap().clone()
    }

    /// Number of entries equal to `entry`.
    pub fn count(&self, entry: &str) -> usize {
        self.entries
            .lock()
            .unwrap()
            .iter()
            .filter(|e| e.as_str() == entry)
            .count()
    }

    pub fn clear(&self) {
        self.entries.lock().unwrap().clear();
    }
}

#[derive(Debug, Default)]
struct Script {
    error: Option<StepError>,
    /// `None` fails forever.
    remaining: Option<Mutex<u32>>,
}

impl Script {
    fn always(error: StepError) -> Self {
        Self {
            error: Some(error),
            remaining: None,
        }
    }

    fn times(n: u32, error: StepError) -> Self {
        Self {
            error: Some(error),
            remaining: Some(Mutex::new(n)),
        }
    }

    fn next(&self) -> Result<(), StepError> {
        let Some(error) = &self.error else {
            return Ok(());
        };
        match &self.remaining {
            None => Err(error.clone()),
            Some(remaining) => {
                let mut remaining = remaining.lock().unwrap();
                if *remaining == 0 {
                    return Ok(());
                }
                *remaining -= 1;
                Err(error.clone())
            }
        }
    }
}

/// A step that records `execute:<name>` / `compensate:<name>` on every attempt.
#[derive(Debug)]
pub struct ScriptedStep {
    name: String,
    journal: Journal,
    compensated: bool,
    idempotent: bool,
    policy: Option<RetryPolicy>,
    delay: Option<Duration>,
    compensation_delay: Option<Duration>,
    forward: Script,
    backward: Script,
}

impl ScriptedStep {
    pub fn new(name: impl Into<String>, journal: &Journal) -> Self {
        Self {
            name: name.into(),
            journal: journal.clone(),
            compensated: false,
            idempotent: false,
            policy: None,
            delay: None,
            compensation_delay: None,
            forward: Script::default(),
            backward: Script::default(),
        }
    }

    pub fn compensated(mut self) -> Self {
        self.compensated = true;
        self
    }

    pub fn idempotent(mut self) -> Self {
        self.idempotent = true;
        self
    }

    pub fn retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = Some(policy);
        self
    }

    /// Sleep this long inside every forward attempt.
    pub fn delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn compensation_delay(mut self, delay: Duration) -> Self {
        self.compensation_delay = Some(delay);
        self
    }

    pub fn fail_always(mut self, error: StepError) -> Self {
        self.forward = Script::always(error);
        self
    }

    /// Fail the first `n` forward attempts, then succeed.
    pub fn fail_times(mut self, n: u32, error: StepError) -> Self {
        self.forward = Script::times(n, error);
        self
    }

    pub fn fail_compensation_always(mut self, error: StepError) -> Self {
        self.backward = Script::always(error);
        self
    }

    pub fn fail_compensation_times(mut self, n: u32, error: StepError) -> Self {
        self.backward = Script::times(n, error);
        self
    }
}

#[async_trait]
impl<C> SagaStep<C> for ScriptedStep
where
    C: Send + Sync,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn retry_policy(&self) -> Option<RetryPolicy> {
        self.policy.clone()
    }

    fn is_idempotent(&self) -> bool {
        self.idempotent
    }

    fn has_compensation(&self) -> bool {
        self.compensated
    }

    async fn execute(&self, _ctx: &mut C) -> Result<(), StepError> {
        self.journal.record(format!("execute:{}", self.name));
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.forward.next()
    }

    async fn compensate(&self, _ctx: &C) -> Result<(), StepError> {
        self.journal.record(format!("compensate:{}", self.name));
        if let Some(delay) = self.compensation_delay {
            tokio::time::sleep(delay).await;
        }
        self.backward.next()
    }
}
