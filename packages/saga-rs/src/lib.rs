//! # Saga
//!
//! Orchestration primitives for multi-step remote provisioning where every
//! step either succeeds or leaves nothing behind.
//!
//! ## Core Concepts
//!
//! - [`SagaStep`] = one forward action plus an optional compensation
//! - [`RetryPolicy`] = bounded exponential backoff applied to every attempt
//! - [`Saga`] = an ordered, validated list of steps with a LIFO compensation stack
//! - [`FanOut`] = N independent units run concurrently and joined
//!
//! ## Architecture
//!
//! ```text
//! Batch request
//!     │
//!     ▼
//! FanOut.run() ──┬─► unit 1 ─► Saga.run() ─► step 1 ─► step 2 ─► step 3
//!                │                              │         │
//!                │                              │   (fails after retries)
//!                │                              ▼         │
//!                │                      compensate 1 ◄────┘
//!                │
//!                ├─► unit 2 ─► ...
//!                │
//!                └─► unit N ─► ...
//!                       │
//!                       ▼
//!              BatchExecution (per-unit outcomes)
//! ```
//!
//! ## Key Invariants
//!
//! 1. **Strict order** - step `k+1` starts only after step `k` succeeded
//! 2. **Reverse compensation** - succeeded steps are undone newest first
//! 3. **Classified failures** - only [`StepError::Transient`] is retried
//! 4. **Isolation** - a failed or panicking unit never cancels its siblings
//! 5. **Bounded cancellation** - cancellation stops forward progress, never compensation
//!
//! ## Guarantees
//!
//! - **At-least-once steps**: retries may repeat a side effect, so steps are idempotent
//! - **In-process only**: runs live on the tokio runtime and are not persisted
//!
//! ## Example
//!
//! ```ignore
//! use saga::{Saga, SagaStep, StepError, RetryPolicy};
//! use tokio_util::sync::CancellationToken;
//!
//! let saga = Saga::builder("provision_site")
//!     .retry_policy(RetryPolicy::default())
//!     .step(CreateThing { .. })
//!     .step(UpdatePolicy { .. })
//!     .step(CreateConnection { .. })
//!     .build()?;
//!
//! let run = saga.run(ctx, &CancellationToken::new()).await;
//! match run.error {
//!     None => println!("provisioned {:?}", run.context),
//!     Some(err) if err.requires_intervention() => alert(err),
//!     Some(err) => println!("rolled back: {}", err),
//! }
//! ```

pub mod coordinator;
pub mod error;
pub mod fanout;
pub mod retry;
pub mod step;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use coordinator::{
    Saga, SagaBuilder, SagaExecution, SagaRun, SagaState, StepRecord, StepStatus,
    DEFAULT_COMPENSATION_GRACE,
};
pub use error::{error_chain, FailureKind, SagaDefinitionError, SagaError, StepError, StepFailure};
pub use fanout::{
    BatchError, BatchExecution, BatchSummary, FailedUnit, FanOut, UnitFailure, UnitOutcome,
};
pub use retry::{Backoff, RetryPolicy};
pub use step::SagaStep;

// Re-export so callers can pass tokens without naming tokio-util themselves.
pub use tokio_util::sync::CancellationToken;
