//! Typed IDs for tracked executions.
//!
//! An execution is one accepted batch request; a run is one attempt at
//! carrying it out. Both are returned to API callers and accepted back by the
//! status endpoint.

pub use super::id::{Id, V4, V7};

/// Marker type for batch executions.
pub struct Execution;

/// Marker type for runs of an execution.
pub struct Run;

pub type ExecutionId = Id<Execution>;
pub type RunId = Id<Run, V4>;
