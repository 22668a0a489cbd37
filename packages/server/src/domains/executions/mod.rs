//! Executions domain - starting batches and reporting their status
//!
//! Every start returns `{executionID, runID}` immediately and runs the batch
//! on the runtime. Status is read back from the in-process registry.

pub mod dispatcher;
pub mod error;
pub mod models;
pub mod registry;

pub use dispatcher::BatchDispatcher;
pub use error::DispatchError;
pub use models::{ExecutionKind, ExecutionState, ExecutionStatus, StartedExecution, UnitStatus};
pub use registry::{ExecutionRegistry, DEFAULT_RETAINED_EXECUTIONS};
