//! In-process registry of executions and their latest status.
//!
//! Each entry holds a watch channel so callers can either read the current
//! status or wait for the execution to finish. Running executions are always
//! kept; once more than `retain_finished` executions are terminal, the ones
//! that finished first are evicted.

use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::watch;
use tracing::debug;

use super::error::DispatchError;
use super::models::{ExecutionKind, ExecutionStatus, StartedExecution};
use crate::common::{ExecutionId, RunId};

/// Terminal executions kept for status queries by default
pub const DEFAULT_RETAINED_EXECUTIONS: usize = 1000;

struct RunSlot {
    run_id: RunId,
    status: watch::Sender<ExecutionStatus>,
    /// Completion order, set once the status turns terminal
    finished: Option<u64>,
}

pub struct ExecutionRegistry {
    executions: DashMap<ExecutionId, RunSlot>,
    retain_finished: usize,
    finished_seq: AtomicU64,
}

impl Default for ExecutionRegistry {
    fn default() -> Self {
        Self::with_retention(DEFAULT_RETAINED_EXECUTIONS)
    }
}

impl ExecutionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Keep at most `retain_finished` terminal executions
    pub fn with_retention(retain_finished: usize) -> Self {
        Self {
            executions: DashMap::new(),
            retain_finished,
            finished_seq: AtomicU64::new(0),
        }
    }

    /// Track a new execution with a fresh execution ID and run ID
    pub fn register(&self, kind: ExecutionKind) -> StartedExecution {
        let started = StartedExecution {
            execution_id: ExecutionId::new(),
            run_id: RunId::new(),
        };
        let (status, _) = watch::channel(ExecutionStatus::running(started, kind));
        self.executions.insert(
            started.execution_id,
            RunSlot {
                run_id: started.run_id,
                status,
                finished: None,
            },
        );
        started
    }

    /// Apply `update` to the execution's status and notify waiters
    pub fn update(&self, execution_id: ExecutionId, update: impl FnOnce(&mut ExecutionStatus)) {
        let just_finished = match self.executions.get_mut(&execution_id) {
            Some(mut slot) => {
                slot.status.send_modify(update);
                let terminal = slot.status.borrow().state.is_terminal();
                if terminal && slot.finished.is_none() {
                    slot.finished = Some(self.finished_seq.fetch_add(1, Ordering::Relaxed));
                    true
                } else {
                    false
                }
            }
            None => false,
        };
        // The entry guard must be released before scanning the map
        if just_finished {
            self.evict_finished();
        }
    }

    fn evict_finished(&self) {
        let mut finished: Vec<(u64, ExecutionId)> = self
            .executions
            .iter()
            .filter_map(|entry| entry.finished.map(|seq| (seq, *entry.key())))
            .collect();
        if finished.len() <= self.retain_finished {
            return;
        }
        finished.sort_unstable_by_key(|(seq, _)| *seq);
        let excess = finished.len() - self.retain_finished;
        for (_, execution_id) in finished.into_iter().take(excess) {
            self.executions.remove(&execution_id);
            debug!(execution_id = %execution_id, "evicted finished execution");
        }
    }

    /// Current status. `run_id`, when given, must name the execution's run.
    pub fn status(
        &self,
        execution_id: ExecutionId,
        run_id: Option<RunId>,
    ) -> Result<ExecutionStatus, DispatchError> {
        let slot = self
            .executions
            .get(&execution_id)
            .ok_or(DispatchError::UnknownExecution(execution_id))?;
        match run_id {
            Some(run_id) if run_id != slot.run_id => Err(DispatchError::UnknownRun {
                execution_id,
                run_id,
            }),
            _ => Ok(slot.status.borrow().clone()),
        }
    }

    pub fn subscribe(&self, execution_id: ExecutionId) -> Option<watch::Receiver<ExecutionStatus>> {
        self.executions
            .get(&execution_id)
            .map(|slot| slot.status.subscribe())
    }

    /// Wait until the execution reaches a terminal state
    pub async fn wait_for_completion(&self, execution_id: ExecutionId) -> Option<ExecutionStatus> {
        let mut receiver = self.subscribe(execution_id)?;
        let status = receiver
            .wait_for(|status| status.state.is_terminal())
            .await
            .ok()?
            .clone();
        Some(status)
    }

    pub fn len(&self) -> usize {
        self.executions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.executions.is_empty()
    }
}
