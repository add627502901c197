//! Worker lifecycle: deactivation, bulk shutdown and final teardown.
//!
//! Deactivation runs under the state lock and never waits for the worker
//! to exit. Every worker handle stays in a [`WorkerPool`] and is reaped in
//! [`teardown`], including workers deactivated mid-run, before the shared
//! state is released.

use std::sync::Arc;

use skyform_types::{AgentId, DeactivationReason};
use tokio::task::{JoinError, JoinHandle};
use tracing::{debug, info, warn};

use crate::report::{ReportError, SimulationReport};
use crate::state::{SharedState, StateInner, WorkerSignal};
use crate::worker::WorkerExit;

/// Errors raised while tearing a run down.
#[derive(Debug, thiserror::Error)]
pub enum TeardownError {
    /// A monitor task panicked or was aborted.
    #[error("{task} task failed to join: {source}")]
    TaskFailed {
        /// Which task.
        task: &'static str,
        /// The underlying join error.
        source: JoinError,
    },

    /// The report generator could not write the report.
    #[error("report error: {source}")]
    Report {
        /// The underlying report error.
        #[from]
        source: ReportError,
    },

    /// Something still holds a reference to the shared state.
    #[error("shared state still has {holders} holders after all tasks joined")]
    StateStillShared {
        /// Strong reference count at the time of release.
        holders: usize,
    },
}

/// Deactivate one agent. Must be called with the state lock held.
///
/// No-op (returns `false`) if the ID is invalid or the agent is already
/// inactive. Otherwise sends the worker a termination request, marks the
/// agent inactive with `reason`, and drops its control handle.
pub(crate) fn deactivate(inner: &mut StateInner, id: AgentId, reason: DeactivationReason) -> bool {
    let Some(agent) = inner.agent_mut(id) else {
        return false;
    };
    if !agent.active {
        return false;
    }
    if let Some(control) = agent.control.take() {
        // The worker may already be gone; the flag below is what matters.
        let _ = control.send(WorkerSignal::Terminate);
    }
    agent.active = false;
    agent.reason = Some(reason);
    info!(agent = %id, reason = ?reason, "Drone deactivated");
    true
}

/// Stop the run and broadcast cancellation so every parked task wakes.
///
/// With `Some(reason)` every remaining agent is deactivated with that
/// reason. With `None` the run ended on its own and remaining agents are
/// marked completed instead. Either way the state is marked finished.
///
/// Returns how many agents changed. Safe to call more than once.
pub async fn shutdown_all(state: &SharedState, reason: Option<DeactivationReason>) -> usize {
    let changed = {
        let mut inner = state.lock().await;
        inner.running = false;
        let changed = match reason {
            Some(reason) => (0..inner.agents.len())
                .map(AgentId)
                .filter(|id| deactivate(&mut inner, *id, reason))
                .count(),
            None => inner.complete_all_active(),
        };
        inner.finished = true;
        changed
    };

    state.cancel_token().cancel();
    state.evaluation_notify().notify_one();
    state.report_notify().notify_one();

    info!(run = %state.run_id(), changed, reason = ?reason, "Shutdown broadcast");
    changed
}

/// Join handles of every spawned worker, in spawn order.
#[derive(Debug, Default)]
pub struct WorkerPool {
    handles: Vec<(AgentId, JoinHandle<WorkerExit>)>,
}

/// Outcome of reaping every worker.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReapSummary {
    /// Workers joined cleanly.
    pub reaped: usize,
    /// Workers that panicked or were aborted.
    pub failed: usize,
    /// Per-worker exit kind, in figure order.
    pub exits: Vec<(AgentId, Option<WorkerExit>)>,
}

impl WorkerPool {
    /// Create an empty pool.
    pub const fn new() -> Self {
        Self {
            handles: Vec::new(),
        }
    }

    /// Track a spawned worker.
    pub fn push(&mut self, id: AgentId, handle: JoinHandle<WorkerExit>) {
        self.handles.push((id, handle));
    }

    /// Number of tracked workers.
    pub fn len(&self) -> usize {
        self.handles.len()
    }

    /// Whether no workers are tracked.
    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    /// Wait for every worker to exit.
    pub async fn reap(self) -> ReapSummary {
        let mut summary = ReapSummary::default();
        for (id, handle) in self.handles {
            match handle.await {
                Ok(exit) => {
                    debug!(agent = %id, exit = ?exit, "Worker reaped");
                    summary.reaped = summary.reaped.saturating_add(1);
                    summary.exits.push((id, Some(exit)));
                }
                Err(e) => {
                    warn!(agent = %id, error = %e, "Worker failed to join");
                    summary.failed = summary.failed.saturating_add(1);
                    summary.exits.push((id, None));
                }
            }
        }
        summary
    }
}

/// Final teardown of a run.
///
/// Joins every worker, then the collision monitor, then the report
/// generator, and finally releases the shared state. Runs after
/// [`shutdown_all`]; each step happens exactly once because every input
/// is consumed.
///
/// # Errors
///
/// Returns [`TeardownError`] if a monitor task failed, the report could
/// not be written, or the state is still shared.
pub async fn teardown(
    state: Arc<SharedState>,
    workers: WorkerPool,
    monitor: JoinHandle<()>,
    report: JoinHandle<Result<SimulationReport, ReportError>>,
) -> Result<(ReapSummary, SimulationReport), TeardownError> {
    let run_id = state.run_id();
    let reap = workers.reap().await;
    info!(run = %run_id, reaped = reap.reaped, failed = reap.failed, "Workers reaped");

    monitor
        .await
        .map_err(|source| TeardownError::TaskFailed {
            task: "collision monitor",
            source,
        })?;
    let report = report.await.map_err(|source| TeardownError::TaskFailed {
        task: "report generator",
        source,
    })??;

    match Arc::try_unwrap(state) {
        Ok(owned) => drop(owned),
        Err(still_shared) => {
            return Err(TeardownError::StateStillShared {
                holders: Arc::strong_count(&still_shared),
            });
        }
    }
    info!(run = %run_id, "Shared state released");
    Ok((reap, report))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::path::PathBuf;

    use skyform_types::{Position, RunId};
    use tokio::sync::mpsc;

    use super::*;
    use crate::cancel::CancelToken;
    use crate::input::FigureEntry;

    fn state(n: usize) -> SharedState {
        let figure: Vec<FigureEntry> = (0..n)
            .map(|i| FigureEntry {
                script: format!("s{i}"),
                script_path: PathBuf::from(format!("s{i}")),
                start: Position::default(),
            })
            .collect();
        SharedState::new(RunId::new(), &figure, 4, Arc::new(CancelToken::new()))
    }

    #[tokio::test]
    async fn deactivate_sends_terminate_once() {
        let state = state(1);
        let (tx, mut rx) = mpsc::unbounded_channel();
        state.attach_worker(AgentId(0), tx).await;

        assert!(state.deactivate(AgentId(0), DeactivationReason::Collision).await);
        assert!(!state.deactivate(AgentId(0), DeactivationReason::Collision).await);

        assert_eq!(rx.recv().await, Some(WorkerSignal::Terminate));
        // Control handle was dropped with the deactivation.
        assert_eq!(rx.recv().await, None);
    }

    #[tokio::test]
    async fn shutdown_deactivates_remaining_and_cancels() {
        let state = state(3);
        assert!(state.mark_completed(AgentId(2)).await);

        let deactivated = shutdown_all(&state, Some(DeactivationReason::Interrupted)).await;
        assert_eq!(deactivated, 2);
        assert!(state.cancel_token().is_cancelled());
        assert!(!state.is_running().await);

        let snap = state.snapshot().await;
        assert_eq!(
            snap.agents.first().unwrap().reason,
            Some(DeactivationReason::Interrupted)
        );
        assert!(snap.agents.get(2).unwrap().completed);

        // Second call is a no-op.
        assert_eq!(shutdown_all(&state, Some(DeactivationReason::Interrupted)).await, 0);
    }

    #[tokio::test]
    async fn graceful_shutdown_completes_remaining() {
        let state = state(2);
        state.deactivate(AgentId(0), DeactivationReason::Collision).await;

        assert_eq!(shutdown_all(&state, None).await, 1);
        let snap = state.snapshot().await;
        assert_eq!(
            snap.agents.first().unwrap().reason,
            Some(DeactivationReason::Collision)
        );
        assert!(snap.agents.get(1).unwrap().completed);
        assert!(state.cancel_token().is_cancelled());
    }

    #[tokio::test]
    async fn reap_waits_for_every_worker() {
        let mut pool = WorkerPool::new();
        pool.push(AgentId(0), tokio::spawn(async { WorkerExit::Completed }));
        pool.push(AgentId(1), tokio::spawn(async { WorkerExit::Terminated }));
        assert_eq!(pool.len(), 2);

        let summary = pool.reap().await;
        assert_eq!(summary.reaped, 2);
        assert_eq!(summary.failed, 0);
        assert_eq!(
            summary.exits,
            vec![
                (AgentId(0), Some(WorkerExit::Completed)),
                (AgentId(1), Some(WorkerExit::Terminated)),
            ]
        );
    }
}
