//! Shared simulation state.
//!
//! [`SharedState`] is created once per run by the runner and shared by
//! reference (`Arc`) with every worker, the collision monitor and the
//! report generator. All agent positions, flags and the collision log sit
//! behind one [`Mutex`]. Critical sections are short field-group updates;
//! nobody holds the lock across a file read or a wait.
//!
//! Wake-ups between units go through dedicated [`Notify`] primitives so
//! that idle components consume no CPU:
//!
//! | primitive           | signalled by      | waited on by      |
//! |---------------------|-------------------|-------------------|
//! | `barrier_notify`    | workers           | coordinator       |
//! | `evaluation_notify` | coordinator       | collision monitor |
//! | `evaluated_notify`  | collision monitor | coordinator       |
//! | `report_notify`     | monitor, shutdown | report generator  |

use std::sync::Arc;

use serde::Serialize;
use skyform_types::{AgentId, AgentSnapshot, CollisionRecord, DeactivationReason, Position, RunId};
use tokio::sync::{Mutex, MutexGuard, Notify, mpsc};

use crate::cancel::CancelToken;
use crate::coordinator::SimulationEndReason;
use crate::input::FigureEntry;
use crate::lifecycle;

/// Message delivered on a worker's private control channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerSignal {
    /// Execute one step.
    Release {
        /// The step being released.
        step: u64,
    },
    /// Exit immediately without signalling the barrier.
    Terminate,
}

/// Sending half of a worker's control channel.
pub type WorkerControl = mpsc::UnboundedSender<WorkerSignal>;

/// One row of the agent table.
#[derive(Debug)]
pub(crate) struct AgentRecord {
    pub(crate) id: AgentId,
    pub(crate) script: String,
    pub(crate) position: Position,
    pub(crate) time: f64,
    pub(crate) steps_completed: u64,
    pub(crate) active: bool,
    pub(crate) completed: bool,
    pub(crate) reason: Option<DeactivationReason>,
    /// Handle to the executing worker; dropped once the agent is inactive.
    pub(crate) control: Option<WorkerControl>,
}

impl AgentRecord {
    fn snapshot(&self) -> AgentSnapshot {
        AgentSnapshot {
            id: self.id,
            script: self.script.clone(),
            position: self.position,
            time: self.time,
            steps_completed: self.steps_completed,
            active: self.active,
            completed: self.completed,
            reason: self.reason,
        }
    }
}

/// Append-only, bounded collision log.
#[derive(Debug)]
pub(crate) struct CollisionLog {
    entries: Vec<CollisionRecord>,
    capacity: usize,
    /// Entries before this index have been drained by the report generator.
    processed: usize,
    /// Every violation found, logged or not.
    violations_detected: u64,
}

impl CollisionLog {
    pub(crate) fn with_capacity(capacity: usize) -> Self {
        Self {
            entries: Vec::with_capacity(capacity),
            capacity,
            processed: 0,
            violations_detected: 0,
        }
    }

    pub(crate) fn note_violation(&mut self) {
        self.violations_detected = self.violations_detected.saturating_add(1);
    }

    pub(crate) fn try_append(&mut self, record: CollisionRecord) -> bool {
        if self.is_full() {
            return false;
        }
        self.entries.push(record);
        true
    }

    pub(crate) fn is_full(&self) -> bool {
        self.entries.len() >= self.capacity
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    pub(crate) fn entries(&self) -> &[CollisionRecord] {
        &self.entries
    }

    pub(crate) const fn violations_detected(&self) -> u64 {
        self.violations_detected
    }

    /// Hand out every entry not yet drained and mark them processed.
    pub(crate) fn take_unprocessed(&mut self) -> Vec<CollisionRecord> {
        let fresh = self
            .entries
            .get(self.processed..)
            .map(<[CollisionRecord]>::to_vec)
            .unwrap_or_default();
        self.processed = self.entries.len();
        fresh
    }
}

/// Per-step completion bookkeeping.
#[derive(Debug, Default, Clone, Copy)]
pub(crate) struct BarrierCount {
    pub(crate) expected: usize,
    pub(crate) arrived: usize,
}

/// Hand-off between the coordinator and the collision monitor.
#[derive(Debug, Default, Clone, Copy)]
pub(crate) struct EvaluationPhase {
    pub(crate) requested: Option<u64>,
    pub(crate) evaluated: Option<u64>,
}

impl EvaluationPhase {
    /// The step awaiting evaluation, if any.
    pub(crate) fn pending(self) -> Option<u64> {
        self.requested.filter(|step| self.evaluated != Some(*step))
    }
}

/// Everything guarded by the state lock.
#[derive(Debug)]
pub(crate) struct StateInner {
    pub(crate) agents: Vec<AgentRecord>,
    pub(crate) collisions: CollisionLog,
    pub(crate) step: u64,
    pub(crate) steps_executed: u64,
    pub(crate) running: bool,
    pub(crate) limit_exceeded: bool,
    /// Set once bulk shutdown has finished; agent flags are final.
    pub(crate) finished: bool,
    pub(crate) end_reason: Option<SimulationEndReason>,
    pub(crate) barrier: BarrierCount,
    pub(crate) evaluation: EvaluationPhase,
}

impl StateInner {
    pub(crate) fn agent(&self, id: AgentId) -> Option<&AgentRecord> {
        self.agents.get(id.index())
    }

    pub(crate) fn agent_mut(&mut self, id: AgentId) -> Option<&mut AgentRecord> {
        self.agents.get_mut(id.index())
    }

    pub(crate) fn active_count(&self) -> usize {
        self.agents.iter().filter(|a| a.active).count()
    }

    /// Mark every still-active agent as completed. Returns how many changed.
    pub(crate) fn complete_all_active(&mut self) -> usize {
        let mut count: usize = 0;
        for agent in self.agents.iter_mut().filter(|a| a.active) {
            agent.active = false;
            agent.completed = true;
            agent.control = None;
            count = count.saturating_add(1);
        }
        count
    }
}

/// Point-in-time copy of the shared state, used for reporting.
#[derive(Debug, Clone, Serialize)]
pub struct StateSnapshot {
    /// The run this state belongs to.
    pub run_id: RunId,
    /// Last step released by the coordinator.
    pub step: u64,
    /// Steps that completed collision evaluation.
    pub steps_executed: u64,
    /// Every agent, in figure order.
    pub agents: Vec<AgentSnapshot>,
    /// The retained collision log.
    pub collisions: Vec<CollisionRecord>,
    /// Every violation found, including those the full log dropped.
    pub violations_detected: u64,
    /// Whether the collision cap was reached.
    pub limit_exceeded: bool,
    /// Why the run ended, once it has.
    pub end_reason: Option<SimulationEndReason>,
}

/// The single source of truth for one simulation run.
#[derive(Debug)]
pub struct SharedState {
    run_id: RunId,
    cancel: Arc<CancelToken>,
    inner: Mutex<StateInner>,
    barrier_notify: Notify,
    evaluation_notify: Notify,
    evaluated_notify: Notify,
    report_notify: Notify,
}

impl SharedState {
    /// Build the state for a run from the loaded figure.
    ///
    /// Every agent starts active at its figure position. The collision
    /// log holds at most `collision_capacity` records.
    pub fn new(
        run_id: RunId,
        figure: &[FigureEntry],
        collision_capacity: usize,
        cancel: Arc<CancelToken>,
    ) -> Self {
        let agents = figure
            .iter()
            .enumerate()
            .map(|(index, entry)| AgentRecord {
                id: AgentId(index),
                script: entry.script.clone(),
                position: entry.start,
                time: 0.0,
                steps_completed: 0,
                active: true,
                completed: false,
                reason: None,
                control: None,
            })
            .collect();

        Self {
            run_id,
            cancel,
            inner: Mutex::new(StateInner {
                agents,
                collisions: CollisionLog::with_capacity(collision_capacity),
                step: 0,
                steps_executed: 0,
                running: true,
                limit_exceeded: false,
                finished: false,
                end_reason: None,
                barrier: BarrierCount::default(),
                evaluation: EvaluationPhase::default(),
            }),
            barrier_notify: Notify::new(),
            evaluation_notify: Notify::new(),
            evaluated_notify: Notify::new(),
            report_notify: Notify::new(),
        }
    }

    /// The run identifier.
    pub const fn run_id(&self) -> RunId {
        self.run_id
    }

    /// The run-wide cancellation token.
    pub fn cancel_token(&self) -> &Arc<CancelToken> {
        &self.cancel
    }

    pub(crate) async fn lock(&self) -> MutexGuard<'_, StateInner> {
        self.inner.lock().await
    }

    pub(crate) const fn barrier_notify(&self) -> &Notify {
        &self.barrier_notify
    }

    pub(crate) const fn evaluation_notify(&self) -> &Notify {
        &self.evaluation_notify
    }

    pub(crate) const fn evaluated_notify(&self) -> &Notify {
        &self.evaluated_notify
    }

    pub(crate) const fn report_notify(&self) -> &Notify {
        &self.report_notify
    }

    /// Register the control channel of the worker executing `id`.
    ///
    /// Ignored if the agent is already inactive.
    pub async fn attach_worker(&self, id: AgentId, control: WorkerControl) {
        if let Some(agent) = self.lock().await.agent_mut(id).filter(|a| a.active) {
            agent.control = Some(control);
        }
    }

    /// Publish a drone's position after a step.
    ///
    /// Returns `false` (and changes nothing) if the agent is unknown or
    /// already inactive, so a deactivated drone never contributes another
    /// position.
    pub async fn record_position(
        &self,
        id: AgentId,
        position: Position,
        time: f64,
        steps_completed: u64,
    ) -> bool {
        let mut inner = self.lock().await;
        match inner.agent_mut(id) {
            Some(agent) if agent.active => {
                agent.position = position;
                agent.time = time;
                agent.steps_completed = steps_completed;
                true
            }
            _ => false,
        }
    }

    /// Append to the collision log. Returns `false` if the log is full.
    pub async fn try_append_collision(&self, record: CollisionRecord) -> bool {
        self.lock().await.collisions.try_append(record)
    }

    /// Deactivate one agent. See [`lifecycle::deactivate`].
    pub async fn deactivate(&self, id: AgentId, reason: DeactivationReason) -> bool {
        let mut inner = self.lock().await;
        lifecycle::deactivate(&mut inner, id, reason)
    }

    /// Mark an agent as having finished its script.
    ///
    /// Returns `false` if the agent was already inactive.
    pub async fn mark_completed(&self, id: AgentId) -> bool {
        let mut inner = self.lock().await;
        match inner.agent_mut(id) {
            Some(agent) if agent.active => {
                agent.active = false;
                agent.completed = true;
                agent.control = None;
                true
            }
            _ => false,
        }
    }

    /// Mark every still-active agent as completed. Returns how many changed.
    pub async fn complete_all_active(&self) -> usize {
        self.lock().await.complete_all_active()
    }

    /// Number of agents still participating.
    pub async fn snapshot_active_count(&self) -> usize {
        self.lock().await.active_count()
    }

    /// Whether `id` is still active.
    pub async fn is_active(&self, id: AgentId) -> bool {
        self.lock().await.agent(id).is_some_and(|a| a.active)
    }

    /// Whether the run is still in progress.
    pub async fn is_running(&self) -> bool {
        self.lock().await.running
    }

    /// Reset the barrier to expect `expected` arrivals.
    pub async fn begin_barrier(&self, expected: usize) {
        self.lock().await.barrier = BarrierCount {
            expected,
            arrived: 0,
        };
    }

    /// Report one arrival at the barrier and wake the coordinator.
    pub async fn arrive(&self) {
        {
            let mut inner = self.lock().await;
            inner.barrier.arrived = inner.barrier.arrived.saturating_add(1);
        }
        self.barrier_notify.notify_one();
    }

    /// Whether every expected arrival has been reported.
    pub async fn barrier_satisfied(&self) -> bool {
        let barrier = self.lock().await.barrier;
        barrier.arrived >= barrier.expected
    }

    /// Copy out the full state.
    pub async fn snapshot(&self) -> StateSnapshot {
        let inner = self.lock().await;
        StateSnapshot {
            run_id: self.run_id,
            step: inner.step,
            steps_executed: inner.steps_executed,
            agents: inner.agents.iter().map(AgentRecord::snapshot).collect(),
            collisions: inner.collisions.entries().to_vec(),
            violations_detected: inner.collisions.violations_detected(),
            limit_exceeded: inner.limit_exceeded,
            end_reason: inner.end_reason,
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::path::PathBuf;

    use super::*;

    fn figure(n: usize) -> Vec<FigureEntry> {
        (0..n)
            .map(|i| FigureEntry {
                script: format!("drone_{i}_script.txt"),
                script_path: PathBuf::from(format!("drone_{i}_script.txt")),
                start: Position::new(0.0, 0.0, 0.0),
            })
            .collect()
    }

    fn state(n: usize, capacity: usize) -> SharedState {
        SharedState::new(RunId::new(), &figure(n), capacity, Arc::new(CancelToken::new()))
    }

    fn record(first: usize, second: usize) -> CollisionRecord {
        CollisionRecord {
            first: AgentId(first),
            second: AgentId(second),
            step: 1,
            time: 1.0,
            distance: 0.5,
            first_position: Position::default(),
            second_position: Position::default(),
        }
    }

    #[tokio::test]
    async fn all_agents_start_active() {
        let state = state(3, 4);
        assert_eq!(state.snapshot_active_count().await, 3);
        assert!(state.is_running().await);
    }

    #[tokio::test]
    async fn snapshot_reports_script_as_written() {
        let state = state(2, 4);
        let snap = state.snapshot().await;
        let scripts: Vec<&str> = snap.agents.iter().map(|a| a.script.as_str()).collect();
        assert_eq!(scripts, ["drone_0_script.txt", "drone_1_script.txt"]);
    }

    #[tokio::test]
    async fn inactive_agent_cannot_publish() {
        let state = state(2, 4);
        assert!(state.record_position(AgentId(0), Position::new(1.0, 1.0, 1.0), 1.0, 1).await);
        assert!(state.deactivate(AgentId(0), DeactivationReason::Collision).await);
        assert!(!state.record_position(AgentId(0), Position::new(9.0, 9.0, 9.0), 2.0, 2).await);

        let snap = state.snapshot().await;
        let agent = snap.agents.first().unwrap();
        assert!((agent.position.x - 1.0).abs() < 1e-9);
        assert_eq!(agent.steps_completed, 1);
    }

    #[tokio::test]
    async fn unknown_agent_is_ignored() {
        let state = state(1, 4);
        assert!(!state.record_position(AgentId(5), Position::default(), 0.0, 0).await);
        assert!(!state.deactivate(AgentId(5), DeactivationReason::Collision).await);
    }

    #[tokio::test]
    async fn collision_log_is_bounded() {
        let state = state(4, 2);
        assert!(state.try_append_collision(record(0, 1)).await);
        assert!(state.try_append_collision(record(0, 2)).await);
        assert!(!state.try_append_collision(record(2, 3)).await);
        assert_eq!(state.snapshot().await.collisions.len(), 2);
    }

    #[tokio::test]
    async fn completion_is_terminal_and_exclusive() {
        let state = state(2, 4);
        assert!(state.mark_completed(AgentId(1)).await);
        assert!(!state.mark_completed(AgentId(1)).await);
        assert!(!state.deactivate(AgentId(1), DeactivationReason::Collision).await);

        let snap = state.snapshot().await;
        let agent = snap.agents.get(1).unwrap();
        assert!(agent.completed);
        assert!(!agent.active);
        assert_eq!(agent.reason, None);
    }

    #[tokio::test]
    async fn complete_all_active_skips_deactivated() {
        let state = state(3, 4);
        state.deactivate(AgentId(1), DeactivationReason::Collision).await;
        assert_eq!(state.complete_all_active().await, 2);
        let snap = state.snapshot().await;
        assert!(snap.agents.first().unwrap().completed);
        assert!(!snap.agents.get(1).unwrap().completed);
        assert_eq!(state.snapshot_active_count().await, 0);
    }

    #[tokio::test]
    async fn barrier_counts_arrivals() {
        let state = state(2, 4);
        state.begin_barrier(2).await;
        assert!(!state.barrier_satisfied().await);
        state.arrive().await;
        assert!(!state.barrier_satisfied().await);
        state.arrive().await;
        assert!(state.barrier_satisfied().await);
    }

    #[tokio::test]
    async fn unprocessed_entries_drain_once() {
        let state = state(3, 4);
        state.try_append_collision(record(0, 1)).await;
        let first = state.lock().await.collisions.take_unprocessed();
        assert_eq!(first.len(), 1);
        state.try_append_collision(record(1, 2)).await;
        let second = state.lock().await.collisions.take_unprocessed();
        assert_eq!(second, vec![record(1, 2)]);
        assert!(state.lock().await.collisions.take_unprocessed().is_empty());
    }

    #[test]
    fn evaluation_pending_tracks_requested_step() {
        let mut phase = EvaluationPhase::default();
        assert_eq!(phase.pending(), None);
        phase.requested = Some(3);
        assert_eq!(phase.pending(), Some(3));
        phase.evaluated = Some(3);
        assert_eq!(phase.pending(), None);
    }
}
