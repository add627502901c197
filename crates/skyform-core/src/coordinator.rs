//! Lockstep step coordinator.
//!
//! Drives the run one step at a time:
//!
//! - **Releasing**: reset the barrier and send one release to every
//!   active drone
//! - **Barrier-Wait**: park until every released drone has reported
//! - **Collision-Eval**: hand the step to the collision monitor and park
//!   until it reports the step evaluated
//! - **Idle / Terminal**: advance, or stop on cap, empty fleet, step
//!   bound or cancellation
//!
//! No drone is released for step k+1 before the monitor has finished
//! step k, so the monitor never sees a position from a later step.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use skyform_types::DeactivationReason;
use tracing::{debug, info};

use crate::lifecycle;
use crate::state::{BarrierCount, SharedState, WorkerSignal};

/// Why a simulation run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SimulationEndReason {
    /// Reached the configured `max_steps` before every script ran out.
    StepLimitReached,
    /// Ran every step of the longest script.
    ScriptsExhausted,
    /// Logged collisions reached the configured cap.
    CollisionLimitExceeded,
    /// No drone was active at the start of a step.
    NoActiveAgents,
    /// An operator interrupt cancelled the run.
    OperatorStop,
}

impl SimulationEndReason {
    /// Human-readable label used in the text report.
    pub const fn label(self) -> &'static str {
        match self {
            Self::StepLimitReached => "Step limit reached",
            Self::ScriptsExhausted => "All scripts completed",
            Self::CollisionLimitExceeded => "Collision limit exceeded",
            Self::NoActiveAgents => "No active drones",
            Self::OperatorStop => "Stopped by operator",
        }
    }

    /// Reason given to drones still active at shutdown, or `None` when
    /// they are marked completed instead.
    pub const fn shutdown_reason(self) -> Option<DeactivationReason> {
        match self {
            Self::CollisionLimitExceeded => Some(DeactivationReason::CollisionLimit),
            Self::OperatorStop => Some(DeactivationReason::Interrupted),
            Self::StepLimitReached | Self::ScriptsExhausted | Self::NoActiveAgents => None,
        }
    }
}

impl core::fmt::Display for SimulationEndReason {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.label())
    }
}

/// Step bounds for one run.
#[derive(Debug, Clone, Copy)]
pub struct CoordinatorSettings {
    /// Configured upper bound on steps.
    pub max_steps: u64,
    /// Well-formed lines in the longest script.
    pub longest_script: u64,
    /// Pause between steps.
    pub step_interval: Duration,
}

impl CoordinatorSettings {
    /// Last step the coordinator will release.
    pub const fn last_step(&self) -> u64 {
        if self.max_steps < self.longest_script {
            self.max_steps
        } else {
            self.longest_script
        }
    }
}

/// Result of the step loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CoordinatorOutcome {
    /// Why the loop stopped.
    pub end_reason: SimulationEndReason,
    /// Steps that completed collision evaluation.
    pub steps_executed: u64,
}

/// A wait was cut short by run-wide cancellation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cancelled;

/// Park until every expected barrier arrival has been reported.
///
/// # Errors
///
/// Returns [`Cancelled`] if the run is cancelled first.
pub async fn wait_for_barrier(state: &SharedState) -> Result<(), Cancelled> {
    let cancel = state.cancel_token();
    loop {
        let notified = state.barrier_notify().notified();
        tokio::pin!(notified);
        notified.as_mut().enable();

        if state.barrier_satisfied().await {
            return Ok(());
        }
        tokio::select! {
            biased;
            () = cancel.cancelled() => return Err(Cancelled),
            () = notified => {}
        }
    }
}

/// Hand `step` to the collision monitor and park until it is evaluated.
///
/// # Errors
///
/// Returns [`Cancelled`] if the run is cancelled first.
pub async fn request_evaluation(state: &SharedState, step: u64) -> Result<(), Cancelled> {
    state.lock().await.evaluation.requested = Some(step);
    state.evaluation_notify().notify_one();

    let cancel = state.cancel_token();
    loop {
        let notified = state.evaluated_notify().notified();
        tokio::pin!(notified);
        notified.as_mut().enable();

        if state.lock().await.evaluation.evaluated == Some(step) {
            return Ok(());
        }
        tokio::select! {
            biased;
            () = cancel.cancelled() => return Err(Cancelled),
            () = notified => {}
        }
    }
}

/// Reset the barrier and release every active drone for `step`.
///
/// Returns the number of releases delivered, or `None` if no drone is
/// active (nothing would ever satisfy the barrier).
async fn release_step(state: &SharedState, step: u64) -> Option<usize> {
    let mut inner = state.lock().await;
    if inner.active_count() == 0 {
        return None;
    }
    inner.step = step;
    inner.barrier = BarrierCount::default();

    let released = inner
        .agents
        .iter()
        .filter(|a| a.active)
        .filter_map(|a| a.control.as_ref())
        .filter(|control| control.send(WorkerSignal::Release { step }).is_ok())
        .count();
    inner.barrier.expected = released;
    Some(released)
}

async fn log_positions(state: &SharedState, step: u64) {
    let inner = state.lock().await;
    for agent in inner.agents.iter().filter(|a| a.active || a.completed) {
        debug!(
            step,
            agent = %agent.id,
            position = %agent.position,
            active = agent.active,
            "Drone position"
        );
    }
}

/// Run the step loop until a terminal condition, then shut the run down.
///
/// Assumes every worker has already passed the ready barrier. On exit the
/// end reason is recorded in the shared state and [`lifecycle::shutdown_all`]
/// has broadcast cancellation.
pub async fn run_steps(state: Arc<SharedState>, settings: CoordinatorSettings) -> CoordinatorOutcome {
    let cancel = Arc::clone(state.cancel_token());
    let last_step = settings.last_step();
    let mut steps_executed: u64 = 0;
    let mut step: u64 = 1;

    info!(
        run = %state.run_id(),
        last_step,
        max_steps = settings.max_steps,
        longest_script = settings.longest_script,
        "Step loop starting"
    );

    let end_reason = loop {
        // --- Check stop request ---
        if cancel.is_cancelled() {
            info!(step, "Operator stop requested");
            break SimulationEndReason::OperatorStop;
        }

        // --- Check step bound ---
        if step > last_step {
            break if last_step < settings.longest_script {
                SimulationEndReason::StepLimitReached
            } else {
                SimulationEndReason::ScriptsExhausted
            };
        }

        // --- Release ---
        let Some(released) = release_step(&state, step).await else {
            info!(step, "No active drones");
            break SimulationEndReason::NoActiveAgents;
        };
        debug!(step, released, "Step released");

        // --- Barrier ---
        if wait_for_barrier(&state).await.is_err() {
            break SimulationEndReason::OperatorStop;
        }
        debug!(step, "All drones reported");
        log_positions(&state, step).await;

        // --- Collision evaluation ---
        if request_evaluation(&state, step).await.is_err() {
            break SimulationEndReason::OperatorStop;
        }
        steps_executed = steps_executed.saturating_add(1);

        let limit_exceeded = {
            let mut inner = state.lock().await;
            inner.steps_executed = steps_executed;
            inner.limit_exceeded
        };
        if limit_exceeded {
            info!(step, "Collision limit exceeded, stopping");
            break SimulationEndReason::CollisionLimitExceeded;
        }

        // --- Pace ---
        if !settings.step_interval.is_zero() {
            tokio::select! {
                biased;
                () = cancel.cancelled() => {}
                () = tokio::time::sleep(settings.step_interval) => {}
            }
        }
        step = step.saturating_add(1);
    };

    state.lock().await.end_reason = Some(end_reason);
    lifecycle::shutdown_all(&state, end_reason.shutdown_reason()).await;

    info!(
        run = %state.run_id(),
        reason = %end_reason,
        steps_executed,
        "Step loop finished"
    );
    CoordinatorOutcome {
        end_reason,
        steps_executed,
    }
}
