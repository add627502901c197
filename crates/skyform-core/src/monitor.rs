//! Collision monitor.
//!
//! Runs as its own task. Once per step the coordinator publishes a
//! pending evaluation and wakes the monitor, which scans every unordered
//! pair of active drones under the state lock, logs violations, and only
//! after the full scan deactivates every drone found in a violating pair.
//! Between steps it parks on a wait-with-timeout so cancellation is seen
//! promptly.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use skyform_types::{AgentId, CollisionRecord, DeactivationReason, Position};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::lifecycle;
use crate::state::{SharedState, StateInner};

/// A pair of drones closer than the safety threshold.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Violation {
    /// Lower-indexed drone.
    pub first: AgentId,
    /// Higher-indexed drone.
    pub second: AgentId,
    /// Measured distance.
    pub distance: f64,
}

/// Every pair in `positions` closer than `threshold`, in lexicographic
/// index order.
///
/// `positions` must be sorted by agent index.
pub fn scan_pairs(positions: &[(AgentId, Position)], threshold: f64) -> Vec<Violation> {
    let mut violations = Vec::new();
    for (offset, (first, a)) in positions.iter().enumerate() {
        let rest = positions.get(offset.saturating_add(1)..).unwrap_or_default();
        for (second, b) in rest {
            let distance = a.distance_to(*b);
            if distance < threshold {
                violations.push(Violation {
                    first: *first,
                    second: *second,
                    distance,
                });
            }
        }
    }
    violations
}

/// What one step's evaluation found and did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StepEvaluation {
    /// Violating pairs found this step.
    pub violations: usize,
    /// Violations that made it into the log.
    pub logged: usize,
    /// Drones deactivated for collision.
    pub deactivated: Vec<AgentId>,
    /// Whether the log reached the collision cap.
    pub limit_reached: bool,
}

/// Evaluate step `step` against the current state. Caller holds the lock.
///
/// Deactivation is applied after the full pairwise scan so that a drone
/// already found colliding is still checked against every other drone.
pub(crate) fn evaluate_step(
    inner: &mut StateInner,
    step: u64,
    threshold: f64,
    cap: usize,
) -> StepEvaluation {
    let active: Vec<(AgentId, Position, f64)> = inner
        .agents
        .iter()
        .filter(|a| a.active)
        .map(|a| (a.id, a.position, a.time))
        .collect();
    let positions: Vec<(AgentId, Position)> = active.iter().map(|(id, p, _)| (*id, *p)).collect();
    let time_of = |id: AgentId| {
        active
            .iter()
            .find(|(other, _, _)| *other == id)
            .map_or(0.0, |(_, _, time)| *time)
    };

    let violations = scan_pairs(&positions, threshold);
    let mut evaluation = StepEvaluation {
        violations: violations.len(),
        ..StepEvaluation::default()
    };
    let mut flagged = BTreeSet::new();

    for violation in &violations {
        inner.collisions.note_violation();
        let position_of = |id: AgentId| {
            positions
                .iter()
                .find(|(other, _)| *other == id)
                .map_or_else(Position::default, |(_, p)| *p)
        };
        let record = CollisionRecord {
            first: violation.first,
            second: violation.second,
            step,
            time: time_of(violation.first).max(time_of(violation.second)),
            distance: violation.distance,
            first_position: position_of(violation.first),
            second_position: position_of(violation.second),
        };
        let logged = inner.collisions.try_append(record);
        if logged {
            evaluation.logged = evaluation.logged.saturating_add(1);
        }
        warn!(
            step,
            first = %violation.first,
            second = %violation.second,
            distance = violation.distance,
            logged,
            "Collision detected"
        );
        flagged.insert(violation.first);
        flagged.insert(violation.second);
    }

    for id in flagged {
        if lifecycle::deactivate(inner, id, DeactivationReason::Collision) {
            evaluation.deactivated.push(id);
        }
    }

    if inner.collisions.len() >= cap {
        inner.limit_exceeded = true;
        inner.running = false;
        evaluation.limit_reached = true;
        warn!(
            step,
            logged = inner.collisions.len(),
            cap,
            "Collision limit reached"
        );
    }
    evaluation
}

/// Parameters for the collision monitor task.
#[derive(Debug, Clone, Copy)]
pub struct MonitorSettings {
    /// Distance below which two drones collide, in meters.
    pub threshold: f64,
    /// Logged collisions that stop the run.
    pub cap: usize,
    /// Upper bound on one idle wait.
    pub poll_interval: Duration,
}

/// Spawn the collision monitor for a run.
///
/// The task exits once the run's cancellation token fires.
pub fn spawn_monitor(state: Arc<SharedState>, settings: MonitorSettings) -> JoinHandle<()> {
    tokio::spawn(async move {
        let cancel = Arc::clone(state.cancel_token());
        info!(run = %state.run_id(), threshold = settings.threshold, "Collision monitor started");

        while !cancel.is_cancelled() {
            let notified = state.evaluation_notify().notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            let outcome = {
                let mut inner = state.lock().await;
                inner.evaluation.pending().map(|step| {
                    let outcome = evaluate_step(&mut inner, step, settings.threshold, settings.cap);
                    inner.evaluation.evaluated = Some(step);
                    (step, outcome)
                })
            };

            match outcome {
                Some((step, outcome)) => {
                    debug!(
                        step,
                        violations = outcome.violations,
                        deactivated = outcome.deactivated.len(),
                        "Step evaluated"
                    );
                    state.evaluated_notify().notify_one();
                    if outcome.logged > 0 {
                        state.report_notify().notify_one();
                    }
                }
                None => {
                    tokio::select! {
                        biased;
                        () = cancel.cancelled() => break,
                        _ = tokio::time::timeout(settings.poll_interval, notified) => {}
                    }
                }
            }
        }
        info!(run = %state.run_id(), "Collision monitor stopped");
    })
}
