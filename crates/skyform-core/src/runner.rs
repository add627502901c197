//! Simulation runner.
//!
//! This module provides [`Simulation`], which owns one run end to end:
//!
//! - **Prepare**: load the figure, count every script's steps, and fail
//!   fast on unreadable input before anything is spawned
//! - **Run**: spawn the collision monitor, the report generator and one
//!   worker per drone, wait for every drone to publish its start position,
//!   then hand control to the step coordinator
//! - **Teardown**: reap every worker, join both monitor tasks and release
//!   the shared state
//!
//! Cancellation is requested through the token from
//! [`Simulation::cancel_token`], typically by a signal handler.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use skyform_types::{AgentId, RunId};
use tracing::{debug, info, warn};

use crate::cancel::CancelToken;
use crate::config::SimulationConfig;
use crate::coordinator::{self, CoordinatorSettings, SimulationEndReason};
use crate::input::{self, FigureEntry, InputError};
use crate::lifecycle::{self, TeardownError, WorkerPool};
use crate::monitor::{self, MonitorSettings};
use crate::report::{self, ReportSettings, SimulationReport};
use crate::state::SharedState;
use crate::worker;

/// Errors that can occur during a simulation run.
#[derive(Debug, thiserror::Error)]
pub enum RunnerError {
    /// The figure or a script could not be loaded.
    #[error("input error: {source}")]
    Input {
        /// The underlying input error.
        #[from]
        source: InputError,
    },

    /// Teardown failed.
    #[error("teardown error: {source}")]
    Teardown {
        /// The underlying teardown error.
        #[from]
        source: TeardownError,
    },
}

/// Result of a completed run.
#[derive(Debug)]
pub struct SimulationResult {
    /// The run.
    pub run_id: RunId,
    /// Why the run ended.
    pub end_reason: SimulationEndReason,
    /// Steps that completed collision evaluation.
    pub steps_executed: u64,
    /// The report that was written.
    pub report: SimulationReport,
    /// Workers joined cleanly.
    pub workers_reaped: usize,
    /// Workers that panicked or were aborted.
    pub worker_failures: usize,
}

/// A prepared simulation run.
#[derive(Debug)]
pub struct Simulation {
    run_id: RunId,
    figure_file: PathBuf,
    figure: Vec<FigureEntry>,
    longest_script: u64,
    config: SimulationConfig,
    cancel: Arc<CancelToken>,
}

impl Simulation {
    /// Load the figure at `figure_path` and check every script.
    ///
    /// # Errors
    ///
    /// Returns [`InputError`] if the figure cannot be read, holds no
    /// drones, or names a script that cannot be read.
    pub fn prepare(figure_path: &Path, config: SimulationConfig) -> Result<Self, InputError> {
        let figure = input::load_figure(figure_path)?;

        let mut longest_script: u64 = 0;
        for (index, entry) in figure.iter().enumerate() {
            let id = AgentId(index);
            let steps = input::count_script_steps(id, &entry.script_path)?;
            debug!(
                agent = %id,
                script = %entry.script,
                start = %entry.start,
                steps,
                "Drone loaded"
            );
            longest_script = longest_script.max(steps);
        }

        let run_id = RunId::new();
        debug!(run = %run_id, figure = %figure_path.display(), "Figure checked");

        Ok(Self {
            run_id,
            figure_file: figure_path.to_path_buf(),
            figure,
            longest_script,
            config,
            cancel: Arc::new(CancelToken::new()),
        })
    }

    /// The run identifier.
    pub const fn run_id(&self) -> RunId {
        self.run_id
    }

    /// Number of drones in the figure.
    pub fn drone_count(&self) -> usize {
        self.figure.len()
    }

    /// Well-formed lines in the longest script.
    pub const fn longest_script(&self) -> u64 {
        self.longest_script
    }

    /// Token that stops the run when cancelled.
    pub fn cancel_token(&self) -> Arc<CancelToken> {
        Arc::clone(&self.cancel)
    }

    /// Run the simulation to completion and write the report.
    ///
    /// # Errors
    ///
    /// Returns [`RunnerError`] if teardown fails, including when the
    /// report cannot be written.
    pub async fn run(self) -> Result<SimulationResult, RunnerError> {
        let bounds = &self.config.simulation;
        let state = Arc::new(SharedState::new(
            self.run_id,
            &self.figure,
            bounds.max_collisions,
            Arc::clone(&self.cancel),
        ));

        let monitor = monitor::spawn_monitor(
            Arc::clone(&state),
            MonitorSettings {
                threshold: bounds.collision_threshold,
                cap: bounds.max_collisions,
                poll_interval: self.config.monitor.poll_interval(),
            },
        );
        let report = report::spawn_report_generator(
            Arc::clone(&state),
            ReportSettings {
                figure_file: self.figure_file.display().to_string(),
                path: self.config.report.path.clone(),
                json_path: self.config.report.json_path.clone(),
                collision_cap: bounds.max_collisions,
                poll_interval: self.config.monitor.poll_interval(),
            },
        );

        // --- Spawn workers behind the ready barrier ---
        state.begin_barrier(self.figure.len()).await;
        let mut workers = WorkerPool::new();
        for (index, entry) in self.figure.iter().enumerate() {
            let id = AgentId(index);
            let (control, handle) = worker::spawn_worker(
                id,
                entry.script_path.clone(),
                entry.start,
                bounds.motion_mode,
                Arc::clone(&state),
            );
            state.attach_worker(id, control).await;
            workers.push(id, handle);
        }
        info!(run = %self.run_id, workers = workers.len(), "Drone workers spawned");

        if coordinator::wait_for_barrier(&state).await.is_ok() {
            info!(run = %self.run_id, "All drones ready");
        }

        // --- Step loop (returns immediately if already cancelled) ---
        let outcome = coordinator::run_steps(
            Arc::clone(&state),
            CoordinatorSettings {
                max_steps: bounds.max_steps,
                longest_script: self.longest_script,
                step_interval: bounds.step_interval(),
            },
        )
        .await;

        let (reap, report) = lifecycle::teardown(state, workers, monitor, report).await?;

        Ok(SimulationResult {
            run_id: self.run_id,
            end_reason: outcome.end_reason,
            steps_executed: outcome.steps_executed,
            report,
            workers_reaped: reap.reaped,
            worker_failures: reap.failed,
        })
    }
}

/// Log the simulation end sequence.
///
/// Called after [`Simulation::run`] returns.
pub fn log_simulation_end(result: &SimulationResult) {
    info!(
        run = %result.run_id,
        reason = %result.end_reason,
        steps_executed = result.steps_executed,
        collisions = result.report.collisions.len(),
        violations_detected = result.report.violations_detected,
        verdict = result.report.verdict.label(),
        "Simulation ended"
    );

    if result.worker_failures > 0 {
        warn!(
            failures = result.worker_failures,
            reaped = result.workers_reaped,
            "Some drone workers did not exit cleanly"
        );
    }
}
