//! Report generator.
//!
//! A background task that drains newly logged collisions while the run is
//! in progress (one `warn!` alert per collision) and, once the run is
//! finished, builds the final [`SimulationReport`] and writes it to disk as
//! text and, optionally, JSON.

use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use skyform_types::{AgentId, AgentStatus, CollisionRecord, Position, RunId};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::coordinator::SimulationEndReason;
use crate::state::{SharedState, StateSnapshot};

const BANNER: &str = "=======================================================";
const RULE: &str = "-------------------------------------------------------";

/// Errors that can occur when writing the report.
#[derive(Debug, thiserror::Error)]
pub enum ReportError {
    /// The report file could not be written.
    #[error("failed to write report {path}: {source}")]
    Io {
        /// Destination path.
        path: PathBuf,
        /// The underlying I/O error.
        source: std::io::Error,
    },

    /// The JSON report could not be serialized.
    #[error("failed to serialize report: {source}")]
    Json {
        /// The underlying serialization error.
        #[from]
        source: serde_json::Error,
    },
}

/// Pass/fail outcome of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    /// No collision was logged.
    Passed,
    /// Collisions were logged but stayed under the cap.
    FailedCollisions,
    /// Logged collisions reached the cap.
    FailedLimitExceeded,
}

impl Verdict {
    /// Judge a run from its logged collision count and the collision cap.
    pub const fn from_counts(logged: usize, cap: usize) -> Self {
        if logged >= cap && logged > 0 {
            Self::FailedLimitExceeded
        } else if logged > 0 {
            Self::FailedCollisions
        } else {
            Self::Passed
        }
    }

    /// Human-readable label used in the text report.
    pub const fn label(self) -> &'static str {
        match self {
            Self::Passed => "PASSED",
            Self::FailedCollisions => "FAILED (Collisions detected)",
            Self::FailedLimitExceeded => "FAILED (Collision limit exceeded)",
        }
    }

    /// Whether the figure is safe to fly.
    pub const fn is_pass(self) -> bool {
        matches!(self, Self::Passed)
    }
}

/// One drone's row in the report.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DroneReport {
    /// The drone.
    pub id: AgentId,
    /// Script path as given in the figure file.
    pub script: String,
    /// Terminal status.
    pub status: AgentStatus,
    /// Last published position.
    pub final_position: Position,
    /// Script lines applied.
    pub steps_completed: u64,
    /// Logged collisions this drone took part in.
    pub collisions: usize,
}

/// The final report of one run.
#[derive(Debug, Clone, Serialize)]
pub struct SimulationReport {
    /// The run.
    pub run_id: RunId,
    /// When the report was built.
    pub generated_at: DateTime<Utc>,
    /// Figure file as given on the command line.
    pub figure_file: String,
    /// Steps that completed collision evaluation.
    pub steps_executed: u64,
    /// Collisions that stop the run.
    pub collision_cap: usize,
    /// Every violation found, logged or not.
    pub violations_detected: u64,
    /// Why the run ended.
    pub end_reason: Option<SimulationEndReason>,
    /// Pass/fail outcome.
    pub verdict: Verdict,
    /// Every drone, in figure order.
    pub drones: Vec<DroneReport>,
    /// The retained collision log.
    pub collisions: Vec<CollisionRecord>,
}

impl SimulationReport {
    /// Build the report from a final state snapshot.
    pub fn build(
        snapshot: &StateSnapshot,
        figure_file: &str,
        collision_cap: usize,
        generated_at: DateTime<Utc>,
    ) -> Self {
        let drones = snapshot
            .agents
            .iter()
            .map(|agent| DroneReport {
                id: agent.id,
                script: agent.script.clone(),
                status: agent.status(),
                final_position: agent.position,
                steps_completed: agent.steps_completed,
                collisions: snapshot
                    .collisions
                    .iter()
                    .filter(|c| c.involves(agent.id))
                    .count(),
            })
            .collect();

        Self {
            run_id: snapshot.run_id,
            generated_at,
            figure_file: figure_file.to_owned(),
            steps_executed: snapshot.steps_executed,
            collision_cap,
            violations_detected: snapshot.violations_detected,
            end_reason: snapshot.end_reason,
            verdict: Verdict::from_counts(snapshot.collisions.len(), collision_cap),
            drones,
            collisions: snapshot.collisions.clone(),
        }
    }

    /// Render the human-readable report.
    pub fn render_text(&self) -> String {
        let mut out = String::new();
        // Writing to a String cannot fail.
        let _ = self.write_text(&mut out);
        out
    }

    fn write_text(&self, out: &mut String) -> std::fmt::Result {
        writeln!(out, "{BANNER}")?;
        writeln!(out, "             DRONE FIGURE SIMULATION REPORT            ")?;
        writeln!(out, "{BANNER}\n")?;
        writeln!(
            out,
            "Generated: {}",
            self.generated_at.format("%Y-%m-%d %H:%M:%S UTC")
        )?;
        writeln!(out, "Figure File: {}", self.figure_file)?;
        writeln!(out, "Run ID: {}\n", self.run_id)?;

        writeln!(out, "{RULE}")?;
        writeln!(out, "SUMMARY\n")?;
        writeln!(out, "Total Number of Drones: {}", self.drones.len())?;
        writeln!(out, "Total Steps: {}", self.steps_executed)?;
        writeln!(out, "Total Collisions: {}", self.collisions.len())?;
        let unlogged = self
            .violations_detected
            .saturating_sub(u64::try_from(self.collisions.len()).unwrap_or(u64::MAX));
        if unlogged > 0 {
            writeln!(
                out,
                "Violations Detected: {} ({unlogged} not logged, collision log full)",
                self.violations_detected
            )?;
        }
        if let Some(reason) = self.end_reason {
            writeln!(out, "End Reason: {reason}")?;
        }
        writeln!(out, "Simulation Result: {}\n", self.verdict.label())?;

        writeln!(out, "{RULE}")?;
        writeln!(out, "DRONE's STATUS\n")?;
        for drone in &self.drones {
            writeln!(out, "Drone {}:", drone.id)?;
            writeln!(out, "Script file: {}", drone.script)?;
            writeln!(out, "  Status: {}", drone.status)?;
            writeln!(out, "  Final Position: {}", drone.final_position)?;
            writeln!(out, "  Steps Completed: {}\n", drone.steps_completed)?;
        }

        if !self.collisions.is_empty() {
            writeln!(out, "{RULE}")?;
            writeln!(out, "COLLISION(S) DETAILS\n")?;
            writeln!(out, "Total Number of Collisions: {}\n", self.collisions.len())?;
            for (number, c) in (1_usize..).zip(&self.collisions) {
                writeln!(out, "Collision {number}:")?;
                writeln!(out, "  Drones Involved: {} and {}", c.first, c.second)?;
                writeln!(out, "  Step: {}", c.step)?;
                writeln!(out, "  Time: {:.2} seconds", c.time)?;
                writeln!(out, "  Distance between them: {:.2} meters", c.distance)?;
                writeln!(out, "  Drone {} Position: {}", c.first, c.first_position)?;
                writeln!(out, "  Drone {} Position: {}\n", c.second, c.second_position)?;
            }
        }

        writeln!(out, "{RULE}")?;
        writeln!(out, "RECOMMENDATIONS\n")?;
        if self.collisions.is_empty() {
            writeln!(out, "The figure is safe to use.")?;
            writeln!(out, "All drones completed their paths without collisions.")?;
        } else {
            writeln!(out, "The figure is NOT safe to use.")?;
            writeln!(out, "Please modify the drone paths to avoid collisions.")?;
            writeln!(out, "Consider adjusting the paths of the following drones:")?;
            for c in &self.collisions {
                writeln!(
                    out,
                    "- Drones {} and {} (collided at time {:.2})",
                    c.first, c.second, c.time
                )?;
            }
        }
        Ok(())
    }
}

/// Where and how the report generator writes its output.
#[derive(Debug, Clone)]
pub struct ReportSettings {
    /// Figure file as given on the command line.
    pub figure_file: String,
    /// Text report destination.
    pub path: PathBuf,
    /// Optional JSON report destination.
    pub json_path: Option<PathBuf>,
    /// Collisions that stop the run.
    pub collision_cap: usize,
    /// Upper bound on one idle wait.
    pub poll_interval: Duration,
}

async fn write_file(path: &Path, contents: String) -> Result<(), ReportError> {
    tokio::fs::write(path, contents)
        .await
        .map_err(|source| ReportError::Io {
            path: path.to_path_buf(),
            source,
        })
}

/// Write `report` to the configured text path and, if set, the JSON path.
///
/// # Errors
///
/// Returns [`ReportError`] if a file cannot be written or the JSON
/// cannot be serialized.
pub async fn write_report(report: &SimulationReport, settings: &ReportSettings) -> Result<(), ReportError> {
    write_file(&settings.path, report.render_text()).await?;
    if let Some(json_path) = &settings.json_path {
        let json = serde_json::to_string_pretty(report)?;
        write_file(json_path, json).await?;
    }
    Ok(())
}

/// Take every collision logged since the last drain and raise an alert
/// for each. Returns how many were drained.
pub async fn drain_unprocessed(state: &SharedState) -> usize {
    let fresh = state.lock().await.collisions.take_unprocessed();
    for c in &fresh {
        warn!(
            step = c.step,
            first = %c.first,
            second = %c.second,
            distance = c.distance,
            time = c.time,
            "Collision alert"
        );
    }
    fresh.len()
}

/// Spawn the report generator for a run.
///
/// The task drains the collision log until the run is marked finished,
/// then performs one final drain and writes the report.
pub fn spawn_report_generator(
    state: Arc<SharedState>,
    settings: ReportSettings,
) -> JoinHandle<Result<SimulationReport, ReportError>> {
    tokio::spawn(async move {
        debug!(run = %state.run_id(), "Report generator started");
        loop {
            let notified = state.report_notify().notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            drain_unprocessed(&state).await;
            if state.lock().await.finished {
                break;
            }
            // Elapsed is the normal idle path.
            let _ = tokio::time::timeout(settings.poll_interval, notified).await;
        }

        drain_unprocessed(&state).await;
        let snapshot = state.snapshot().await;
        let report = SimulationReport::build(
            &snapshot,
            &settings.figure_file,
            settings.collision_cap,
            Utc::now(),
        );
        write_report(&report, &settings).await?;
        info!(
            run = %state.run_id(),
            path = %settings.path.display(),
            verdict = report.verdict.label(),
            "Simulation report written"
        );
        Ok(report)
    })
}
