//! Drone worker: one task per drone executing its script one line per step.
//!
//! A worker suspends only on its own control channel (or the run-wide
//! cancellation token). Each release makes it read the next well-formed
//! script line, apply it, publish the result and report at the barrier.
//! The script file is read without holding the state lock.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use skyform_types::{AgentId, DeactivationReason, MotionMode, MotionRecord, Position};
use tokio::fs::File;
use tokio::io::{AsyncBufReadExt, BufReader, Lines};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::input::parse_motion_line;
use crate::state::{SharedState, WorkerControl, WorkerSignal};

/// How a worker task ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerExit {
    /// Ran out of script lines and marked itself completed.
    Completed,
    /// Was released after being deactivated or after the run stopped.
    Deactivated,
    /// Received a termination request or its control channel closed.
    Terminated,
    /// Observed run-wide cancellation while waiting.
    Cancelled,
    /// The script could not be opened or read.
    ScriptUnavailable,
}

/// Sequential reader over a drone script that yields only well-formed lines.
#[derive(Debug)]
pub struct ScriptCursor {
    path: PathBuf,
    lines: Lines<BufReader<File>>,
    line_number: u64,
}

impl ScriptCursor {
    /// Open the script at `path`.
    ///
    /// # Errors
    ///
    /// Returns the I/O error if the file cannot be opened.
    pub async fn open(path: &Path) -> std::io::Result<Self> {
        let file = File::open(path).await?;
        Ok(Self {
            path: path.to_path_buf(),
            lines: BufReader::new(file).lines(),
            line_number: 0,
        })
    }

    /// Read up to the next well-formed motion line.
    ///
    /// Malformed lines are skipped and do not count as a step. Returns
    /// `Ok(None)` at end of file.
    ///
    /// # Errors
    ///
    /// Returns the I/O error if reading fails.
    pub async fn next_record(&mut self) -> std::io::Result<Option<MotionRecord>> {
        while let Some(line) = self.lines.next_line().await? {
            self.line_number = self.line_number.saturating_add(1);
            if let Some(record) = parse_motion_line(&line) {
                return Ok(Some(record));
            }
            if !line.trim().is_empty() {
                debug!(
                    script = %self.path.display(),
                    line = self.line_number,
                    "Skipping malformed script line"
                );
            }
        }
        Ok(None)
    }
}

/// One drone's execution context.
#[derive(Debug)]
pub struct Worker {
    id: AgentId,
    script_path: PathBuf,
    position: Position,
    steps_completed: u64,
    mode: MotionMode,
    state: Arc<SharedState>,
    signals: mpsc::UnboundedReceiver<WorkerSignal>,
}

/// Spawn the worker for drone `id` and return its control handle and task.
///
/// The caller attaches the control handle to the shared state so the
/// coordinator can release the drone and the lifecycle manager can
/// terminate it.
pub fn spawn_worker(
    id: AgentId,
    script_path: PathBuf,
    start: Position,
    mode: MotionMode,
    state: Arc<SharedState>,
) -> (WorkerControl, JoinHandle<WorkerExit>) {
    let (control, signals) = mpsc::unbounded_channel();
    let worker = Worker {
        id,
        script_path,
        position: start,
        steps_completed: 0,
        mode,
        state,
        signals,
    };
    (control, tokio::spawn(worker.run()))
}

impl Worker {
    /// Run until the script ends, the drone is deactivated or the run is
    /// cancelled.
    ///
    /// The initial position is published and the ready barrier signalled
    /// before the first release is awaited.
    pub async fn run(mut self) -> WorkerExit {
        let mut cursor = match ScriptCursor::open(&self.script_path).await {
            Ok(cursor) => cursor,
            Err(e) => {
                warn!(
                    agent = %self.id,
                    script = %self.script_path.display(),
                    error = %e,
                    "Script unavailable, drone grounded"
                );
                self.state
                    .deactivate(self.id, DeactivationReason::ScriptUnavailable)
                    .await;
                self.state.arrive().await;
                return WorkerExit::ScriptUnavailable;
            }
        };

        self.state
            .record_position(self.id, self.position, 0.0, 0)
            .await;
        self.state.arrive().await;
        debug!(agent = %self.id, position = %self.position, "Drone ready");

        let exit = self.step_loop(&mut cursor).await;
        info!(
            agent = %self.id,
            steps = self.steps_completed,
            exit = ?exit,
            "Drone worker exiting"
        );
        exit
    }

    async fn step_loop(&mut self, cursor: &mut ScriptCursor) -> WorkerExit {
        let cancel = Arc::clone(self.state.cancel_token());
        loop {
            let signal = tokio::select! {
                biased;
                () = cancel.cancelled() => return WorkerExit::Cancelled,
                signal = self.signals.recv() => signal,
            };

            let step = match signal {
                Some(WorkerSignal::Release { step }) => step,
                Some(WorkerSignal::Terminate) | None => return WorkerExit::Terminated,
            };

            if let Some(exit) = self.execute_step(step, cursor).await {
                return exit;
            }
        }
    }

    /// Execute one released step. Returns `Some` when the worker is done.
    ///
    /// Every path signals the barrier exactly once.
    async fn execute_step(&mut self, step: u64, cursor: &mut ScriptCursor) -> Option<WorkerExit> {
        let proceed = {
            let inner = self.state.lock().await;
            inner.running && inner.agent(self.id).is_some_and(|a| a.active)
        };
        if !proceed {
            self.state.arrive().await;
            return Some(WorkerExit::Deactivated);
        }

        let outcome = match cursor.next_record().await {
            Ok(Some(record)) => {
                self.position = record.apply(self.position, self.mode);
                self.steps_completed = self.steps_completed.saturating_add(1);
                let published = self
                    .state
                    .record_position(self.id, self.position, record.time, self.steps_completed)
                    .await;
                debug!(
                    agent = %self.id,
                    step,
                    position = %self.position,
                    published,
                    "Drone moved"
                );
                None
            }
            Ok(None) => {
                self.state.mark_completed(self.id).await;
                info!(agent = %self.id, step, "Drone finished its script");
                Some(WorkerExit::Completed)
            }
            Err(e) => {
                warn!(agent = %self.id, step, error = %e, "Script read failed");
                self.state
                    .deactivate(self.id, DeactivationReason::ScriptUnavailable)
                    .await;
                Some(WorkerExit::ScriptUnavailable)
            }
        };
        self.state.arrive().await;
        outcome
    }
}
