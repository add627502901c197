//! End-to-end runs of the lockstep simulation.
//!
//! Each test writes a figure and its scripts to a fresh scratch directory,
//! runs a [`Simulation`] to completion and checks the final report.

#![allow(clippy::unwrap_used, clippy::missing_panics_doc)]

use std::fmt::Write as _;
use std::path::PathBuf;
use std::time::Duration;

use skyform_core::config::SimulationConfig;
use skyform_core::coordinator::SimulationEndReason;
use skyform_core::input::InputError;
use skyform_core::report::Verdict;
use skyform_core::runner::{Simulation, SimulationResult};
use skyform_types::{AgentId, AgentStatus, MotionMode};

const EPSILON: f64 = 1e-9;

/// Upper bound on any single run in these tests.
const RUN_TIMEOUT: Duration = Duration::from_secs(20);

struct Scratch {
    dir: PathBuf,
}

impl Scratch {
    fn new() -> Self {
        let dir = std::env::temp_dir().join(format!("skyform-it-{}", uuid::Uuid::now_v7()));
        std::fs::create_dir_all(&dir).unwrap();
        Self { dir }
    }

    /// Write a script of `steps` identical delta lines.
    fn script(&self, name: &str, steps: u32, delta: (f64, f64, f64)) {
        let mut body = String::new();
        for t in 1..=steps {
            writeln!(body, "{t} {} {} {}", delta.0, delta.1, delta.2).unwrap();
        }
        std::fs::write(self.dir.join(name), body).unwrap();
    }

    fn raw(&self, name: &str, contents: &str) -> PathBuf {
        let path = self.dir.join(name);
        std::fs::write(&path, contents).unwrap();
        path
    }

    /// Write a figure whose script names are placed inside the scratch
    /// directory. Blank lines are kept.
    fn figure(&self, contents: &str) -> PathBuf {
        let mut body = String::new();
        for line in contents.lines() {
            if line.trim().is_empty() {
                writeln!(body).unwrap();
            } else {
                writeln!(body, "{}", self.dir.join(line).display()).unwrap();
            }
        }
        self.raw("figure.txt", &body)
    }

    fn config(&self, max_collisions: usize) -> SimulationConfig {
        let mut config = SimulationConfig::default();
        config.simulation.max_collisions = max_collisions;
        config.monitor.poll_interval_ms = 10;
        config.report.path = self.dir.join("simulation_report.txt");
        config.report.json_path = Some(self.dir.join("simulation_report.json"));
        config
    }

    fn report_text(&self) -> String {
        std::fs::read_to_string(self.dir.join("simulation_report.txt")).unwrap()
    }
}

async fn run(figure: &std::path::Path, config: SimulationConfig) -> SimulationResult {
    let simulation = Simulation::prepare(figure, config).unwrap();
    tokio::time::timeout(RUN_TIMEOUT, simulation.run())
        .await
        .unwrap()
        .unwrap()
}

fn status_of(result: &SimulationResult, id: usize) -> AgentStatus {
    result
        .report
        .drones
        .iter()
        .find(|d| d.id == AgentId(id))
        .unwrap()
        .status
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn stationary_pair_collides_on_first_step() {
    let scratch = Scratch::new();
    scratch.script("a.txt", 3, (0.0, 0.0, 0.0));
    scratch.script("b.txt", 3, (0.0, 0.0, 0.0));
    let figure = scratch.figure("a.txt 0 0 0\nb.txt 0 0 0.5\n");

    let result = run(&figure, scratch.config(10)).await;

    assert_eq!(result.report.collisions.len(), 1);
    let record = result.report.collisions.first().unwrap();
    assert_eq!((record.first, record.second), (AgentId(0), AgentId(1)));
    assert_eq!(record.step, 1);
    assert!((record.distance - 0.5).abs() < EPSILON);

    assert_eq!(status_of(&result, 0), AgentStatus::TerminatedCollision);
    assert_eq!(status_of(&result, 1), AgentStatus::TerminatedCollision);
    assert_eq!(result.end_reason, SimulationEndReason::NoActiveAgents);
    assert_eq!(result.steps_executed, 1);
    assert_eq!(result.report.verdict, Verdict::FailedCollisions);

    let text = scratch.report_text();
    assert_eq!(text.matches("Status: Terminated (Collision)").count(), 2);
    assert!(text.contains("The figure is NOT safe to use."));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn divergent_paths_pass() {
    let scratch = Scratch::new();
    scratch.script("a.txt", 6, (-1.0, 0.0, 0.0));
    scratch.script("b.txt", 6, (1.0, 0.0, 0.0));
    scratch.script("c.txt", 4, (0.0, 1.0, 0.0));
    let figure = scratch.figure("a.txt 0 0 0\nb.txt 10 0 0\nnot a drone line\nc.txt 0 10 0\n");

    let result = run(&figure, scratch.config(10)).await;

    assert_eq!(result.report.drones.len(), 3);
    assert!(result.report.collisions.is_empty());
    assert_eq!(result.report.verdict, Verdict::Passed);
    assert_eq!(result.end_reason, SimulationEndReason::ScriptsExhausted);
    assert_eq!(result.steps_executed, 6);
    for drone in &result.report.drones {
        assert_eq!(drone.status, AgentStatus::Completed);
    }

    let c = result.report.drones.get(2).unwrap();
    assert_eq!(c.steps_completed, 4);
    assert!((c.final_position.y - 14.0).abs() < EPSILON);

    let text = scratch.report_text();
    assert!(text.contains("Simulation Result: PASSED"));
    assert_eq!(text.matches("Status: Completed Successfully").count(), 3);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn reaching_the_cap_stops_the_run() {
    let scratch = Scratch::new();
    scratch.script("a.txt", 5, (0.0, 0.0, 0.0));
    scratch.script("b.txt", 5, (0.0, 0.0, -2.0));
    scratch.script("c.txt", 5, (0.0, 0.0, 0.0));
    scratch.script("d.txt", 5, (0.0, 0.0, 0.0));
    let figure = scratch.figure("a.txt 0 0 0\nb.txt 0 0 4.5\nc.txt 50 0 0\nd.txt -50 0 0\n");

    let result = run(&figure, scratch.config(1)).await;

    assert_eq!(result.end_reason, SimulationEndReason::CollisionLimitExceeded);
    assert_eq!(result.steps_executed, 2);
    assert_eq!(result.report.collisions.len(), 1);
    let logged = result.report.collisions.first().unwrap();
    assert!(logged.involves(AgentId(0)) && logged.involves(AgentId(1)));
    assert!(!logged.involves(AgentId(2)));
    assert_eq!(result.report.verdict, Verdict::FailedLimitExceeded);
    assert_eq!(status_of(&result, 0), AgentStatus::TerminatedCollision);
    assert_eq!(status_of(&result, 1), AgentStatus::TerminatedCollision);
    assert_eq!(status_of(&result, 2), AgentStatus::TerminatedCollisionLimit);
    assert_eq!(status_of(&result, 3), AgentStatus::TerminatedCollisionLimit);

    assert!(scratch
        .report_text()
        .contains("Simulation Result: FAILED (Collision limit exceeded)"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn log_never_exceeds_capacity() {
    let scratch = Scratch::new();
    let mut figure = String::new();
    for name in ["a", "b", "c", "d"] {
        scratch.script(&format!("{name}.txt"), 3, (0.0, 0.0, 0.0));
        writeln!(figure, "{name}.txt 1 1 1").unwrap();
    }
    let figure = scratch.figure(&figure);

    let result = run(&figure, scratch.config(2)).await;

    assert_eq!(result.report.collisions.len(), 2);
    assert_eq!(result.report.violations_detected, 6);
    for id in 0..4 {
        assert_eq!(status_of(&result, id), AgentStatus::TerminatedCollision);
    }
    assert!(scratch.report_text().contains("(4 not logged"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn monitor_sees_positions_of_the_evaluated_step_only() {
    let scratch = Scratch::new();
    scratch.script("a.txt", 8, (1.0, 0.0, 0.0));
    scratch.script("b.txt", 8, (-1.0, 0.0, 0.0));
    scratch.script("c.txt", 8, (0.0, 0.0, 3.0));
    let figure = scratch.figure("a.txt 0 0 0\nb.txt 10 0 0\nc.txt 0 40 0\n");

    let result = run(&figure, scratch.config(10)).await;

    // a sits at x = k and b at x = 10 - k after step k; they meet at step 5.
    let record = result.report.collisions.first().unwrap();
    assert_eq!(record.step, 5);
    assert!((record.time - 5.0).abs() < EPSILON);
    assert!((record.first_position.x - 5.0).abs() < EPSILON);
    assert!((record.second_position.x - 5.0).abs() < EPSILON);
    assert!(record.distance.abs() < EPSILON);

    // Deactivated drones publish nothing after the collision step.
    let a = result.report.drones.first().unwrap();
    assert_eq!(a.steps_completed, 5);
    assert_eq!(status_of(&result, 2), AgentStatus::Completed);
    assert_eq!(result.report.drones.get(2).unwrap().steps_completed, 8);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn step_bound_stops_early_and_completes_survivors() {
    let scratch = Scratch::new();
    scratch.script("a.txt", 20, (1.0, 0.0, 0.0));
    scratch.script("b.txt", 20, (0.0, 1.0, 0.0));
    let figure = scratch.figure("a.txt 0 0 0\nb.txt 0 5 0\n");
    let mut config = scratch.config(10);
    config.simulation.max_steps = 3;

    let result = run(&figure, config).await;

    assert_eq!(result.end_reason, SimulationEndReason::StepLimitReached);
    assert_eq!(result.steps_executed, 3);
    for drone in &result.report.drones {
        assert_eq!(drone.steps_completed, 3);
        assert_eq!(drone.status, AgentStatus::Completed);
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn absolute_mode_moves_to_targets() {
    let scratch = Scratch::new();
    scratch.raw("a.txt", "1 5 5 5\n2 6 6 6\n");
    scratch.raw("b.txt", "1 0 0 0\n2 0 0 0\n");
    let figure = scratch.figure("a.txt 100 100 100\nb.txt 0 0 0\n");
    let mut config = scratch.config(10);
    config.simulation.motion_mode = MotionMode::Absolute;

    let result = run(&figure, config).await;

    let a = result.report.drones.first().unwrap();
    assert!((a.final_position.x - 6.0).abs() < EPSILON);
    assert_eq!(result.report.verdict, Verdict::Passed);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn malformed_script_lines_do_not_consume_steps() {
    let scratch = Scratch::new();
    scratch.raw("a.txt", "1 1 0 0\ngarbage\n2 1 0\n3 1 0 0\n");
    let figure = scratch.figure("a.txt 0 0 0\n");

    let result = run(&figure, scratch.config(10)).await;

    let a = result.report.drones.first().unwrap();
    assert_eq!(a.steps_completed, 2);
    assert!((a.final_position.x - 2.0).abs() < EPSILON);
    assert_eq!(result.steps_executed, 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn cancellation_stops_run_and_still_reports() {
    let scratch = Scratch::new();
    scratch.script("a.txt", 500, (1.0, 0.0, 0.0));
    scratch.script("b.txt", 500, (0.0, 1.0, 0.0));
    let figure = scratch.figure("a.txt 0 0 0\nb.txt 0 5 0\n");
    let mut config = scratch.config(10);
    config.simulation.step_interval_ms = 10;

    let simulation = Simulation::prepare(&figure, config).unwrap();
    let token = simulation.cancel_token();
    let handle = tokio::spawn(simulation.run());

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(token.cancel());
    assert!(!token.cancel());

    let result = tokio::time::timeout(RUN_TIMEOUT, handle)
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    assert_eq!(result.end_reason, SimulationEndReason::OperatorStop);
    assert!(result.steps_executed < 500);
    assert_eq!(result.worker_failures, 0);
    assert_eq!(result.workers_reaped, 2);
    assert_eq!(status_of(&result, 0), AgentStatus::TerminatedInterrupted);
    assert!(scratch.report_text().contains("End Reason: Stopped by operator"));
}

#[tokio::test]
async fn unreadable_script_is_fatal() {
    let scratch = Scratch::new();
    scratch.script("a.txt", 2, (0.0, 0.0, 0.0));
    let figure = scratch.figure("a.txt 0 0 0\nmissing.txt 1 1 1\n");

    let err = Simulation::prepare(&figure, scratch.config(10)).unwrap_err();
    assert!(matches!(
        err,
        InputError::ScriptUnreadable { agent: AgentId(1), .. }
    ));
    assert!(!scratch.dir.join("simulation_report.txt").exists());
}

#[tokio::test]
async fn figure_without_drones_is_fatal() {
    let scratch = Scratch::new();
    let figure = scratch.figure("\n# nothing here\n");

    let err = Simulation::prepare(&figure, scratch.config(10)).unwrap_err();
    assert!(matches!(err, InputError::NoAgents { .. }));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn json_report_mirrors_text_report() {
    let scratch = Scratch::new();
    scratch.script("a.txt", 2, (0.0, 0.0, 0.0));
    scratch.script("b.txt", 2, (0.0, 0.0, 0.0));
    let figure = scratch.figure("a.txt 0 0 0\nb.txt 0 0.2 0\n");

    let result = run(&figure, scratch.config(10)).await;

    let json: serde_json::Value = serde_json::from_str(
        &std::fs::read_to_string(scratch.dir.join("simulation_report.json")).unwrap(),
    )
    .unwrap();
    assert_eq!(json["run_id"], result.run_id.to_string());
    assert_eq!(json["verdict"], "failed_collisions");
    assert_eq!(json["drones"][0]["status"], "terminated_collision");
    assert_eq!(json["drones"][0]["collisions"], 1);
}

#[tokio::test]
async fn relative_scripts_are_not_looked_up_beside_the_figure() {
    let scratch = Scratch::new();
    let name = format!("skyform-beside-{}.txt", uuid::Uuid::now_v7());
    scratch.script(&name, 2, (0.0, 0.0, 0.0));
    let figure = scratch.raw("figure.txt", &format!("{name} 0 0 0\n"));

    let err = Simulation::prepare(&figure, scratch.config(10)).unwrap_err();
    match err {
        InputError::ScriptUnreadable { path, .. } => assert_eq!(path, PathBuf::from(&name)),
        other => panic!("unexpected error: {other}"),
    }
}

#[tokio::test]
async fn prepare_counts_drones_and_longest_script() {
    let scratch = Scratch::new();
    scratch.script("a.txt", 3, (1.0, 0.0, 0.0));
    scratch.raw("b.txt", "1 0 0 0\nbroken\n2 0 0 0\n3 0 0 0\n4 0 0 0\n");
    let figure = scratch.figure("a.txt 0 0 0\nb.txt 0 10 0\n");

    let simulation = Simulation::prepare(&figure, scratch.config(10)).unwrap();
    assert_eq!(simulation.drone_count(), 2);
    assert_eq!(simulation.longest_script(), 4);
}
