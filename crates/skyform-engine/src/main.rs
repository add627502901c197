//! Skyform engine binary.
//!
//! Runs one drone figure through the lockstep simulation and writes the
//! report.
//!
//! ```text
//! skyform-engine <figure_file>
//! ```
//!
//! # Startup Sequence
//!
//! 1. Initialize structured logging (tracing)
//! 2. Parse the command line
//! 3. Load configuration from `skyform-config.yaml` (optional)
//! 4. Load the figure and check every script
//! 5. Install the interrupt handler
//! 6. Run the simulation and log the result
//!
//! Exits 0 when the run completes, including runs stopped by the
//! collision cap or an interrupt, and 1 on invalid invocation or any
//! fatal error.

mod error;

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use skyform_core::cancel::CancelToken;
use skyform_core::config::SimulationConfig;
use skyform_core::runner::{self, Simulation};
use tokio::task::JoinHandle;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use crate::error::EngineError;

const CONFIG_PATH: &str = "skyform-config.yaml";

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(true)
        .init();

    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "skyform-engine failed");
            ExitCode::FAILURE
        }
    }
}

async fn run() -> Result<(), EngineError> {
    let figure = parse_args(std::env::args())?;
    info!(figure = %figure.display(), "skyform-engine starting");

    let config = SimulationConfig::load_or_default(Path::new(CONFIG_PATH))?;
    info!(
        max_steps = config.simulation.max_steps,
        max_collisions = config.simulation.max_collisions,
        collision_threshold = config.simulation.collision_threshold,
        motion_mode = ?config.simulation.motion_mode,
        report = %config.report.path.display(),
        "Configuration loaded"
    );

    let simulation = Simulation::prepare(&figure, config)?;
    info!(
        run = %simulation.run_id(),
        drones = simulation.drone_count(),
        longest_script = simulation.longest_script(),
        "Simulation prepared"
    );
    let interrupt = spawn_interrupt_handler(simulation.cancel_token());

    let result = simulation.run().await;
    interrupt.abort();
    let result = result?;

    runner::log_simulation_end(&result);
    Ok(())
}

fn parse_args(mut args: impl Iterator<Item = String>) -> Result<PathBuf, EngineError> {
    let program = args.next().unwrap_or_else(|| "skyform-engine".to_owned());
    match (args.next(), args.next()) {
        (Some(figure), None) => Ok(PathBuf::from(figure)),
        _ => Err(EngineError::Usage { program }),
    }
}

/// Cancel the run on the first interrupt. The task does nothing else.
fn spawn_interrupt_handler(token: Arc<CancelToken>) -> JoinHandle<()> {
    tokio::spawn(async move {
        if wait_for_interrupt().await {
            token.cancel();
        }
    })
}

#[cfg(unix)]
async fn wait_for_interrupt() -> bool {
    use tokio::signal::unix::{SignalKind, signal};

    let Ok(mut terminate) = signal(SignalKind::terminate()) else {
        return tokio::signal::ctrl_c().await.is_ok();
    };
    tokio::select! {
        result = tokio::signal::ctrl_c() => result.is_ok(),
        received = terminate.recv() => received.is_some(),
    }
}

#[cfg(not(unix))]
async fn wait_for_interrupt() -> bool {
    tokio::signal::ctrl_c().await.is_ok()
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn args(list: &'static [&'static str]) -> impl Iterator<Item = String> {
        list.iter().map(|s| (*s).to_owned())
    }

    #[test]
    fn single_argument_is_the_figure() {
        let figure = parse_args(args(&["skyform-engine", "figure.txt"])).unwrap();
        assert_eq!(figure, PathBuf::from("figure.txt"));
    }

    #[test]
    fn wrong_arity_is_a_usage_error() {
        assert!(matches!(
            parse_args(args(&["skyform-engine"])),
            Err(EngineError::Usage { .. })
        ));
        assert!(matches!(
            parse_args(args(&["skyform-engine", "a", "b"])),
            Err(EngineError::Usage { .. })
        ));
    }
}
