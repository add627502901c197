//! Figure and script file parsing.
//!
//! Both formats are line-oriented and whitespace-separated:
//!
//! - figure file: `<script_path> <x> <y> <z>`, one line per drone
//! - script file: `<time> <v1> <v2> <v3>`, one line per step
//!
//! Malformed lines are skipped in both. A figure with no valid lines, or
//! a figure that names a script that cannot be read, is fatal.

use std::path::{Path, PathBuf};

use skyform_types::{AgentId, MotionRecord, Position};
use tracing::{debug, warn};

/// Errors raised while loading a figure and its scripts. All are fatal.
#[derive(Debug, thiserror::Error)]
pub enum InputError {
    /// The figure file could not be read.
    #[error("failed to read figure file {path}: {source}")]
    FigureUnreadable {
        /// Path that was attempted.
        path: PathBuf,
        /// The underlying I/O error.
        source: std::io::Error,
    },

    /// The figure file contained no valid drone lines.
    #[error("no drones found in figure file {path}")]
    NoAgents {
        /// The figure file.
        path: PathBuf,
    },

    /// A drone's script could not be read.
    #[error("failed to read script {path} for drone {agent}: {source}")]
    ScriptUnreadable {
        /// The drone whose script failed.
        agent: AgentId,
        /// Script path that was attempted.
        path: PathBuf,
        /// The underlying I/O error.
        source: std::io::Error,
    },
}

/// One valid line of a figure file.
#[derive(Debug, Clone, PartialEq)]
pub struct FigureEntry {
    /// Script path exactly as written in the figure file.
    pub script: String,
    /// Script path as opened. Relative paths follow the working directory.
    pub script_path: PathBuf,
    /// Starting position.
    pub start: Position,
}

/// Parse `<script_path> <x> <y> <z>`. Extra trailing fields are ignored.
pub fn parse_figure_line(line: &str) -> Option<(String, Position)> {
    let mut fields = line.split_whitespace();
    let script = fields.next()?;
    let x = parse_coordinate(fields.next()?)?;
    let y = parse_coordinate(fields.next()?)?;
    let z = parse_coordinate(fields.next()?)?;
    Some((script.to_owned(), Position::new(x, y, z)))
}

/// Parse `<time> <v1> <v2> <v3>`. Extra trailing fields are ignored.
pub fn parse_motion_line(line: &str) -> Option<MotionRecord> {
    let mut fields = line.split_whitespace();
    let time = parse_coordinate(fields.next()?)?;
    let x = parse_coordinate(fields.next()?)?;
    let y = parse_coordinate(fields.next()?)?;
    let z = parse_coordinate(fields.next()?)?;
    Some(MotionRecord {
        time,
        vector: Position::new(x, y, z),
    })
}

fn parse_coordinate(field: &str) -> Option<f64> {
    field.parse::<f64>().ok().filter(|v| v.is_finite())
}

/// Load every valid drone line from a figure file.
///
/// Script paths are taken as written; relative ones are opened from the
/// process working directory, not the figure's directory.
///
/// # Errors
///
/// Returns [`InputError::FigureUnreadable`] if the file cannot be read and
/// [`InputError::NoAgents`] if it holds no valid line.
pub fn load_figure(path: &Path) -> Result<Vec<FigureEntry>, InputError> {
    let contents =
        std::fs::read_to_string(path).map_err(|source| InputError::FigureUnreadable {
            path: path.to_path_buf(),
            source,
        })?;

    let mut entries = Vec::new();
    for (line_no, line) in contents.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        match parse_figure_line(line) {
            Some((script, start)) => {
                let script_path = PathBuf::from(&script);
                entries.push(FigureEntry {
                    script,
                    script_path,
                    start,
                });
            }
            None => {
                warn!(
                    figure = %path.display(),
                    line = line_no.saturating_add(1),
                    "Skipping malformed figure line"
                );
            }
        }
    }

    if entries.is_empty() {
        return Err(InputError::NoAgents {
            path: path.to_path_buf(),
        });
    }
    debug!(figure = %path.display(), drones = entries.len(), "Figure loaded");
    Ok(entries)
}

/// Count the well-formed motion lines in a script.
///
/// # Errors
///
/// Returns [`InputError::ScriptUnreadable`] if the file cannot be read.
pub fn count_script_steps(agent: AgentId, path: &Path) -> Result<u64, InputError> {
    let contents =
        std::fs::read_to_string(path).map_err(|source| InputError::ScriptUnreadable {
            agent,
            path: path.to_path_buf(),
            source,
        })?;
    let steps = contents
        .lines()
        .filter(|line| parse_motion_line(line).is_some())
        .count();
    Ok(u64::try_from(steps).unwrap_or(u64::MAX))
}
