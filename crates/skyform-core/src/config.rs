//! Configuration loading and typed config structures for Skyform.
//!
//! The optional configuration file is `skyform-config.yaml` in the working
//! directory. Every field has a default, so an absent file, an empty file
//! or a partial file all produce a usable [`SimulationConfig`].

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use skyform_types::MotionMode;

/// Errors that can occur when loading configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to read the configuration file from disk.
    #[error("failed to read config file: {source}")]
    Io {
        /// The underlying I/O error.
        #[from]
        source: std::io::Error,
    },

    /// Failed to parse YAML content.
    #[error("failed to parse config YAML: {source}")]
    Yaml {
        /// The underlying YAML parse error.
        source: serde_yml::Error,
    },

    /// A value parsed but is outside its allowed range.
    #[error("invalid config value for {field}: {reason}")]
    Invalid {
        /// Dotted path of the offending field.
        field: &'static str,
        /// What is wrong with it.
        reason: String,
    },
}

impl From<serde_yml::Error> for ConfigError {
    fn from(source: serde_yml::Error) -> Self {
        Self::Yaml { source }
    }
}

/// Top-level simulator configuration.
///
/// Mirrors the structure of `skyform-config.yaml`.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct SimulationConfig {
    /// Step bounds, collision rules and motion semantics.
    #[serde(default)]
    pub simulation: SimulationBoundsConfig,

    /// Wait-with-timeout settings for the monitor tasks.
    #[serde(default)]
    pub monitor: MonitorConfig,

    /// Where the final report is written.
    #[serde(default)]
    pub report: ReportConfig,
}

impl SimulationConfig {
    /// Load configuration from a YAML file, then apply environment
    /// overrides and validate.
    ///
    /// Environment variables override YAML values:
    /// - `SKYFORM_REPORT_PATH` overrides `report.path`
    /// - `SKYFORM_MAX_STEPS` overrides `simulation.max_steps`
    /// - `SKYFORM_MAX_COLLISIONS` overrides `simulation.max_collisions`
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Io`] if the file cannot be read,
    /// [`ConfigError::Yaml`] if the content is not valid YAML, or
    /// [`ConfigError::Invalid`] if a value is out of range.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        let mut config = Self::parse(&contents)?;
        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    /// Load `path` if it exists, otherwise start from defaults. Environment
    /// overrides and validation apply either way.
    ///
    /// # Errors
    ///
    /// Same as [`from_file`](Self::from_file).
    pub fn load_or_default(path: &Path) -> Result<Self, ConfigError> {
        if path.exists() {
            return Self::from_file(path);
        }
        let mut config = Self::default();
        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    /// Parse configuration from a YAML string. No environment overrides
    /// are applied.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Yaml`] if the string is not valid YAML.
    pub fn parse(yaml: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_yml::from_str(yaml)?;
        Ok(config)
    }

    /// Apply `SKYFORM_*` environment variable overrides.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] if a numeric override does not parse.
    pub fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        if let Ok(val) = std::env::var("SKYFORM_REPORT_PATH") {
            self.report.path = PathBuf::from(val);
        }
        if let Ok(val) = std::env::var("SKYFORM_MAX_STEPS") {
            self.simulation.max_steps = val.parse().map_err(|e| ConfigError::Invalid {
                field: "simulation.max_steps",
                reason: format!("SKYFORM_MAX_STEPS={val}: {e}"),
            })?;
        }
        if let Ok(val) = std::env::var("SKYFORM_MAX_COLLISIONS") {
            self.simulation.max_collisions = val.parse().map_err(|e| ConfigError::Invalid {
                field: "simulation.max_collisions",
                reason: format!("SKYFORM_MAX_COLLISIONS={val}: {e}"),
            })?;
        }
        Ok(())
    }

    /// Reject values the engine cannot run with.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] naming the first bad field.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.simulation.max_steps == 0 {
            return Err(ConfigError::Invalid {
                field: "simulation.max_steps",
                reason: "must be at least 1".to_owned(),
            });
        }
        if self.simulation.max_collisions == 0 {
            return Err(ConfigError::Invalid {
                field: "simulation.max_collisions",
                reason: "must be at least 1".to_owned(),
            });
        }
        let threshold = self.simulation.collision_threshold;
        if !threshold.is_finite() || threshold <= 0.0 {
            return Err(ConfigError::Invalid {
                field: "simulation.collision_threshold",
                reason: format!("must be a positive finite distance, got {threshold}"),
            });
        }
        if self.monitor.poll_interval_ms == 0 {
            return Err(ConfigError::Invalid {
                field: "monitor.poll_interval_ms",
                reason: "must be at least 1".to_owned(),
            });
        }
        Ok(())
    }
}

/// Step bounds and collision rules.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct SimulationBoundsConfig {
    /// Hard upper bound on the number of steps in a run.
    #[serde(default = "default_max_steps")]
    pub max_steps: u64,

    /// Collision cap. Reaching it stops the run; it is also the
    /// capacity of the collision log.
    #[serde(default = "default_max_collisions")]
    pub max_collisions: usize,

    /// Two active drones closer than this many meters collide.
    #[serde(default = "default_collision_threshold")]
    pub collision_threshold: f64,

    /// How script vectors move a drone.
    #[serde(default)]
    pub motion_mode: MotionMode,

    /// Real-time pause between steps, in milliseconds (0 = none).
    #[serde(default)]
    pub step_interval_ms: u64,
}

impl SimulationBoundsConfig {
    /// Pause between steps as a [`Duration`].
    pub const fn step_interval(&self) -> Duration {
        Duration::from_millis(self.step_interval_ms)
    }
}

impl Default for SimulationBoundsConfig {
    fn default() -> Self {
        Self {
            max_steps: default_max_steps(),
            max_collisions: default_max_collisions(),
            collision_threshold: default_collision_threshold(),
            motion_mode: MotionMode::default(),
            step_interval_ms: 0,
        }
    }
}

/// Monitor task settings.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct MonitorConfig {
    /// Upper bound on how long the collision monitor and report
    /// generator sleep before re-checking for cancellation.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
}

impl MonitorConfig {
    /// Poll interval as a [`Duration`].
    pub const fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval_ms(),
        }
    }
}

/// Report output settings.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ReportConfig {
    /// Path of the human-readable report.
    #[serde(default = "default_report_path")]
    pub path: PathBuf,

    /// Optional path for a JSON copy of the report.
    #[serde(default)]
    pub json_path: Option<PathBuf>,
}

impl Default for ReportConfig {
    fn default() -> Self {
        Self {
            path: default_report_path(),
            json_path: None,
        }
    }
}

// ---------------------------------------------------------------------------
// Default value functions (serde default requires named functions)
// ---------------------------------------------------------------------------

const fn default_max_steps() -> u64 {
    1000
}

const fn default_max_collisions() -> usize {
    10
}

const fn default_collision_threshold() -> f64 {
    1.0
}

const fn default_poll_interval_ms() -> u64 {
    50
}

fn default_report_path() -> PathBuf {
    PathBuf::from("simulation_report.txt")
}
