//! Enumeration types shared across the simulator.

use serde::{Deserialize, Serialize};

/// How the three numbers of a script line move a drone.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MotionMode {
    /// The vector is added to the drone's current position.
    #[default]
    Delta,
    /// The vector replaces the drone's current position.
    Absolute,
}

/// Why a drone stopped participating before finishing its script.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeactivationReason {
    /// The drone was part of a pair closer than the safety threshold.
    Collision,
    /// The run hit its collision cap and every remaining drone was stopped.
    CollisionLimit,
    /// An operator interrupt cancelled the run.
    Interrupted,
    /// The drone's script could not be opened when its worker started.
    ScriptUnavailable,
}

/// Terminal (or current) status of a drone as shown in the report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentStatus {
    /// Finished its script (or outlasted the run) without incident.
    Completed,
    /// Deactivated for being in a collision.
    TerminatedCollision,
    /// Deactivated when the collision cap was reached.
    TerminatedCollisionLimit,
    /// Deactivated by an operator interrupt.
    TerminatedInterrupted,
    /// Never flew because its script could not be read.
    TerminatedScriptUnavailable,
    /// Still marked active when the snapshot was taken.
    Incomplete,
}

impl AgentStatus {
    /// Human-readable label used in the text report.
    pub const fn label(self) -> &'static str {
        match self {
            Self::Completed => "Completed Successfully",
            Self::TerminatedCollision => "Terminated (Collision)",
            Self::TerminatedCollisionLimit => "Terminated (Collision Limit)",
            Self::TerminatedInterrupted => "Terminated (Interrupted)",
            Self::TerminatedScriptUnavailable => "Terminated (Script Unavailable)",
            Self::Incomplete => "Incomplete",
        }
    }
}

impl From<DeactivationReason> for AgentStatus {
    fn from(reason: DeactivationReason) -> Self {
        match reason {
            DeactivationReason::Collision => Self::TerminatedCollision,
            DeactivationReason::CollisionLimit => Self::TerminatedCollisionLimit,
            DeactivationReason::Interrupted => Self::TerminatedInterrupted,
            DeactivationReason::ScriptUnavailable => Self::TerminatedScriptUnavailable,
        }
    }
}

impl core::fmt::Display for AgentStatus {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.label())
    }
}
