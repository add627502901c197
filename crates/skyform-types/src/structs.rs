//! Core data structs: positions, script records, collisions and snapshots.

use serde::{Deserialize, Serialize};

use crate::enums::{AgentStatus, DeactivationReason, MotionMode};
use crate::ids::AgentId;

/// A point (or displacement) in 3D space, in meters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Position {
    /// X coordinate.
    pub x: f64,
    /// Y coordinate.
    pub y: f64,
    /// Z coordinate.
    pub z: f64,
}

impl Position {
    /// Build a position from its three coordinates.
    pub const fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }

    /// Euclidean distance between two positions.
    pub fn distance_to(self, other: Self) -> f64 {
        let dx = self.x - other.x;
        let dy = self.y - other.y;
        let dz = self.z - other.z;
        dz.mul_add(dz, dx.mul_add(dx, dy * dy)).sqrt()
    }

    /// This position moved by `delta`.
    pub fn offset(self, delta: Self) -> Self {
        Self {
            x: self.x + delta.x,
            y: self.y + delta.y,
            z: self.z + delta.z,
        }
    }
}

impl core::fmt::Display for Position {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "({:.2}, {:.2}, {:.2})", self.x, self.y, self.z)
    }
}

/// One well-formed line of a drone script: `<time> <v1> <v2> <v3>`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MotionRecord {
    /// Time marker carried by the line, in seconds.
    pub time: f64,
    /// The three numbers following the time marker.
    pub vector: Position,
}

impl MotionRecord {
    /// Position reached by applying this record to `current`.
    pub fn apply(self, current: Position, mode: MotionMode) -> Position {
        match mode {
            MotionMode::Delta => current.offset(self.vector),
            MotionMode::Absolute => self.vector,
        }
    }
}

/// A proximity violation retained in the collision log.
///
/// Records are never modified after they are appended.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CollisionRecord {
    /// Lower-indexed drone of the pair.
    pub first: AgentId,
    /// Higher-indexed drone of the pair.
    pub second: AgentId,
    /// Simulation step during which the violation was detected.
    pub step: u64,
    /// Latest script time marker published by either drone.
    pub time: f64,
    /// Distance between the two drones, in meters.
    pub distance: f64,
    /// Position of `first` at detection.
    pub first_position: Position,
    /// Position of `second` at detection.
    pub second_position: Position,
}

impl CollisionRecord {
    /// Whether `agent` is one of the two drones in this record.
    pub fn involves(&self, agent: AgentId) -> bool {
        self.first == agent || self.second == agent
    }
}

/// Point-in-time copy of one drone's row in the shared agent table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentSnapshot {
    /// The drone.
    pub id: AgentId,
    /// Script path as given in the figure file.
    pub script: String,
    /// Last published position.
    pub position: Position,
    /// Time marker of the last applied script line.
    pub time: f64,
    /// Number of script lines applied so far.
    pub steps_completed: u64,
    /// Still participating in the simulation.
    pub active: bool,
    /// Finished without incident.
    pub completed: bool,
    /// Why the drone was deactivated, if it was.
    pub reason: Option<DeactivationReason>,
}

impl AgentSnapshot {
    /// Status derived from the flags and deactivation reason.
    pub fn status(&self) -> AgentStatus {
        if self.completed {
            AgentStatus::Completed
        } else if self.active {
            AgentStatus::Incomplete
        } else {
            self.reason
                .map_or(AgentStatus::Incomplete, AgentStatus::from)
        }
    }
}
