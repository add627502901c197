//! Shared type definitions for the Skyform drone figure simulator.
//!
//! This crate holds the plain data that flows between the simulation
//! engine, the collision monitor and the report writer. Nothing here
//! knows about threads, tasks or locks.
//!
//! # Modules
//!
//! - [`ids`] -- Identifier types for agents and simulation runs
//! - [`enums`] -- Motion semantics, deactivation reasons and agent statuses
//! - [`structs`] -- Positions, motion records, collision records and snapshots

pub mod enums;
pub mod ids;
pub mod structs;

// Re-export all public types at crate root for convenience.
pub use enums::{AgentStatus, DeactivationReason, MotionMode};
pub use ids::{AgentId, RunId};
pub use structs::{AgentSnapshot, CollisionRecord, MotionRecord, Position};
