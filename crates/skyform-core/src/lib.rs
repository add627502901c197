//! Lockstep simulation engine for Skyform drone figures.
//!
//! One task per drone advances through its script a line per step. The
//! step coordinator releases every active drone, waits for all of them at
//! a barrier, and hands the step to the collision monitor before the next
//! release. Drones that come too close are deactivated; the run stops on
//! the collision cap, an empty fleet, the step bound or an operator
//! interrupt, and a report is written at the end.
//!
//! # Modules
//!
//! - [`cancel`] -- Idempotent run-wide cancellation token.
//! - [`config`] -- Configuration loading from `skyform-config.yaml` into
//!   strongly-typed structs.
//! - [`coordinator`] -- The step state machine and barrier protocol.
//! - [`input`] -- Figure and script file parsing.
//! - [`lifecycle`] -- Deactivation, bulk shutdown and teardown.
//! - [`monitor`] -- Pairwise collision detection task.
//! - [`report`] -- Collision alerts and the final report.
//! - [`runner`] -- [`Simulation`], which owns one run end to end.
//! - [`state`] -- The shared state guarded by a single lock.
//! - [`worker`] -- Per-drone script execution.
//!
//! [`Simulation`]: runner::Simulation

pub mod cancel;
pub mod config;
pub mod coordinator;
pub mod input;
pub mod lifecycle;
pub mod monitor;
pub mod report;
pub mod runner;
pub mod state;
pub mod worker;
