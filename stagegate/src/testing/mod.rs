//! Testing utilities for stage managers and task managers.
//!
//! This module provides:
//! - Recording stage handlers
//! - Assertions for lockstep ordering and conflicts
//! - A gate for holding tasks open, and test log setup

mod assertions;
mod fixtures;
mod mocks;

pub use assertions::{assert_collateral, assert_lockstep, assert_task_conflict};
pub use fixtures::{init_test_tracing, Gate, GateOpener};
pub use mocks::{Mark, StageEvent, StageRecorder};
