//! Testing utilities for stepflow runners and pipelines.
//!
//! This module provides:
//! - Mock steps (counting, failing, slow, recording, cancel-aware)
//! - Assertions for step handles and run results

mod assertions;
mod mocks;

pub use assertions::{
    assert_cancelled, assert_failed_steps, assert_step_failed, assert_step_not_run,
    assert_step_status, assert_step_succeeded,
};
pub use mocks::{
    CancelAwareStep, CountingStep, ExecutionLog, FailingStep, RecordingStep, SlowStep,
};
