//! Test assertions for step handles and run results.

use crate::core::StepStatus;
use crate::errors::StepflowError;
use crate::steps::StepHandle;

/// Asserts that the step ran and succeeded.
pub fn assert_step_succeeded(step: &StepHandle) {
    assert_eq!(
        step.status(),
        StepStatus::Succeeded,
        "Expected step '{}' to succeed, error: {:?}",
        step.name(),
        step.error()
    );
}

/// Asserts that the step recorded a business failure.
pub fn assert_step_failed(step: &StepHandle) {
    assert!(
        step.is_failed(),
        "Expected step '{}' to fail, got status: {:?}",
        step.name(),
        step.status()
    );
}

/// Asserts that the step never started.
pub fn assert_step_not_run(step: &StepHandle) {
    assert_eq!(
        step.status(),
        StepStatus::Pending,
        "Expected step '{}' not to run",
        step.name()
    );
}

/// Asserts that the step has the expected status.
pub fn assert_step_status(step: &StepHandle, expected: StepStatus) {
    assert_eq!(
        step.status(),
        expected,
        "Expected status {:?} for step '{}', got {:?}",
        expected,
        step.name(),
        step.status()
    );
}

/// Asserts that the result is a cancellation.
pub fn assert_cancelled(result: &Result<(), StepflowError>) {
    assert!(
        matches!(result, Err(e) if e.is_cancelled()),
        "Expected cancellation, got {result:?}"
    );
}

/// Asserts that the error aggregates failures of exactly `expected`, in any
/// order.
pub fn assert_failed_steps(error: &StepflowError, expected: &[&str]) {
    let Some(aggregate) = error.aggregate() else {
        panic!("Expected an aggregate failure, got {error:?}");
    };

    let mut actual = aggregate.step_names();
    actual.sort_unstable();
    let mut expected = expected.to_vec();
    expected.sort_unstable();
    assert_eq!(actual, expected, "Unexpected failed steps");
}
