//! Runs steps one at a time on the caller's task.

use super::{ErrorDecision, ErrorObservers, Runner, StepErrorEvent};
use crate::cancellation::CancellationToken;
use crate::core::{AtomicState, RunState};
use crate::errors::{AggregateFailure, StepFailure, StepflowError};
use crate::steps::{Executed, Step, StepHandle};
use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Executes steps strictly in the order they were added.
///
/// With fail-fast (the default) the first failure stops the remaining
/// steps; otherwise every step is attempted unless an error observer asks
/// for cancellation. A step returning `StopRemaining` ends the run quietly.
#[derive(Debug)]
pub struct SequentialRunner {
    fail_fast: bool,
    steps: RwLock<Vec<StepHandle>>,
    executed: Mutex<Vec<StepHandle>>,
    observers: Arc<ErrorObservers>,
    state: AtomicState<RunState>,
}

impl SequentialRunner {
    /// Creates a fail-fast sequential runner.
    #[must_use]
    pub fn new() -> Self {
        Self {
            fail_fast: true,
            steps: RwLock::new(Vec::new()),
            executed: Mutex::new(Vec::new()),
            observers: Arc::new(ErrorObservers::new()),
            state: AtomicState::new(RunState::NotStarted),
        }
    }

    /// Sets the fail-fast policy.
    #[must_use]
    pub fn with_fail_fast(mut self, fail_fast: bool) -> Self {
        self.fail_fast = fail_fast;
        self
    }

    /// Returns the fail-fast policy.
    #[must_use]
    pub const fn fail_fast(&self) -> bool {
        self.fail_fast
    }

    async fn run_steps(
        &self,
        steps: &[StepHandle],
        token: &CancellationToken,
        failures: &mut Vec<StepFailure>,
    ) -> Result<(), StepflowError> {
        for (index, step) in steps.iter().enumerate() {
            if token.is_cancelled() {
                warn!(
                    remaining = steps.len() - index,
                    reason = ?token.reason(),
                    "Sequential run cancelled"
                );
                return token.check();
            }

            self.executed.lock().push(step.clone());

            match step.execute(token).await {
                Executed::Completed => {}
                Executed::Failed(failure) => {
                    let event = StepErrorEvent::new(failure.error.clone(), Some(step.clone()));
                    failures.push(failure);

                    let decision = self.observers.dispatch(&event);
                    if self.fail_fast || decision == ErrorDecision::Cancel {
                        info!(
                            step = %step.name(),
                            skipped = steps.len() - index - 1,
                            fail_fast = self.fail_fast,
                            "Stopping sequential run after failure"
                        );
                        break;
                    }
                }
                Executed::Stopped => {
                    debug!(
                        step = %step.name(),
                        skipped = steps.len() - index - 1,
                        "Step stopped the remaining sequence"
                    );
                    break;
                }
                Executed::Cancelled => {
                    return Err(StepflowError::Cancelled(
                        token
                            .reason()
                            .unwrap_or_else(|| format!("step '{}' cancelled", step.name())),
                    ));
                }
            }
        }
        Ok(())
    }
}

impl Default for SequentialRunner {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Runner for SequentialRunner {
    fn strategy(&self) -> &'static str {
        "sequential"
    }

    fn add_step(&self, step: Arc<dyn Step>) -> Result<StepHandle, StepflowError> {
        let mut steps = self.steps.write();
        let state = self.state.load();
        if state != RunState::NotStarted {
            return Err(StepflowError::InvalidState(format!(
                "cannot add step '{}' to a sequential runner that is {state}",
                step.name()
            )));
        }

        let handle = StepHandle::new(step);
        steps.push(handle.clone());
        Ok(handle)
    }

    async fn run(&self, token: &CancellationToken) -> Result<(), StepflowError> {
        token.check()?;

        let steps = {
            let steps = self.steps.write();
            self.state
                .transition(RunState::NotStarted, RunState::Running)
                .map_err(|actual| {
                    StepflowError::InvalidState(format!("sequential runner is already {actual}"))
                })?;
            steps.clone()
        };

        info!(strategy = "sequential", steps = steps.len(), "Runner started");

        let mut failures = Vec::new();
        let result = self.run_steps(&steps, token, &mut failures).await;
        self.state.store(RunState::Completed);
        result?;

        if failures.is_empty() {
            info!(strategy = "sequential", "Runner completed");
            Ok(())
        } else {
            Err(StepflowError::StepsFailed(AggregateFailure::new(failures)))
        }
    }

    fn observers(&self) -> &Arc<ErrorObservers> {
        &self.observers
    }

    fn steps(&self) -> Vec<StepHandle> {
        self.steps.read().clone()
    }

    fn executed_steps(&self) -> Vec<StepHandle> {
        self.executed.lock().clone()
    }

    fn state(&self) -> RunState {
        self.state.load()
    }

    fn release(&self) {
        if self.state.load() == RunState::Running {
            return;
        }
        self.steps.write().clear();
        self.executed.lock().clear();
    }
}
