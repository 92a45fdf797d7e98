//! Bridges a background runner into a sequential phase.

use super::{Step, StepOutcome};
use crate::cancellation::CancellationToken;
use crate::errors::StepflowError;
use crate::runner::Joinable;
use async_trait::async_trait;
use std::fmt;
use std::time::Duration;
use tracing::debug;

/// A step that completes when a started runner finishes.
///
/// If the joined runner fails or cancels itself, the wait step returns
/// [`StepOutcome::StopRemaining`] so the enclosing sequence stops without a
/// failure of its own; the joined runner's failures stay on its own step
/// handles. A timeout, when configured, is a failure of the wait step, and so
/// is joining a runner that cannot be joined (never started, or broken
/// internally).
pub struct WaitStep<J> {
    name: String,
    target: J,
    timeout: Option<Duration>,
}

impl<J: Joinable> WaitStep<J> {
    /// Creates a wait step joining `target`.
    pub fn new(name: impl Into<String>, target: J) -> Self {
        Self {
            name: name.into(),
            target,
            timeout: None,
        }
    }

    /// Fails the step when `target` is not done after `timeout`.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Returns the joined runner.
    pub fn target(&self) -> &J {
        &self.target
    }

    async fn join(&self) -> Result<(), StepflowError> {
        match self.timeout {
            Some(timeout) => self.target.wait_timeout(timeout).await,
            None => self.target.wait().await,
        }
    }
}

impl<J> fmt::Debug for WaitStep<J> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WaitStep")
            .field("name", &self.name)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl<J: Joinable> Step for WaitStep<J> {
    fn name(&self) -> &str {
        &self.name
    }

    async fn run(&self, token: &CancellationToken) -> StepOutcome {
        let result = tokio::select! {
            result = self.join() => result,
            () = token.cancelled() => return StepOutcome::Cancelled,
        };

        match result {
            Ok(()) => StepOutcome::Completed,
            Err(StepflowError::Cancelled(_)) if token.is_cancelled() => StepOutcome::Cancelled,
            Err(
                e @ (StepflowError::StepsFailed(_)
                | StepflowError::PipelineFailed(_)
                | StepflowError::Cancelled(_)),
            ) => {
                debug!(step = %self.name, error = %e, "Joined runner failed, stopping remaining steps");
                StepOutcome::StopRemaining
            }
            Err(e) => StepOutcome::Failed(e.into()),
        }
    }
}
