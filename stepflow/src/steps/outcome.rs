//! The result a step body hands back to its runner.

use crate::errors::StepflowError;
use std::fmt;

/// What happened when a step body ran.
///
/// Steps never signal "stop the remaining queue" through an error; they
/// return [`StepOutcome::StopRemaining`] and the runner's loop inspects it.
#[derive(Debug)]
pub enum StepOutcome {
    /// The step finished its work.
    Completed,
    /// The step raised a business failure.
    Failed(anyhow::Error),
    /// Stop scheduling the remaining steps without reporting a failure.
    StopRemaining,
    /// The step observed cancellation and gave up.
    Cancelled,
}

impl StepOutcome {
    /// Creates a failed outcome from a message.
    #[must_use]
    pub fn fail<M>(message: M) -> Self
    where
        M: fmt::Display + fmt::Debug + Send + Sync + 'static,
    {
        Self::Failed(anyhow::Error::msg(message))
    }

    /// Maps a `Result` onto an outcome.
    ///
    /// A [`StepflowError::Cancelled`] error maps to [`StepOutcome::Cancelled`]
    /// so that step bodies can use `token.check()?` freely.
    pub fn from_result<E>(result: Result<(), E>) -> Self
    where
        E: Into<anyhow::Error>,
    {
        match result {
            Ok(()) => Self::Completed,
            Err(e) => {
                let error: anyhow::Error = e.into();
                if error
                    .downcast_ref::<StepflowError>()
                    .is_some_and(StepflowError::is_cancelled)
                {
                    Self::Cancelled
                } else {
                    Self::Failed(error)
                }
            }
        }
    }

    /// Returns true for [`StepOutcome::Completed`].
    #[must_use]
    pub const fn is_completed(&self) -> bool {
        matches!(self, Self::Completed)
    }

    /// Returns true for [`StepOutcome::Failed`].
    #[must_use]
    pub const fn is_failed(&self) -> bool {
        matches!(self, Self::Failed(_))
    }

    /// Returns true for [`StepOutcome::StopRemaining`].
    #[must_use]
    pub const fn is_stop(&self) -> bool {
        matches!(self, Self::StopRemaining)
    }

    /// Returns true for [`StepOutcome::Cancelled`].
    #[must_use]
    pub const fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

impl From<anyhow::Result<()>> for StepOutcome {
    fn from(result: anyhow::Result<()>) -> Self {
        Self::from_result(result)
    }
}
