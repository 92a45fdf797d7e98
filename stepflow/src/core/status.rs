//! Lifecycle enums for steps, runners and pipelines.

use serde::{Deserialize, Serialize};
use std::fmt;

/// The execution status of a single step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    /// Step has not been picked up yet.
    #[default]
    Pending,
    /// Step body is executing.
    Running,
    /// Step completed successfully.
    Succeeded,
    /// Step raised a business failure.
    Failed,
    /// Step asked its runner to stop scheduling the remaining steps.
    Stopped,
    /// Step observed cancellation.
    Cancelled,
}

impl fmt::Display for StepStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Running => write!(f, "running"),
            Self::Succeeded => write!(f, "succeeded"),
            Self::Failed => write!(f, "failed"),
            Self::Stopped => write!(f, "stopped"),
            Self::Cancelled => write!(f, "cancelled"),
        }
    }
}

impl StepStatus {
    /// Returns true if the status represents a terminal state.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Succeeded | Self::Failed | Self::Stopped | Self::Cancelled
        )
    }

    /// Returns true if the step body actually ran.
    #[must_use]
    pub const fn was_executed(&self) -> bool {
        !matches!(self, Self::Pending)
    }
}

/// The run state of a runner. Runners are single-use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    /// Steps may still be added.
    #[default]
    NotStarted,
    /// Workers are executing steps.
    Running,
    /// Every worker has exited.
    Completed,
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotStarted => write!(f, "not_started"),
            Self::Running => write!(f, "running"),
            Self::Completed => write!(f, "completed"),
        }
    }
}

/// The lifecycle state of a pipeline.
///
/// `Unprepared -> Preparing -> {PreparedOk, PreparedFailed}`, then from
/// `PreparedOk`: `Running -> {Completed, Faulted, Canceled}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineState {
    /// `prepare` has not been called.
    #[default]
    Unprepared,
    /// The build callback is running.
    Preparing,
    /// Steps were registered successfully.
    PreparedOk,
    /// Preparation reported failure; `run` is a no-op.
    PreparedFailed,
    /// The runner is executing.
    Running,
    /// Every step succeeded.
    Completed,
    /// At least one step failed.
    Faulted,
    /// The run was cancelled.
    Canceled,
}

impl PipelineState {
    /// Returns true once the pipeline can no longer run.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::PreparedFailed | Self::Completed | Self::Faulted | Self::Canceled
        )
    }
}

impl fmt::Display for PipelineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unprepared => write!(f, "unprepared"),
            Self::Preparing => write!(f, "preparing"),
            Self::PreparedOk => write!(f, "prepared_ok"),
            Self::PreparedFailed => write!(f, "prepared_failed"),
            Self::Running => write!(f, "running"),
            Self::Completed => write!(f, "completed"),
            Self::Faulted => write!(f, "faulted"),
            Self::Canceled => write!(f, "canceled"),
        }
    }
}
