//! Error types for the stepflow framework.
//!
//! The taxonomy separates four kinds of outcome:
//!
//! - **Cancellation** ([`StepflowError::Cancelled`]) is cooperative and never
//!   recorded as a step failure.
//! - **Stop requests** (`StepOutcome::StopRemaining`) are not errors at all and
//!   have no variant here.
//! - **Infrastructure failures** ([`StepflowError::InvalidConfiguration`],
//!   [`StepflowError::InvalidState`]) are raised immediately at construction
//!   or entry.
//! - **Business failures** are captured per step as [`StepFailure`] and
//!   surfaced in bulk through [`AggregateFailure`].

use crate::steps::StepId;
use chrono::{DateTime, Utc};
use serde_json::json;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// The main error type for stepflow operations.
#[derive(Debug, Clone, Error)]
pub enum StepflowError {
    /// Execution was cancelled through a cancellation token.
    #[error("Operation cancelled: {0}")]
    Cancelled(String),

    /// A wait exceeded its deadline. Distinct from cancellation.
    #[error("Timed out after {0:?}")]
    Timeout(Duration),

    /// The operation is not valid in the current lifecycle state.
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// A runner or pipeline was misconfigured.
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// One or more steps failed inside a runner.
    #[error("{0}")]
    StepsFailed(AggregateFailure),

    /// One or more steps failed inside a pipeline run.
    #[error("Pipeline failed: {0}")]
    PipelineFailed(AggregateFailure),

    /// Preparing a pipeline raised an error.
    #[error("Pipeline preparation failed: {0}")]
    Prepare(String),

    /// A generic internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl StepflowError {
    /// Returns true for [`StepflowError::Cancelled`].
    #[must_use]
    pub const fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled(_))
    }

    /// Returns true for [`StepflowError::Timeout`].
    #[must_use]
    pub const fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout(_))
    }

    /// Returns the aggregated step failures, if this error carries any.
    #[must_use]
    pub const fn aggregate(&self) -> Option<&AggregateFailure> {
        match self {
            Self::StepsFailed(agg) | Self::PipelineFailed(agg) => Some(agg),
            _ => None,
        }
    }

    /// Converts to a JSON representation for structured logs and sinks.
    #[must_use]
    pub fn to_json(&self) -> serde_json::Value {
        let kind = match self {
            Self::Cancelled(_) => "cancelled",
            Self::Timeout(_) => "timeout",
            Self::InvalidState(_) => "invalid_state",
            Self::InvalidConfiguration(_) => "invalid_configuration",
            Self::StepsFailed(_) => "steps_failed",
            Self::PipelineFailed(_) => "pipeline_failed",
            Self::Prepare(_) => "prepare",
            Self::Internal(_) => "internal",
        };

        let mut value = json!({
            "type": kind,
            "message": self.to_string(),
        });
        if let Some(agg) = self.aggregate() {
            value["failures"] = agg.to_json();
        }
        value
    }
}

/// A business failure raised by a single step.
#[derive(Debug, Clone)]
pub struct StepFailure {
    /// Identity of the failing step.
    pub step_id: StepId,
    /// Name of the failing step.
    pub step: String,
    /// Rendered error message.
    pub message: String,
    /// The underlying error.
    pub error: Arc<anyhow::Error>,
    /// When the failure was recorded.
    pub timestamp: DateTime<Utc>,
}

impl StepFailure {
    /// Creates a new step failure.
    #[must_use]
    pub fn new(step_id: StepId, step: impl Into<String>, error: Arc<anyhow::Error>) -> Self {
        Self {
            step_id,
            step: step.into(),
            message: error.to_string(),
            error,
            timestamp: Utc::now(),
        }
    }

    /// Converts to a JSON representation.
    #[must_use]
    pub fn to_json(&self) -> serde_json::Value {
        json!({
            "step_id": self.step_id.to_string(),
            "step": self.step,
            "message": self.message,
            "timestamp": self.timestamp.to_rfc3339(),
        })
    }
}

impl fmt::Display for StepFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.step, self.message)
    }
}

/// Every step failure of a single runner or pipeline invocation.
#[derive(Debug, Clone, Default)]
pub struct AggregateFailure {
    /// The failures, in the order the steps were added.
    pub failures: Vec<StepFailure>,
}

impl AggregateFailure {
    /// Creates an aggregate from a list of failures.
    #[must_use]
    pub fn new(failures: Vec<StepFailure>) -> Self {
        Self { failures }
    }

    /// Returns the number of failures.
    #[must_use]
    pub fn len(&self) -> usize {
        self.failures.len()
    }

    /// Returns true if no failures were captured.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.failures.is_empty()
    }

    /// Returns the failing step names.
    #[must_use]
    pub fn step_names(&self) -> Vec<&str> {
        self.failures.iter().map(|f| f.step.as_str()).collect()
    }

    /// Returns true if the step with the given id is part of the aggregate.
    #[must_use]
    pub fn contains(&self, id: StepId) -> bool {
        self.failures.iter().any(|f| f.step_id == id)
    }

    /// Converts to a JSON array.
    #[must_use]
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::Value::Array(self.failures.iter().map(StepFailure::to_json).collect())
    }
}

impl fmt::Display for AggregateFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let joined = self
            .failures
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join("; ");
        f.write_str(&joined)
    }
}

impl std::error::Error for AggregateFailure {}
