//! Progress update payload.

use crate::core::ProgressType;
use serde::{Deserialize, Serialize};

/// One aggregated progress notification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressUpdate {
    /// Human readable description.
    pub text: String,
    /// Overall fraction in `[0, 1]`.
    pub fraction: f64,
    /// Class of progress.
    pub progress_type: ProgressType,
    /// Optional structured payload from the reporting step.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<serde_json::Value>,
    /// Name of the step that reported.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub step: Option<String>,
}

impl ProgressUpdate {
    /// Creates a new update.
    #[must_use]
    pub fn new(text: impl Into<String>, fraction: f64, progress_type: ProgressType) -> Self {
        Self {
            text: text.into(),
            fraction,
            progress_type,
            detail: None,
            step: None,
        }
    }

    /// Attaches a structured payload.
    #[must_use]
    pub fn with_detail(mut self, detail: serde_json::Value) -> Self {
        self.detail = Some(detail);
        self
    }

    /// Sets the reporting step.
    #[must_use]
    pub fn with_step(mut self, step: impl Into<String>) -> Self {
        self.step = Some(step.into());
        self
    }

    /// Returns the overall fraction as a whole percentage.
    #[must_use]
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    pub fn percent(&self) -> u8 {
        (self.fraction.clamp(0.0, 1.0) * 100.0).round() as u8
    }
}
