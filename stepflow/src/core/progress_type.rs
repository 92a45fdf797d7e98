//! Progress classes used to route progress updates.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifies a class of progress ("download", "verify", ...).
///
/// Equality is by the stable string id, so sinks can route updates without
/// inspecting the step that produced them.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProgressType(String);

impl ProgressType {
    /// Creates a progress type from its id.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the stable id.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.0
    }

    /// Progress of a transfer.
    #[must_use]
    pub fn download() -> Self {
        Self::new("download")
    }

    /// Progress of an integrity check.
    #[must_use]
    pub fn verify() -> Self {
        Self::new("verify")
    }

    /// Progress of an installation.
    #[must_use]
    pub fn install() -> Self {
        Self::new("install")
    }

    /// Progress without a more specific class.
    #[must_use]
    pub fn generic() -> Self {
        Self::new("generic")
    }
}

impl Default for ProgressType {
    fn default() -> Self {
        Self::generic()
    }
}

impl fmt::Display for ProgressType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ProgressType {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}
