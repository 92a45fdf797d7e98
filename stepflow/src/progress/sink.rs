//! Progress sink trait and implementations.

use super::ProgressUpdate;
use tracing::{debug, info, Level};

/// Receives aggregated progress updates.
///
/// Sinks are called synchronously from the reporting step, so
/// implementations should hand heavy work off instead of blocking.
#[cfg_attr(test, mockall::automock)]
pub trait ProgressSink: Send + Sync {
    /// Handles one update.
    fn on_progress(&self, update: ProgressUpdate);
}

/// A sink that discards all updates.
///
/// Used as the default when no sink is configured.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoOpProgressSink;

impl ProgressSink for NoOpProgressSink {
    fn on_progress(&self, _update: ProgressUpdate) {}
}

/// A sink that logs updates using the tracing framework.
#[derive(Debug, Clone)]
pub struct LoggingProgressSink {
    level: Level,
}

impl Default for LoggingProgressSink {
    fn default() -> Self {
        Self { level: Level::INFO }
    }
}

impl LoggingProgressSink {
    /// Creates a logging sink with the specified level.
    #[must_use]
    pub fn new(level: Level) -> Self {
        Self { level }
    }

    /// Creates a debug-level logging sink.
    #[must_use]
    pub fn debug() -> Self {
        Self::new(Level::DEBUG)
    }

    /// Creates an info-level logging sink.
    #[must_use]
    pub fn info() -> Self {
        Self::new(Level::INFO)
    }
}

impl ProgressSink for LoggingProgressSink {
    fn on_progress(&self, update: ProgressUpdate) {
        if self.level == Level::DEBUG {
            debug!(
                progress_type = %update.progress_type,
                fraction = update.fraction,
                step = ?update.step,
                detail = ?update.detail,
                "{}", update.text
            );
        } else {
            info!(
                progress_type = %update.progress_type,
                fraction = update.fraction,
                step = ?update.step,
                detail = ?update.detail,
                "{}", update.text
            );
        }
    }
}

/// A sink that keeps every update, for tests.
#[derive(Debug, Default)]
pub struct CollectingProgressSink {
    updates: parking_lot::RwLock<Vec<ProgressUpdate>>,
}

impl CollectingProgressSink {
    /// Creates a new collecting sink.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns all collected updates.
    #[must_use]
    pub fn updates(&self) -> Vec<ProgressUpdate> {
        self.updates.read().clone()
    }

    /// Returns the most recent update.
    #[must_use]
    pub fn last(&self) -> Option<ProgressUpdate> {
        self.updates.read().last().cloned()
    }

    /// Returns the number of collected updates.
    #[must_use]
    pub fn len(&self) -> usize {
        self.updates.read().len()
    }

    /// Returns true if nothing was collected.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.updates.read().is_empty()
    }

    /// Clears all collected updates.
    pub fn clear(&self) {
        self.updates.write().clear();
    }
}

impl ProgressSink for CollectingProgressSink {
    fn on_progress(&self, update: ProgressUpdate) {
        self.updates.write().push(update);
    }
}
