//! Runner-side bookkeeping for a single step.

use super::{Step, StepOutcome};
use crate::cancellation::CancellationToken;
use crate::core::{AtomicState, StepStatus};
use crate::errors::StepFailure;
use crate::observability::SpanTimer;
use chrono::{DateTime, Utc};
use futures::FutureExt;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tracing::{debug, error, trace, warn, Instrument};
use uuid::Uuid;

/// Unique identity of a step within a process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StepId(Uuid);

impl StepId {
    /// Generates a fresh id.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Returns the underlying uuid.
    #[must_use]
    pub const fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for StepId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for StepId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

/// What a runner learns from executing a step once.
#[derive(Debug, Clone)]
pub(crate) enum Executed {
    Completed,
    Failed(StepFailure),
    Stopped,
    Cancelled,
}

struct StepEntry {
    id: StepId,
    name: String,
    size: u64,
    step: Arc<dyn Step>,
    status: AtomicState<StepStatus>,
    error: RwLock<Option<Arc<anyhow::Error>>>,
    started_at: RwLock<Option<DateTime<Utc>>>,
    finished_at: RwLock<Option<DateTime<Utc>>>,
}

/// A step registered with a runner.
///
/// Handles are cheap to clone and compare by identity. After the step ran,
/// [`StepHandle::error`] holds the business failure, if any. Cancellation
/// and stop requests never populate it.
#[derive(Clone)]
pub struct StepHandle {
    inner: Arc<StepEntry>,
}

impl StepHandle {
    /// Wraps a step in a fresh, pending handle.
    #[must_use]
    pub fn new(step: Arc<dyn Step>) -> Self {
        Self {
            inner: Arc::new(StepEntry {
                id: StepId::new(),
                name: step.name().to_string(),
                size: step.size(),
                step,
                status: AtomicState::new(StepStatus::Pending),
                error: RwLock::new(None),
                started_at: RwLock::new(None),
                finished_at: RwLock::new(None),
            }),
        }
    }

    /// Returns the step identity.
    #[must_use]
    pub fn id(&self) -> StepId {
        self.inner.id
    }

    /// Returns the step name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Returns the progress weight; `0` means unweighted.
    #[must_use]
    pub fn size(&self) -> u64 {
        self.inner.size
    }

    /// Returns the wrapped step.
    #[must_use]
    pub fn step(&self) -> &Arc<dyn Step> {
        &self.inner.step
    }

    /// Returns the current status.
    #[must_use]
    pub fn status(&self) -> StepStatus {
        self.inner.status.load()
    }

    /// Returns the business failure recorded for this step.
    #[must_use]
    pub fn error(&self) -> Option<Arc<anyhow::Error>> {
        self.inner.error.read().clone()
    }

    /// Returns true if a business failure was recorded.
    #[must_use]
    pub fn is_failed(&self) -> bool {
        self.inner.error.read().is_some()
    }

    /// Returns the recorded failure with the step's identity attached.
    #[must_use]
    pub fn failure(&self) -> Option<StepFailure> {
        self.error()
            .map(|error| StepFailure::new(self.id(), self.name(), error))
    }

    /// When the body started, if it did.
    #[must_use]
    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        *self.inner.started_at.read()
    }

    /// When the body finished, if it did.
    #[must_use]
    pub fn finished_at(&self) -> Option<DateTime<Utc>> {
        *self.inner.finished_at.read()
    }

    /// Wall-clock duration of the body in milliseconds.
    #[must_use]
    pub fn duration_ms(&self) -> Option<i64> {
        match (self.started_at(), self.finished_at()) {
            (Some(start), Some(end)) => Some((end - start).num_milliseconds()),
            _ => None,
        }
    }

    /// Returns true if both handles refer to the same registration.
    #[must_use]
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Runs the step body exactly once and records its result.
    pub(crate) async fn execute(&self, token: &CancellationToken) -> Executed {
        if let Err(actual) = self
            .inner
            .status
            .transition(StepStatus::Pending, StepStatus::Running)
        {
            warn!(step = %self.name(), status = %actual, "Step already executed, skipping");
            return Executed::Cancelled;
        }

        *self.inner.started_at.write() = Some(Utc::now());
        let span = tracing::trace_span!("step", step = %self.name(), step_id = %self.id());
        let timer = SpanTimer::start(self.name());
        trace!(parent: &span, "Step started");

        let outcome = AssertUnwindSafe(self.inner.step.run(token))
            .catch_unwind()
            .instrument(span.clone())
            .await
            .unwrap_or_else(|panic| {
                StepOutcome::Failed(anyhow::anyhow!(
                    "step panicked: {}",
                    panic_message(panic.as_ref())
                ))
            });

        let duration_ms = timer.finish();
        *self.inner.finished_at.write() = Some(Utc::now());

        span.in_scope(|| self.record(outcome, duration_ms, token))
    }

    fn record(&self, outcome: StepOutcome, duration_ms: f64, token: &CancellationToken) -> Executed {
        match outcome {
            StepOutcome::Completed => {
                self.inner.status.store(StepStatus::Succeeded);
                trace!(duration_ms, "Step completed");
                Executed::Completed
            }
            StepOutcome::Failed(e) => {
                let error = Arc::new(e);
                *self.inner.error.write() = Some(error.clone());
                self.inner.status.store(StepStatus::Failed);
                error!(duration_ms, error = %error, "Step failed");
                Executed::Failed(StepFailure::new(self.id(), self.name(), error))
            }
            StepOutcome::StopRemaining => {
                self.inner.status.store(StepStatus::Stopped);
                debug!(duration_ms, "Step requested stop of remaining steps");
                Executed::Stopped
            }
            StepOutcome::Cancelled => {
                self.inner.status.store(StepStatus::Cancelled);
                debug!(duration_ms, reason = ?token.reason(), "Step cancelled");
                Executed::Cancelled
            }
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

impl PartialEq for StepHandle {
    fn eq(&self, other: &Self) -> bool {
        self.ptr_eq(other)
    }
}

impl Eq for StepHandle {}

impl std::hash::Hash for StepHandle {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.inner.id.hash(state);
    }
}

impl fmt::Debug for StepHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StepHandle")
            .field("id", &self.inner.id)
            .field("name", &self.inner.name)
            .field("size", &self.inner.size)
            .field("status", &self.status())
            .field("failed", &self.is_failed())
            .finish()
    }
}
