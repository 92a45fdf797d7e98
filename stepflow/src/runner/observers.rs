//! Error observers attached to a runner.
//!
//! Each observer returns an [`ErrorDecision`]; the dispatcher folds the
//! decisions with logical OR, so once any observer asks for cancellation the
//! request sticks for that event.

use crate::steps::StepHandle;
use parking_lot::RwLock;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::warn;

/// What an observer wants the runner to do after a step failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ErrorDecision {
    /// Keep scheduling the remaining steps (subject to the fail-fast policy).
    #[default]
    Continue,
    /// Stop scheduling steps that have not started yet.
    Cancel,
}

impl ErrorDecision {
    /// Combines two decisions. `Cancel` wins.
    #[must_use]
    pub const fn or(self, other: Self) -> Self {
        match (self, other) {
            (Self::Continue, Self::Continue) => Self::Continue,
            _ => Self::Cancel,
        }
    }

    /// Returns true for [`ErrorDecision::Cancel`].
    #[must_use]
    pub const fn is_cancel(&self) -> bool {
        matches!(self, Self::Cancel)
    }
}

impl From<bool> for ErrorDecision {
    fn from(cancel: bool) -> Self {
        if cancel {
            Self::Cancel
        } else {
            Self::Continue
        }
    }
}

/// A failure reported to observers.
#[derive(Debug, Clone)]
pub struct StepErrorEvent {
    /// The error raised.
    pub error: Arc<anyhow::Error>,
    /// The step that raised it, if the failure belongs to a step.
    pub step: Option<StepHandle>,
}

impl StepErrorEvent {
    /// Creates a new event.
    #[must_use]
    pub fn new(error: Arc<anyhow::Error>, step: Option<StepHandle>) -> Self {
        Self { error, step }
    }

    /// Returns the originating step name, or `"<runner>"`.
    #[must_use]
    pub fn step_name(&self) -> &str {
        self.step.as_ref().map_or("<runner>", StepHandle::name)
    }

    /// Returns the rendered error message.
    #[must_use]
    pub fn message(&self) -> String {
        self.error.to_string()
    }
}

/// Identifies a subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObserverId(u64);

type ObserverFn = dyn Fn(&StepErrorEvent) -> ErrorDecision + Send + Sync;

/// Thread-safe registry of error observers.
#[derive(Default)]
pub struct ErrorObservers {
    next_id: AtomicU64,
    observers: RwLock<Vec<(ObserverId, Arc<ObserverFn>)>>,
}

impl ErrorObservers {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds an observer until [`ErrorObservers::unsubscribe`] is called.
    pub fn subscribe<F>(&self, observer: F) -> ObserverId
    where
        F: Fn(&StepErrorEvent) -> ErrorDecision + Send + Sync + 'static,
    {
        let id = ObserverId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.observers.write().push((id, Arc::new(observer)));
        id
    }

    /// Adds an observer that is removed when the returned guard drops.
    pub fn subscribe_scoped<F>(self: &Arc<Self>, observer: F) -> ObserverGuard
    where
        F: Fn(&StepErrorEvent) -> ErrorDecision + Send + Sync + 'static,
    {
        let id = self.subscribe(observer);
        ObserverGuard {
            observers: Arc::clone(self),
            id,
        }
    }

    /// Removes an observer. Returns true if it was registered.
    pub fn unsubscribe(&self, id: ObserverId) -> bool {
        let mut observers = self.observers.write();
        let before = observers.len();
        observers.retain(|(existing, _)| *existing != id);
        observers.len() < before
    }

    /// Returns the number of registered observers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.observers.read().len()
    }

    /// Returns true if nobody is listening.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.observers.read().is_empty()
    }

    /// Invokes every observer and folds their decisions.
    ///
    /// Observers run outside the registry lock, so they may subscribe or
    /// unsubscribe. A panicking observer is logged and counts as `Continue`.
    pub fn dispatch(&self, event: &StepErrorEvent) -> ErrorDecision {
        let snapshot: Vec<Arc<ObserverFn>> = self
            .observers
            .read()
            .iter()
            .map(|(_, observer)| Arc::clone(observer))
            .collect();

        snapshot
            .iter()
            .map(|observer| {
                std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| observer(event)))
                    .unwrap_or_else(|e| {
                        warn!(step = %event.step_name(), "Error observer panicked: {:?}", e);
                        ErrorDecision::Continue
                    })
            })
            .fold(ErrorDecision::Continue, ErrorDecision::or)
    }
}

impl fmt::Debug for ErrorObservers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ErrorObservers")
            .field("count", &self.len())
            .finish()
    }
}

/// Removes its observer on drop.
#[must_use = "the observer is removed as soon as the guard is dropped"]
pub struct ObserverGuard {
    observers: Arc<ErrorObservers>,
    id: ObserverId,
}

impl ObserverGuard {
    /// Returns the id of the guarded subscription.
    #[must_use]
    pub const fn id(&self) -> ObserverId {
        self.id
    }
}

impl Drop for ObserverGuard {
    fn drop(&mut self) {
        self.observers.unsubscribe(self.id);
    }
}

impl fmt::Debug for ObserverGuard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObserverGuard").field("id", &self.id).finish()
    }
}
