//! Runners: the concurrency strategies that execute steps.
//!
//! Every runner is single-use. Steps are added, [`Runner::run`] is called
//! once, and afterwards the step handles report what happened. Failures are
//! announced to the runner's [`ErrorObservers`] as they happen and returned
//! together as one [`AggregateFailure`](crate::errors::AggregateFailure) when
//! the run ends.

mod observers;
mod parallel;
mod pool;
mod queue;
mod sequential;
mod streaming;

pub use observers::{ErrorDecision, ErrorObservers, ObserverGuard, ObserverId, StepErrorEvent};
pub use parallel::ParallelRunner;
pub use queue::WorkQueue;
pub use sequential::SequentialRunner;
pub use streaming::QueueRunner;

use crate::cancellation::CancellationToken;
use crate::core::RunState;
use crate::errors::{StepFailure, StepflowError};
use crate::steps::{Step, StepHandle};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

/// Upper bound for the worker count of pooled runners.
pub const MAX_WORKERS: usize = 256;

/// A strategy for executing a set of steps.
#[async_trait]
pub trait Runner: Send + Sync {
    /// Returns a stable name for logs (`"sequential"`, `"parallel"`, ...).
    fn strategy(&self) -> &'static str;

    /// Registers a step and returns its handle.
    fn add_step(&self, step: Arc<dyn Step>) -> Result<StepHandle, StepflowError>;

    /// Executes the registered steps.
    ///
    /// Returns [`StepflowError::Cancelled`] without executing anything when
    /// `token` is already cancelled, and [`StepflowError::InvalidState`] when
    /// the runner was already started.
    async fn run(&self, token: &CancellationToken) -> Result<(), StepflowError>;

    /// Returns the error observer registry.
    fn observers(&self) -> &Arc<ErrorObservers>;

    /// Returns every registered step in registration order.
    fn steps(&self) -> Vec<StepHandle>;

    /// Returns the steps that were handed to a worker, in dequeue order.
    fn executed_steps(&self) -> Vec<StepHandle>;

    /// Returns the lifecycle state.
    fn state(&self) -> RunState;

    /// Returns the business failures recorded so far.
    fn failures(&self) -> Vec<StepFailure> {
        self.steps().iter().filter_map(StepHandle::failure).collect()
    }

    /// Drops the step handles held by a runner that is not running.
    fn release(&self);
}

#[async_trait]
impl<R: Runner + ?Sized> Runner for Box<R> {
    fn strategy(&self) -> &'static str {
        (**self).strategy()
    }

    fn add_step(&self, step: Arc<dyn Step>) -> Result<StepHandle, StepflowError> {
        (**self).add_step(step)
    }

    async fn run(&self, token: &CancellationToken) -> Result<(), StepflowError> {
        (**self).run(token).await
    }

    fn observers(&self) -> &Arc<ErrorObservers> {
        (**self).observers()
    }

    fn steps(&self) -> Vec<StepHandle> {
        (**self).steps()
    }

    fn executed_steps(&self) -> Vec<StepHandle> {
        (**self).executed_steps()
    }

    fn state(&self) -> RunState {
        (**self).state()
    }

    fn failures(&self) -> Vec<StepFailure> {
        (**self).failures()
    }

    fn release(&self) {
        (**self).release();
    }
}

/// A runner that executes in the background and can be awaited from any
/// number of tasks.
#[async_trait]
pub trait Joinable: Send + Sync {
    /// Waits for the run to finish and returns its result.
    async fn wait(&self) -> Result<(), StepflowError>;

    /// Waits at most `timeout`; returns [`StepflowError::Timeout`] when the
    /// run is still going.
    async fn wait_timeout(&self, timeout: Duration) -> Result<(), StepflowError>;
}
