//! Fixed-size worker pool over a frozen set of steps.

use super::pool::WorkerPool;
use super::{ErrorObservers, Joinable, Runner};
use crate::cancellation::CancellationToken;
use crate::core::RunState;
use crate::errors::{StepFailure, StepflowError};
use crate::steps::{Step, StepHandle};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

/// Runs all added steps on `workers` concurrent tokio tasks.
///
/// Steps are dequeued in FIFO order but may complete in any order. The step
/// set is frozen by [`ParallelRunner::start`]. With fail-fast (the default)
/// the first failure cancels an internal child token, so steps that have not
/// started yet are skipped while steps already running finish on their own.
/// The caller's token is never cancelled by the runner.
///
/// Clones share the same pool, which lets a [`WaitStep`](crate::steps::WaitStep)
/// join a runner started elsewhere.
#[derive(Debug, Clone)]
pub struct ParallelRunner {
    pool: Arc<WorkerPool>,
}

impl ParallelRunner {
    /// Creates a runner with the given number of workers.
    ///
    /// Fails with [`StepflowError::InvalidConfiguration`] unless
    /// `1 <= workers <= MAX_WORKERS`.
    pub fn new(workers: usize) -> Result<Self, StepflowError> {
        Ok(Self {
            pool: Arc::new(WorkerPool::new("parallel", workers)?),
        })
    }

    /// Sets the fail-fast policy.
    #[must_use]
    pub fn with_fail_fast(self, fail_fast: bool) -> Self {
        self.pool.set_fail_fast(fail_fast);
        self
    }

    /// Returns the fail-fast policy.
    pub fn fail_fast(&self) -> bool {
        self.pool.fail_fast()
    }

    /// Returns the number of workers.
    pub fn workers(&self) -> usize {
        self.pool.workers()
    }

    /// Starts the workers in the background and returns immediately.
    ///
    /// # Panics
    ///
    /// Panics when called outside a tokio runtime.
    pub fn start(&self, token: &CancellationToken) -> Result<(), StepflowError> {
        self.pool.start(token, true)
    }

    /// Waits until every worker has exited.
    pub async fn wait(&self) -> Result<(), StepflowError> {
        self.pool.wait().await
    }

    /// Like [`ParallelRunner::wait`], but gives up with
    /// [`StepflowError::Timeout`] after `timeout`. The run keeps going.
    pub async fn wait_timeout(&self, timeout: Duration) -> Result<(), StepflowError> {
        self.pool.wait_timeout(timeout).await
    }
}

#[async_trait]
impl Runner for ParallelRunner {
    fn strategy(&self) -> &'static str {
        "parallel"
    }

    fn add_step(&self, step: Arc<dyn Step>) -> Result<StepHandle, StepflowError> {
        self.pool.add(step, false)
    }

    async fn run(&self, token: &CancellationToken) -> Result<(), StepflowError> {
        self.start(token)?;
        self.wait().await
    }

    fn observers(&self) -> &Arc<ErrorObservers> {
        self.pool.observers()
    }

    fn steps(&self) -> Vec<StepHandle> {
        self.pool.steps()
    }

    fn executed_steps(&self) -> Vec<StepHandle> {
        self.pool.executed_steps()
    }

    fn state(&self) -> RunState {
        self.pool.state()
    }

    fn failures(&self) -> Vec<StepFailure> {
        self.pool.failures()
    }

    fn release(&self) {
        self.pool.release();
    }
}

#[async_trait]
impl Joinable for ParallelRunner {
    async fn wait(&self) -> Result<(), StepflowError> {
        self.pool.wait().await
    }

    async fn wait_timeout(&self, timeout: Duration) -> Result<(), StepflowError> {
        self.pool.wait_timeout(timeout).await
    }
}
