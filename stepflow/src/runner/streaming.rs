//! Producer/consumer runner fed while it runs.

use super::pool::WorkerPool;
use super::{ErrorObservers, Joinable, Runner};
use crate::cancellation::CancellationToken;
use crate::core::RunState;
use crate::errors::{StepFailure, StepflowError};
use crate::steps::{Step, StepHandle};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

/// A worker pool whose queue stays open after start.
///
/// Producers [`queue`](QueueRunner::queue) steps before and during the run
/// until [`finish`](QueueRunner::finish) is called; workers then drain the
/// queue and exit.
///
/// ```rust,ignore
/// let runner = QueueRunner::new(4)?;
/// runner.start(&token)?;
/// for file in files {
///     runner.queue(Arc::new(DownloadStep::new(file)))?;
/// }
/// runner.finish_and_wait().await?;
/// ```
#[derive(Debug, Clone)]
pub struct QueueRunner {
    pool: Arc<WorkerPool>,
}

impl QueueRunner {
    /// Creates a runner with the given number of consumers.
    pub fn new(workers: usize) -> Result<Self, StepflowError> {
        Ok(Self {
            pool: Arc::new(WorkerPool::new("producer_consumer", workers)?),
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

    /// Returns the number of consumers.
    pub fn workers(&self) -> usize {
        self.pool.workers()
    }

    /// Enqueues a step. Same as [`Runner::add_step`].
    pub fn queue(&self, step: Arc<dyn Step>) -> Result<StepHandle, StepflowError> {
        self.pool.add(step, true)
    }

    /// Returns true once [`QueueRunner::finish`] was called.
    pub fn is_finished(&self) -> bool {
        self.pool.is_finished()
    }

    /// Starts the consumers in the background.
    ///
    /// # Panics
    ///
    /// Panics when called outside a tokio runtime.
    pub fn start(&self, token: &CancellationToken) -> Result<(), StepflowError> {
        self.pool.start(token, false)
    }

    /// Signals that no more steps will be queued.
    pub fn finish(&self) {
        self.pool.finish();
    }

    /// Waits until the consumers have exited. Never returns before
    /// [`QueueRunner::finish`] unless the run is cancelled.
    pub async fn wait(&self) -> Result<(), StepflowError> {
        self.pool.wait().await
    }

    /// Like [`QueueRunner::wait`] with an upper bound.
    pub async fn wait_timeout(&self, timeout: Duration) -> Result<(), StepflowError> {
        self.pool.wait_timeout(timeout).await
    }

    /// Calls [`QueueRunner::finish`] and waits.
    pub async fn finish_and_wait(&self) -> Result<(), StepflowError> {
        self.finish();
        self.wait().await
    }
}

#[async_trait]
impl Runner for QueueRunner {
    fn strategy(&self) -> &'static str {
        "producer_consumer"
    }

    fn add_step(&self, step: Arc<dyn Step>) -> Result<StepHandle, StepflowError> {
        self.queue(step)
    }

    async fn run(&self, token: &CancellationToken) -> Result<(), StepflowError> {
        self.start(token)?;
        self.finish_and_wait().await
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
impl Joinable for QueueRunner {
    async fn wait(&self) -> Result<(), StepflowError> {
        self.pool.wait().await
    }

    async fn wait_timeout(&self, timeout: Duration) -> Result<(), StepflowError> {
        self.pool.wait_timeout(timeout).await
    }
}
