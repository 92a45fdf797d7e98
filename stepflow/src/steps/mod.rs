//! Step trait and implementations.
//!
//! Steps are the fundamental units of work scheduled by a runner. A step is
//! handed the cancellation token of the run and reports a [`StepOutcome`];
//! the runner wraps it in a [`StepHandle`] that records the outcome.

mod handle;
mod outcome;
mod wait;

pub(crate) use handle::Executed;
pub use handle::{StepHandle, StepId};
pub use outcome::StepOutcome;
pub use wait::WaitStep;

use crate::cancellation::CancellationToken;
use async_trait::async_trait;
use std::fmt::Debug;
use std::future::Future;
use std::marker::PhantomData;

/// Trait for runnable steps.
#[async_trait]
pub trait Step: Send + Sync + Debug {
    /// Returns the name of the step, used in logs and failure reports.
    fn name(&self) -> &str;

    /// Returns the progress weight of the step. `0` means unweighted.
    fn size(&self) -> u64 {
        0
    }

    /// Runs the step.
    ///
    /// Implementations check `token` at their own suspension points and
    /// return [`StepOutcome::Cancelled`] once it is cancelled.
    async fn run(&self, token: &CancellationToken) -> StepOutcome;
}

/// A simple function-based step.
pub struct FnStep<F>
where
    F: Fn(&CancellationToken) -> StepOutcome + Send + Sync,
{
    name: String,
    size: u64,
    func: F,
}

impl<F> FnStep<F>
where
    F: Fn(&CancellationToken) -> StepOutcome + Send + Sync,
{
    /// Creates a new function-based step.
    pub fn new(name: impl Into<String>, func: F) -> Self {
        Self {
            name: name.into(),
            size: 0,
            func,
        }
    }

    /// Sets the progress weight.
    #[must_use]
    pub fn with_size(mut self, size: u64) -> Self {
        self.size = size;
        self
    }
}

impl<F> Debug for FnStep<F>
where
    F: Fn(&CancellationToken) -> StepOutcome + Send + Sync,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FnStep")
            .field("name", &self.name)
            .field("size", &self.size)
            .finish()
    }
}

#[async_trait]
impl<F> Step for FnStep<F>
where
    F: Fn(&CancellationToken) -> StepOutcome + Send + Sync,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn size(&self) -> u64 {
        self.size
    }

    async fn run(&self, token: &CancellationToken) -> StepOutcome {
        (self.func)(token)
    }
}

/// An async function-based step.
pub struct AsyncFnStep<F, Fut>
where
    F: Fn(CancellationToken) -> Fut + Send + Sync,
    Fut: Future<Output = StepOutcome> + Send,
{
    name: String,
    size: u64,
    func: F,
    _phantom: PhantomData<fn() -> Fut>,
}

impl<F, Fut> AsyncFnStep<F, Fut>
where
    F: Fn(CancellationToken) -> Fut + Send + Sync,
    Fut: Future<Output = StepOutcome> + Send,
{
    /// Creates a new async function-based step.
    pub fn new(name: impl Into<String>, func: F) -> Self {
        Self {
            name: name.into(),
            size: 0,
            func,
            _phantom: PhantomData,
        }
    }

    /// Sets the progress weight.
    #[must_use]
    pub fn with_size(mut self, size: u64) -> Self {
        self.size = size;
        self
    }
}

impl<F, Fut> Debug for AsyncFnStep<F, Fut>
where
    F: Fn(CancellationToken) -> Fut + Send + Sync,
    Fut: Future<Output = StepOutcome> + Send,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AsyncFnStep")
            .field("name", &self.name)
            .field("size", &self.size)
            .finish()
    }
}

#[async_trait]
impl<F, Fut> Step for AsyncFnStep<F, Fut>
where
    F: Fn(CancellationToken) -> Fut + Send + Sync,
    Fut: Future<Output = StepOutcome> + Send,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn size(&self) -> u64 {
        self.size
    }

    async fn run(&self, token: &CancellationToken) -> StepOutcome {
        (self.func)(token.clone()).await
    }
}

/// A no-op step for testing.
#[derive(Debug, Clone)]
pub struct NoOpStep {
    name: String,
    size: u64,
}

impl NoOpStep {
    /// Creates a new no-op step.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            size: 0,
        }
    }

    /// Sets the progress weight.
    #[must_use]
    pub fn with_size(mut self, size: u64) -> Self {
        self.size = size;
        self
    }
}

#[async_trait]
impl Step for NoOpStep {
    fn name(&self) -> &str {
        &self.name
    }

    fn size(&self) -> u64 {
        self.size
    }

    async fn run(&self, _token: &CancellationToken) -> StepOutcome {
        StepOutcome::Completed
    }
}
