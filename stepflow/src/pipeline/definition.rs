//! The build phase of a pipeline.

use crate::runner::Runner;
use async_trait::async_trait;
use std::fmt;

/// Registers the steps of a pipeline on its runner.
///
/// `build` runs at most once per pipeline. Returning `Ok(false)` means there
/// is nothing to do; the pipeline then completes without running. An error
/// is logged and treated like `Ok(false)`.
#[async_trait]
pub trait PipelineDefinition<R: Runner>: Send + Sync {
    /// Adds steps to `runner`.
    async fn build(&self, runner: &R) -> anyhow::Result<bool>;
}

/// A closure-based definition.
///
/// ```rust,ignore
/// let definition = FnDefinition::new(|runner: &SequentialRunner| {
///     runner.add_step(Arc::new(FetchStep::new(url)))?;
///     Ok(true)
/// });
/// ```
pub struct FnDefinition<F> {
    build: F,
}

impl<F> FnDefinition<F> {
    /// Wraps a build closure for runners of type `R`.
    pub fn new<R>(build: F) -> Self
    where
        R: Runner,
        F: Fn(&R) -> anyhow::Result<bool> + Send + Sync,
    {
        Self { build }
    }
}

impl<F> fmt::Debug for FnDefinition<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnDefinition").finish_non_exhaustive()
    }
}

#[async_trait]
impl<R, F> PipelineDefinition<R> for FnDefinition<F>
where
    R: Runner,
    F: Fn(&R) -> anyhow::Result<bool> + Send + Sync,
{
    async fn build(&self, runner: &R) -> anyhow::Result<bool> {
        (self.build)(runner)
    }
}
