//! Pipelines: a prepare phase and a run phase around exactly one runner.
//!
//! A [`Pipeline`] owns its runner and a [`PipelineDefinition`]. The first
//! call to [`Pipeline::prepare`] lets the definition register steps, and the
//! result is memoized. [`Pipeline::run`] then hands the steps to the runner
//! and folds the outcome into a single result:
//!
//! - cancellation wins and is reported as [`StepflowError::Cancelled`];
//! - any step that recorded a business failure turns the run into
//!   [`StepflowError::PipelineFailed`];
//! - otherwise the pipeline completes.
//!
//! ```rust,ignore
//! let pipeline = Pipeline::parallel(
//!     FnDefinition::new(|runner: &ParallelRunner| {
//!         for file in &files {
//!             runner.add_step(Arc::new(DownloadStep::new(file)))?;
//!         }
//!         Ok(!files.is_empty())
//!     }),
//!     4,
//! )?;
//! pipeline.run(&CancellationToken::new()).await?;
//! ```

mod definition;
#[cfg(test)]
mod integration_tests;

pub use definition::{FnDefinition, PipelineDefinition};

use crate::cancellation::CancellationToken;
use crate::config::RunnerConfig;
use crate::core::{AtomicState, PipelineState};
use crate::errors::{AggregateFailure, StepFailure, StepflowError};
use crate::runner::{ErrorDecision, ParallelRunner, QueueRunner, Runner, SequentialRunner};
use crate::steps::StepHandle;
use parking_lot::RwLock;
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::OnceCell;
use tracing::{debug, error, info, warn};

/// A pipeline over a [`SequentialRunner`].
pub type SequentialPipeline = Pipeline<SequentialRunner>;
/// A pipeline over a [`ParallelRunner`].
pub type ParallelPipeline = Pipeline<ParallelRunner>;
/// A pipeline over a [`QueueRunner`].
pub type QueuePipeline = Pipeline<QueueRunner>;

/// Orchestrates one runner through prepare and run.
///
/// Pipelines are single-use: a second [`Pipeline::run`] after the runner
/// started fails with [`StepflowError::InvalidState`]. Dropping a pipeline
/// cancels its token, which stops any background work it started.
pub struct Pipeline<R: Runner> {
    name: String,
    runner: R,
    definition: Box<dyn PipelineDefinition<R>>,
    prepared: OnceCell<bool>,
    prepare_error: RwLock<Option<StepflowError>>,
    token: CancellationToken,
    state: AtomicState<PipelineState>,
    observed_failures: Arc<AtomicUsize>,
}

impl Pipeline<SequentialRunner> {
    /// Creates a pipeline running its steps one after another.
    pub fn sequential(definition: impl PipelineDefinition<SequentialRunner> + 'static) -> Self {
        Self::with_runner(definition, SequentialRunner::new())
    }
}

impl Pipeline<ParallelRunner> {
    /// Creates a pipeline running its steps on `workers` concurrent workers.
    pub fn parallel(
        definition: impl PipelineDefinition<ParallelRunner> + 'static,
        workers: usize,
    ) -> Result<Self, StepflowError> {
        Ok(Self::with_runner(definition, ParallelRunner::new(workers)?))
    }
}

impl Pipeline<QueueRunner> {
    /// Creates a pipeline over a producer/consumer queue.
    ///
    /// Steps added during prepare are queued; the run closes the queue and
    /// waits for the consumers to drain it.
    pub fn producer_consumer(
        definition: impl PipelineDefinition<QueueRunner> + 'static,
        workers: usize,
    ) -> Result<Self, StepflowError> {
        Ok(Self::with_runner(definition, QueueRunner::new(workers)?))
    }
}

impl Pipeline<Box<dyn Runner>> {
    /// Creates a pipeline over the runner described by `config`.
    pub fn from_config(
        definition: impl PipelineDefinition<Box<dyn Runner>> + 'static,
        config: &RunnerConfig,
    ) -> Result<Self, StepflowError> {
        Ok(Self::with_runner(definition, config.build_runner()?))
    }
}

impl<R: Runner> Pipeline<R> {
    /// Creates a pipeline over an existing, not yet started runner.
    pub fn with_runner(definition: impl PipelineDefinition<R> + 'static, runner: R) -> Self {
        Self {
            name: "pipeline".to_string(),
            runner,
            definition: Box::new(definition),
            prepared: OnceCell::new(),
            prepare_error: RwLock::new(None),
            token: CancellationToken::new(),
            state: AtomicState::new(PipelineState::Unprepared),
            observed_failures: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Sets the name used in logs.
    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Returns the pipeline name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the lifecycle state.
    pub fn state(&self) -> PipelineState {
        self.state.load()
    }

    /// Returns the runner.
    pub fn runner(&self) -> &R {
        &self.runner
    }

    /// Returns the steps registered on the runner.
    pub fn steps(&self) -> Vec<StepHandle> {
        self.runner.steps()
    }

    /// Returns the business failures recorded on the runner.
    pub fn failures(&self) -> Vec<StepFailure> {
        self.runner.failures()
    }

    /// Returns how many failures the pipeline observed while running.
    pub fn observed_failures(&self) -> usize {
        self.observed_failures.load(Ordering::Acquire)
    }

    /// Returns the memoized prepare result, if prepare already ran.
    pub fn is_prepared(&self) -> Option<bool> {
        self.prepared.get().copied()
    }

    /// Returns why prepare reported `false`, when it was not the definition's
    /// own choice: the definition raised an error, or an earlier prepare was
    /// dropped before the definition finished.
    pub fn prepare_error(&self) -> Option<StepflowError> {
        self.prepare_error.read().clone()
    }

    /// Returns the pipeline's own cancellation token.
    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    /// Runs the definition once and memoizes whether there is work to do.
    ///
    /// Concurrent callers wait for the first one; later calls return the
    /// memoized value without calling the definition again. If a `prepare`
    /// future is dropped while the definition runs, the partial build is
    /// never retried and later calls report `false`.
    pub async fn prepare(&self) -> bool {
        *self
            .prepared
            .get_or_init(|| async {
                if let Err(actual) = self
                    .state
                    .transition(PipelineState::Unprepared, PipelineState::Preparing)
                {
                    warn!(pipeline = %self.name, state = %actual, "Earlier preparation was abandoned");
                    *self.prepare_error.write() = Some(StepflowError::Prepare(
                        "an earlier prepare was dropped before the build finished".to_string(),
                    ));
                    self.state.store(PipelineState::PreparedFailed);
                    return false;
                }
                debug!(pipeline = %self.name, strategy = self.runner.strategy(), "Preparing pipeline");

                let ready = match self.definition.build(&self.runner).await {
                    Ok(ready) => ready,
                    Err(e) => {
                        error!(pipeline = %self.name, error = %e, "Pipeline preparation failed");
                        *self.prepare_error.write() = Some(StepflowError::Prepare(format!("{e:#}")));
                        false
                    }
                };

                self.state.store(if ready {
                    PipelineState::PreparedOk
                } else {
                    PipelineState::PreparedFailed
                });
                debug!(
                    pipeline = %self.name,
                    ready,
                    steps = self.runner.steps().len(),
                    "Pipeline prepared"
                );
                ready
            })
            .await
    }

    /// Prepares if needed, then runs the steps.
    ///
    /// Returns `Ok(())` without running anything when prepare reported that
    /// there is nothing to do.
    pub async fn run(&self, token: &CancellationToken) -> Result<(), StepflowError> {
        token.check()?;

        if !self.prepare().await {
            info!(pipeline = %self.name, "Nothing to run, skipping pipeline");
            return Ok(());
        }

        self.state
            .transition(PipelineState::PreparedOk, PipelineState::Running)
            .map_err(|actual| {
                StepflowError::InvalidState(format!("pipeline '{}' is {actual}", self.name))
            })?;

        let linked = CancellationToken::linked(&[token, &self.token]);
        let _observer = {
            let name = self.name.clone();
            let counter = Arc::clone(&self.observed_failures);
            self.runner.observers().subscribe_scoped(move |event| {
                counter.fetch_add(1, Ordering::AcqRel);
                warn!(
                    pipeline = %name,
                    step = %event.step_name(),
                    error = %event.message(),
                    "Step failed"
                );
                ErrorDecision::Continue
            })
        };

        info!(
            pipeline = %self.name,
            strategy = self.runner.strategy(),
            steps = self.runner.steps().len(),
            "Pipeline started"
        );
        let result = self.runner.run(&linked).await;
        self.finish(result)
    }

    fn finish(&self, result: Result<(), StepflowError>) -> Result<(), StepflowError> {
        if let Err(e) = &result {
            if e.is_cancelled() {
                self.state.store(PipelineState::Canceled);
                warn!(pipeline = %self.name, reason = %e, "Pipeline cancelled");
                return result;
            }
        }

        let failures = self.runner.failures();
        if !failures.is_empty() {
            self.state.store(PipelineState::Faulted);
            let aggregate = AggregateFailure::new(failures);
            error!(
                pipeline = %self.name,
                failed = aggregate.len(),
                error = %aggregate,
                "Pipeline failed"
            );
            return Err(StepflowError::PipelineFailed(aggregate));
        }

        match result {
            Ok(()) => {
                self.state.store(PipelineState::Completed);
                info!(pipeline = %self.name, "Pipeline completed");
                Ok(())
            }
            Err(e) => {
                self.state.store(PipelineState::Faulted);
                error!(pipeline = %self.name, error = %e, "Pipeline runner failed");
                Err(e)
            }
        }
    }

    /// Requests cancellation of the current or next run.
    pub fn cancel(&self, reason: impl Into<String>) {
        self.token.cancel(reason);
    }

    /// Cancels the pipeline and drops the runner's step handles.
    pub fn close(&self) {
        self.token.cancel(format!("pipeline '{}' closed", self.name));
        self.runner.release();
    }
}

impl<R: Runner> Drop for Pipeline<R> {
    fn drop(&mut self) {
        self.token.cancel(format!("pipeline '{}' dropped", self.name));
    }
}

impl<R: Runner> fmt::Debug for Pipeline<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pipeline")
            .field("name", &self.name)
            .field("strategy", &self.runner.strategy())
            .field("state", &self.state.load())
            .field("prepared", &self.prepared.get())
            .finish_non_exhaustive()
    }
}
