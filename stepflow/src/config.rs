//! Serde-loadable runner configuration.

use crate::errors::StepflowError;
use crate::runner::{ParallelRunner, QueueRunner, Runner, SequentialRunner, MAX_WORKERS};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::num::NonZeroUsize;

/// Which runner a configuration builds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunnerStrategy {
    /// [`SequentialRunner`].
    #[default]
    Sequential,
    /// [`ParallelRunner`].
    Parallel,
    /// [`QueueRunner`].
    ProducerConsumer,
}

impl fmt::Display for RunnerStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Sequential => "sequential",
            Self::Parallel => "parallel",
            Self::ProducerConsumer => "producer_consumer",
        };
        f.write_str(s)
    }
}

/// Configuration for building a runner.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunnerConfig {
    /// Scheduling strategy.
    #[serde(default)]
    pub strategy: RunnerStrategy,
    /// Worker count for pooled strategies. Ignored by `sequential`.
    #[serde(default = "default_workers")]
    pub workers: usize,
    /// Whether the first failure cancels steps that have not started.
    #[serde(default = "default_fail_fast")]
    pub fail_fast: bool,
}

fn default_workers() -> usize {
    std::thread::available_parallelism()
        .map_or(4, NonZeroUsize::get)
        .min(MAX_WORKERS)
}

fn default_fail_fast() -> bool {
    true
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            strategy: RunnerStrategy::default(),
            workers: default_workers(),
            fail_fast: default_fail_fast(),
        }
    }
}

impl RunnerConfig {
    /// Creates a configuration with defaults.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Parses a JSON document. Missing fields take their defaults.
    pub fn from_json(json: &str) -> Result<Self, StepflowError> {
        let config: Self = serde_json::from_str(json)
            .map_err(|e| StepflowError::InvalidConfiguration(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Sets the strategy.
    #[must_use]
    pub fn with_strategy(mut self, strategy: RunnerStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    /// Sets the worker count.
    #[must_use]
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    /// Sets the fail-fast policy.
    #[must_use]
    pub fn with_fail_fast(mut self, fail_fast: bool) -> Self {
        self.fail_fast = fail_fast;
        self
    }

    /// Checks the worker bounds for pooled strategies.
    pub fn validate(&self) -> Result<(), StepflowError> {
        if self.strategy != RunnerStrategy::Sequential
            && !(1..=MAX_WORKERS).contains(&self.workers)
        {
            return Err(StepflowError::InvalidConfiguration(format!(
                "{} runner needs between 1 and {MAX_WORKERS} workers, got {}",
                self.strategy, self.workers
            )));
        }
        Ok(())
    }

    /// Builds a fresh runner.
    pub fn build_runner(&self) -> Result<Box<dyn Runner>, StepflowError> {
        self.validate()?;
        let runner: Box<dyn Runner> = match self.strategy {
            RunnerStrategy::Sequential => {
                Box::new(SequentialRunner::new().with_fail_fast(self.fail_fast))
            }
            RunnerStrategy::Parallel => {
                Box::new(ParallelRunner::new(self.workers)?.with_fail_fast(self.fail_fast))
            }
            RunnerStrategy::ProducerConsumer => {
                Box::new(QueueRunner::new(self.workers)?.with_fail_fast(self.fail_fast))
            }
        };
        Ok(runner)
    }
}
