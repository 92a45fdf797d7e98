//! # Stepflow
//!
//! A small execution engine that runs *steps* (cancellable, optionally
//! weighted units of work) through pipelines.
//!
//! Stepflow provides:
//!
//! - **Runners**: sequential, fixed worker pool, and producer/consumer queue
//! - **Pipelines**: a memoized prepare phase followed by a single run
//! - **Cooperative cancellation**: one caller token flowing down to every step,
//!   with fail-fast implemented on a child token
//! - **Error aggregation**: business failures collected per step and surfaced
//!   once the run ends
//! - **Weighted progress**: per-step fractions folded into one overall value
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use stepflow::prelude::*;
//!
//! let pipeline = Pipeline::parallel(
//!     FnDefinition::new(|runner: &ParallelRunner| {
//!         runner.add_step(Arc::new(FetchStep::new("index")))?;
//!         runner.add_step(Arc::new(FetchStep::new("packages")))?;
//!         Ok(true)
//!     }),
//!     4,
//! )?;
//!
//! pipeline.run(&CancellationToken::new()).await?;
//! ```

#![forbid(unsafe_code)]
#![warn(
    clippy::all,
    clippy::pedantic,
    missing_docs,
    rust_2018_idioms
)]
#![allow(
    clippy::module_name_repetitions,
    clippy::must_use_candidate,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc
)]

pub mod cancellation;
pub mod config;
pub mod core;
pub mod errors;
pub mod observability;
pub mod pipeline;
pub mod progress;
pub mod runner;
pub mod steps;
pub mod testing;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::cancellation::CancellationToken;
    pub use crate::config::{RunnerConfig, RunnerStrategy};
    pub use crate::core::{PipelineState, ProgressType, RunState, StepStatus};
    pub use crate::errors::{AggregateFailure, StepFailure, StepflowError};
    pub use crate::pipeline::{
        FnDefinition, ParallelPipeline, Pipeline, PipelineDefinition, QueuePipeline,
        SequentialPipeline,
    };
    pub use crate::progress::{
        LoggingProgressSink, ProgressFormatter, ProgressReporter, ProgressSink, ProgressUpdate,
    };
    pub use crate::runner::{
        ErrorDecision, Joinable, ParallelRunner, QueueRunner, Runner, SequentialRunner,
        StepErrorEvent,
    };
    pub use crate::steps::{AsyncFnStep, FnStep, Step, StepHandle, StepOutcome, WaitStep};
    pub use std::sync::Arc;
}
