//! Core domain model types for stepflow.
//!
//! This module contains the fundamental types used throughout the framework:
//! - Step, runner and pipeline lifecycle enums
//! - Atomic state cells with compare-and-swap transitions
//! - Progress classes

mod progress_type;
mod state;
mod status;

pub use progress_type::ProgressType;
pub use state::{AtomicState, StateRepr};
pub use status::{PipelineState, RunState, StepStatus};
