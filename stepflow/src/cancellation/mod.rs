//! Cooperative cancellation.
//!
//! A single [`CancellationToken`] flows from a pipeline through its runner
//! into every step. Runners derive child tokens for fail-fast propagation
//! between sibling workers; cancelling a child never cancels its parent.

mod token;

pub use token::{CancelCallback, CancellationToken};
