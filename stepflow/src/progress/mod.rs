//! Weighted progress reporting.
//!
//! Steps report their own fraction to a shared [`ProgressReporter`], which
//! folds it into one overall fraction and forwards a [`ProgressUpdate`] to a
//! [`ProgressSink`].

mod formatter;
mod reporter;
mod sink;
mod update;

pub use formatter::{DefaultFormatter, ProgressFormatter};
pub use reporter::ProgressReporter;
#[cfg(test)]
pub(crate) use sink::MockProgressSink;
pub use sink::{CollectingProgressSink, LoggingProgressSink, NoOpProgressSink, ProgressSink};
pub use update::ProgressUpdate;
