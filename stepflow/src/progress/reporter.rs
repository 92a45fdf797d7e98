//! Weighted progress aggregation across steps.

use super::{DefaultFormatter, NoOpProgressSink, ProgressFormatter, ProgressSink, ProgressUpdate};
use crate::core::ProgressType;
use crate::runner::Runner;
use crate::steps::{Step, StepHandle};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{trace, warn};

type IdentityFn = dyn Fn(&dyn Step) -> String + Send + Sync;

struct Tracked {
    // pins the instance so its address cannot be reused while registered
    _step: Arc<dyn Step>,
    name: String,
    size: u64,
    fraction: f64,
}

/// Aggregates per-step progress into one weighted fraction.
///
/// Steps are registered with their weight ([`Step::size`]); the overall
/// fraction is `sum(size * latest fraction) / total size`, or `0` while the
/// total is `0`. Reports from steps that were never registered are dropped.
/// The reporter keeps registered steps alive until it is dropped.
///
/// ```rust,ignore
/// let reporter = Arc::new(ProgressReporter::new(Arc::new(LoggingProgressSink::info())));
/// reporter.register_runner(pipeline.runner());
///
/// // inside a step body
/// reporter.report(self, 0.5);
/// ```
pub struct ProgressReporter {
    entries: DashMap<String, Tracked>,
    total: AtomicU64,
    sink: Arc<dyn ProgressSink>,
    formatter: Arc<dyn ProgressFormatter>,
    identity: Arc<IdentityFn>,
    progress_type: ProgressType,
}

impl ProgressReporter {
    /// Creates a reporter publishing to `sink`.
    #[must_use]
    pub fn new(sink: Arc<dyn ProgressSink>) -> Self {
        Self {
            entries: DashMap::new(),
            total: AtomicU64::new(0),
            sink,
            formatter: Arc::new(DefaultFormatter),
            identity: Arc::new(default_identity),
            progress_type: ProgressType::generic(),
        }
    }

    /// Sets the formatter used to build update texts.
    #[must_use]
    pub fn with_formatter(mut self, formatter: Arc<dyn ProgressFormatter>) -> Self {
        self.formatter = formatter;
        self
    }

    /// Sets the key under which steps are de-duplicated.
    ///
    /// By default a step is identified by the address of its instance.
    #[must_use]
    pub fn with_identity<F>(mut self, identity: F) -> Self
    where
        F: Fn(&dyn Step) -> String + Send + Sync + 'static,
    {
        self.identity = Arc::new(identity);
        self
    }

    /// Sets the progress type attached to every update.
    #[must_use]
    pub fn with_progress_type(mut self, progress_type: ProgressType) -> Self {
        self.progress_type = progress_type;
        self
    }

    /// Returns the progress type attached to updates.
    pub fn progress_type(&self) -> &ProgressType {
        &self.progress_type
    }

    /// Registers a step. Returns false if its key was already registered.
    pub fn register(&self, step: &StepHandle) -> bool {
        self.register_step(step.step())
    }

    /// Registers a bare step.
    ///
    /// Returns false if its key was already registered or if its weight
    /// would overflow the total.
    pub fn register_step(&self, step: &Arc<dyn Step>) -> bool {
        let key = (self.identity)(step.as_ref());
        match self.entries.entry(key) {
            Entry::Occupied(_) => false,
            Entry::Vacant(slot) => {
                let size = step.size();
                if self
                    .total
                    .fetch_update(Ordering::AcqRel, Ordering::Acquire, |total| {
                        total.checked_add(size)
                    })
                    .is_err()
                {
                    warn!(
                        step = %step.name(),
                        size,
                        total = self.total_size(),
                        "Rejecting step whose weight overflows the progress total"
                    );
                    return false;
                }
                slot.insert(Tracked {
                    _step: Arc::clone(step),
                    name: step.name().to_string(),
                    size,
                    fraction: 0.0,
                });
                true
            }
        }
    }

    /// Registers every step of `runner`. Returns how many were new.
    pub fn register_runner<R: Runner + ?Sized>(&self, runner: &R) -> usize {
        runner
            .steps()
            .iter()
            .filter(|step| self.register(step))
            .count()
    }

    /// Returns true if the step is registered.
    pub fn is_registered(&self, step: &dyn Step) -> bool {
        self.entries.contains_key(&(self.identity)(step))
    }

    /// Returns the number of registered steps.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if no step is registered.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Returns the sum of registered weights.
    pub fn total_size(&self) -> u64 {
        self.total.load(Ordering::Acquire)
    }

    /// Returns the current overall fraction.
    #[allow(clippy::cast_precision_loss)]
    pub fn overall(&self) -> f64 {
        let total = self.total_size();
        if total == 0 {
            return 0.0;
        }
        let done: f64 = self
            .entries
            .iter()
            .map(|entry| entry.size as f64 * entry.fraction)
            .sum();
        (done / total as f64).clamp(0.0, 1.0)
    }

    /// Records `fraction` for `step` and publishes the new overall fraction.
    pub fn report(&self, step: &dyn Step, fraction: f64) {
        self.publish(step, fraction, None);
    }

    /// Like [`ProgressReporter::report`] with a structured payload.
    pub fn report_with_detail(&self, step: &dyn Step, fraction: f64, detail: serde_json::Value) {
        self.publish(step, fraction, Some(detail));
    }

    fn publish(&self, step: &dyn Step, fraction: f64, detail: Option<serde_json::Value>) {
        let fraction = if fraction.is_nan() {
            0.0
        } else {
            fraction.clamp(0.0, 1.0)
        };

        let key = (self.identity)(step);
        let name = {
            let Some(mut entry) = self.entries.get_mut(&key) else {
                trace!(step = %step.name(), "Dropping progress of unregistered step");
                return;
            };
            entry.fraction = fraction;
            entry.name.clone()
        };

        let overall = self.overall();
        let mut update = ProgressUpdate::new(
            self.formatter.describe(&name, fraction, overall),
            overall,
            self.progress_type.clone(),
        )
        .with_step(name);
        update.detail = detail;

        self.sink.on_progress(update);
    }
}

impl Default for ProgressReporter {
    fn default() -> Self {
        Self::new(Arc::new(NoOpProgressSink))
    }
}

impl fmt::Debug for ProgressReporter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProgressReporter")
            .field("steps", &self.entries.len())
            .field("total", &self.total_size())
            .field("progress_type", &self.progress_type)
            .finish_non_exhaustive()
    }
}

fn default_identity(step: &dyn Step) -> String {
    format!("{:p}", (step as *const dyn Step).cast::<()>())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::progress::{CollectingProgressSink, MockProgressSink};
    use crate::runner::SequentialRunner;
    use crate::steps::NoOpStep;
    use crate::testing::CountingStep;
    use serde_json::json;

    fn handle(name: &str, size: u64) -> StepHandle {
        StepHandle::new(Arc::new(NoOpStep::new(name).with_size(size)))
    }

    fn approx(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    #[test]
    fn test_weighted_overall() {
        let mut sink = MockProgressSink::new();
        sink.expect_on_progress()
            .withf(|update| {
                (update.fraction - 0.3).abs() < 1e-9 && update.step.as_deref() == Some("big")
            })
            .times(1)
            .return_const(());

        let reporter = ProgressReporter::new(Arc::new(sink));
        let small = handle("small", 4);
        let big = handle("big", 6);
        assert!(reporter.register(&small));
        assert!(reporter.register(&big));
        assert_eq!(reporter.total_size(), 10);

        reporter.report(big.step().as_ref(), 0.5);
        assert!(approx(reporter.overall(), 0.3));
    }

    #[test]
    fn test_unregistered_step_is_ignored() {
        let mut sink = MockProgressSink::new();
        sink.expect_on_progress().never();

        let reporter = ProgressReporter::new(Arc::new(sink));
        reporter.register(&handle("known", 1));

        let stranger = handle("stranger", 5);
        reporter.report(stranger.step().as_ref(), 0.9);
        assert!(approx(reporter.overall(), 0.0));
    }

    #[test]
    fn test_duplicate_registration() {
        let reporter = ProgressReporter::default();
        let step = handle("once", 3);

        assert!(reporter.register(&step));
        assert!(!reporter.register(&step));
        assert_eq!(reporter.total_size(), 3);
        assert_eq!(reporter.len(), 1);
    }

    #[test]
    fn test_custom_identity_merges_by_name() {
        let reporter = ProgressReporter::default().with_identity(|step| step.name().to_string());

        assert!(reporter.register(&handle("same", 2)));
        assert!(!reporter.register(&handle("same", 2)));
        assert_eq!(reporter.total_size(), 2);
    }

    #[test]
    fn test_zero_total_reports_zero() {
        let sink = Arc::new(CollectingProgressSink::new());
        let reporter = ProgressReporter::new(sink.clone());
        let step = handle("unweighted", 0);
        reporter.register(&step);

        reporter.report(step.step().as_ref(), 1.0);
        assert!(approx(sink.last().unwrap().fraction, 0.0));
    }

    #[test]
    fn test_fraction_is_clamped() {
        let sink = Arc::new(CollectingProgressSink::new());
        let reporter = ProgressReporter::new(sink.clone());
        let step = handle("s", 1);
        reporter.register(&step);

        reporter.report(step.step().as_ref(), 7.0);
        assert!(approx(sink.last().unwrap().fraction, 1.0));

        reporter.report(step.step().as_ref(), -1.0);
        assert!(approx(sink.last().unwrap().fraction, 0.0));

        reporter.report(step.step().as_ref(), f64::NAN);
        assert!(approx(sink.last().unwrap().fraction, 0.0));
    }

    #[test]
    fn test_latest_fraction_wins() {
        let reporter = ProgressReporter::default();
        let step = handle("s", 2);
        reporter.register(&step);

        reporter.report(step.step().as_ref(), 0.75);
        reporter.report(step.step().as_ref(), 0.25);
        assert!(approx(reporter.overall(), 0.25));
    }

    #[test]
    fn test_detail_and_type_are_forwarded() {
        let sink = Arc::new(CollectingProgressSink::new());
        let reporter = ProgressReporter::new(sink.clone())
            .with_progress_type(ProgressType::download())
            .with_formatter(Arc::new(|step: &str, f: f64, _: f64| format!("{step}={f}")));
        let step = handle("fetch", 1);
        reporter.register(&step);

        reporter.report_with_detail(step.step().as_ref(), 0.5, json!({"bytes": 512}));

        let update = sink.last().unwrap();
        assert_eq!(update.text, "fetch=0.5");
        assert_eq!(update.progress_type, ProgressType::download());
        assert_eq!(update.detail, Some(json!({"bytes": 512})));
    }

    #[test]
    fn test_dropped_step_address_is_not_reused() {
        let mut sink = MockProgressSink::new();
        sink.expect_on_progress().never();
        let reporter = ProgressReporter::new(Arc::new(sink));

        for i in 0..50 {
            let registered = handle(&format!("reg-{i}"), 1);
            assert!(reporter.register(&registered));
            drop(registered);

            let stranger = handle(&format!("stranger-{i}"), 1);
            assert!(!reporter.is_registered(stranger.step().as_ref()));
            reporter.report(stranger.step().as_ref(), 1.0);
        }
        assert_eq!(reporter.len(), 50);
    }

    #[test]
    fn test_weight_overflow_is_rejected() {
        let reporter = ProgressReporter::default();
        let heavy = handle("heavy", u64::MAX);
        let extra = handle("extra", 1);

        assert!(reporter.register(&heavy));
        assert!(!reporter.register(&extra));
        assert_eq!(reporter.total_size(), u64::MAX);
        assert!(!reporter.is_registered(extra.step().as_ref()));
        assert_eq!(reporter.len(), 1);
    }

    #[test]
    fn test_register_runner() {
        let runner = SequentialRunner::new();
        runner
            .add_step(Arc::new(CountingStep::new("a").with_size(1)))
            .unwrap();
        runner
            .add_step(Arc::new(CountingStep::new("b").with_size(2)))
            .unwrap();

        let reporter = ProgressReporter::default();
        assert_eq!(reporter.register_runner(&runner), 2);
        assert_eq!(reporter.register_runner(&runner), 0);
        assert_eq!(reporter.total_size(), 3);
    }
}
