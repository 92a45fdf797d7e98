//! Mock steps for testing.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::cancellation::CancellationToken;
use crate::steps::{Step, StepOutcome};

/// A step that completes and counts how often it ran.
#[derive(Debug)]
pub struct CountingStep {
    name: String,
    size: u64,
    count: AtomicUsize,
}

impl CountingStep {
    /// Creates a new counting step.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            size: 0,
            count: AtomicUsize::new(0),
        }
    }

    /// Sets the progress weight.
    #[must_use]
    pub fn with_size(mut self, size: u64) -> Self {
        self.size = size;
        self
    }

    /// Returns the number of times the step ran.
    #[must_use]
    pub fn count(&self) -> usize {
        self.count.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Step for CountingStep {
    fn name(&self) -> &str {
        &self.name
    }

    fn size(&self) -> u64 {
        self.size
    }

    async fn run(&self, _token: &CancellationToken) -> StepOutcome {
        self.count.fetch_add(1, Ordering::SeqCst);
        StepOutcome::Completed
    }
}

/// A step that always fails with the given message.
#[derive(Debug)]
pub struct FailingStep {
    name: String,
    message: String,
    delay: Option<Duration>,
}

impl FailingStep {
    /// Creates a new failing step.
    #[must_use]
    pub fn new(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            message: message.into(),
            delay: None,
        }
    }

    /// Fails only after `delay`, unless cancelled first.
    #[must_use]
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }
}

#[async_trait]
impl Step for FailingStep {
    fn name(&self) -> &str {
        &self.name
    }

    async fn run(&self, token: &CancellationToken) -> StepOutcome {
        if let Some(delay) = self.delay {
            tokio::select! {
                () = tokio::time::sleep(delay) => {}
                () = token.cancelled() => return StepOutcome::Cancelled,
            }
        }
        StepOutcome::fail(self.message.clone())
    }
}

/// A step that sleeps, honouring cancellation while it does.
#[derive(Debug)]
pub struct SlowStep {
    name: String,
    delay: Duration,
    size: u64,
    started: AtomicBool,
    completed: AtomicBool,
}

impl SlowStep {
    /// Creates a new slow step.
    #[must_use]
    pub fn new(name: impl Into<String>, delay: Duration) -> Self {
        Self {
            name: name.into(),
            delay,
            size: 0,
            started: AtomicBool::new(false),
            completed: AtomicBool::new(false),
        }
    }

    /// Creates a slow step with delay in milliseconds.
    #[must_use]
    pub fn with_delay_ms(name: impl Into<String>, ms: u64) -> Self {
        Self::new(name, Duration::from_millis(ms))
    }

    /// Sets the progress weight.
    #[must_use]
    pub fn with_size(mut self, size: u64) -> Self {
        self.size = size;
        self
    }

    /// Returns true once the body started.
    #[must_use]
    pub fn started(&self) -> bool {
        self.started.load(Ordering::SeqCst)
    }

    /// Returns true if the full delay elapsed.
    #[must_use]
    pub fn completed(&self) -> bool {
        self.completed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Step for SlowStep {
    fn name(&self) -> &str {
        &self.name
    }

    fn size(&self) -> u64 {
        self.size
    }

    async fn run(&self, token: &CancellationToken) -> StepOutcome {
        self.started.store(true, Ordering::SeqCst);
        tokio::select! {
            () = tokio::time::sleep(self.delay) => {
                self.completed.store(true, Ordering::SeqCst);
                StepOutcome::Completed
            }
            () = token.cancelled() => StepOutcome::Cancelled,
        }
    }
}

/// Shared, ordered log of step executions.
#[derive(Debug, Clone, Default)]
pub struct ExecutionLog {
    entries: Arc<Mutex<Vec<String>>>,
}

impl ExecutionLog {
    /// Creates an empty log.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends an entry.
    pub fn record(&self, entry: impl Into<String>) {
        self.entries.lock().push(entry.into());
    }

    /// Returns a copy of the entries in recording order.
    #[must_use]
    pub fn entries(&self) -> Vec<String> {
        self.entries.lock().clone()
    }

    /// Returns true if `entry` was recorded.
    #[must_use]
    pub fn contains(&self, entry: &str) -> bool {
        self.entries.lock().iter().any(|e| e == entry)
    }

    /// Returns the number of entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// Returns true if nothing was recorded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

/// A step that writes its name into a shared [`ExecutionLog`].
#[derive(Debug)]
pub struct RecordingStep {
    name: String,
    size: u64,
    log: ExecutionLog,
}

impl RecordingStep {
    /// Creates a new recording step.
    #[must_use]
    pub fn new(name: impl Into<String>, log: &ExecutionLog) -> Self {
        Self {
            name: name.into(),
            size: 0,
            log: log.clone(),
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
impl Step for RecordingStep {
    fn name(&self) -> &str {
        &self.name
    }

    fn size(&self) -> u64 {
        self.size
    }

    async fn run(&self, _token: &CancellationToken) -> StepOutcome {
        self.log.record(self.name.clone());
        StepOutcome::Completed
    }
}

/// A step that parks until its token is cancelled.
#[derive(Debug)]
pub struct CancelAwareStep {
    name: String,
    observed: Mutex<Option<String>>,
}

impl CancelAwareStep {
    /// Creates a new cancel-aware step.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            observed: Mutex::new(None),
        }
    }

    /// Returns true once the step saw cancellation.
    #[must_use]
    pub fn observed_cancel(&self) -> bool {
        self.observed.lock().is_some()
    }

    /// Returns the reason the step observed.
    #[must_use]
    pub fn observed_reason(&self) -> Option<String> {
        self.observed.lock().clone()
    }
}

#[async_trait]
impl Step for CancelAwareStep {
    fn name(&self) -> &str {
        &self.name
    }

    async fn run(&self, token: &CancellationToken) -> StepOutcome {
        token.cancelled().await;
        *self.observed.lock() = Some(token.reason().unwrap_or_default());
        StepOutcome::Cancelled
    }
}
