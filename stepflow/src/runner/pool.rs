//! Worker pool shared by the parallel and producer/consumer runners.

use super::{ErrorObservers, StepErrorEvent, WorkQueue};
use crate::cancellation::CancellationToken;
use crate::core::{AtomicState, RunState};
use crate::errors::{AggregateFailure, StepFailure, StepflowError};
use crate::steps::{Executed, Step, StepHandle};
use parking_lot::{Mutex, RwLock};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

pub(crate) struct WorkerPool {
    strategy: &'static str,
    workers: usize,
    fail_fast: AtomicBool,
    queue: WorkQueue,
    steps: RwLock<Vec<StepHandle>>,
    executed: Mutex<Vec<StepHandle>>,
    failures: Mutex<Vec<StepFailure>>,
    internal_errors: Mutex<Vec<String>>,
    cancelled_steps: AtomicUsize,
    observers: Arc<ErrorObservers>,
    state: AtomicState<RunState>,
    caller_token: RwLock<Option<CancellationToken>>,
    done: watch::Sender<bool>,
}

impl WorkerPool {
    pub(crate) fn new(strategy: &'static str, workers: usize) -> Result<Self, StepflowError> {
        if workers == 0 || workers > super::MAX_WORKERS {
            return Err(StepflowError::InvalidConfiguration(format!(
                "{strategy} runner needs between 1 and {} workers, got {workers}",
                super::MAX_WORKERS
            )));
        }

        let (done, _) = watch::channel(false);
        Ok(Self {
            strategy,
            workers,
            fail_fast: AtomicBool::new(true),
            queue: WorkQueue::new(),
            steps: RwLock::new(Vec::new()),
            executed: Mutex::new(Vec::new()),
            failures: Mutex::new(Vec::new()),
            internal_errors: Mutex::new(Vec::new()),
            cancelled_steps: AtomicUsize::new(0),
            observers: Arc::new(ErrorObservers::new()),
            state: AtomicState::new(RunState::NotStarted),
            caller_token: RwLock::new(None),
            done,
        })
    }

    pub(crate) fn workers(&self) -> usize {
        self.workers
    }

    pub(crate) fn fail_fast(&self) -> bool {
        self.fail_fast.load(Ordering::Acquire)
    }

    pub(crate) fn set_fail_fast(&self, fail_fast: bool) {
        self.fail_fast.store(fail_fast, Ordering::Release);
    }

    pub(crate) fn observers(&self) -> &Arc<ErrorObservers> {
        &self.observers
    }

    pub(crate) fn state(&self) -> RunState {
        self.state.load()
    }

    pub(crate) fn steps(&self) -> Vec<StepHandle> {
        self.steps.read().clone()
    }

    pub(crate) fn executed_steps(&self) -> Vec<StepHandle> {
        self.executed.lock().clone()
    }

    pub(crate) fn failures(&self) -> Vec<StepFailure> {
        self.failures.lock().clone()
    }

    pub(crate) fn is_finished(&self) -> bool {
        self.queue.is_closed()
    }

    /// Registers a step. Before start every pool accepts steps; once running
    /// only a pool whose queue is still open does.
    pub(crate) fn add(
        &self,
        step: Arc<dyn Step>,
        accept_while_running: bool,
    ) -> Result<StepHandle, StepflowError> {
        let mut steps = self.steps.write();
        let state = self.state.load();
        let open = match state {
            RunState::NotStarted => true,
            RunState::Running => accept_while_running,
            RunState::Completed => false,
        };

        let handle = StepHandle::new(step);
        if !open || !self.queue.push(handle.clone()) {
            return Err(StepflowError::InvalidState(format!(
                "cannot add step '{}' to a {} runner that is {state}{}",
                handle.name(),
                self.strategy,
                if self.queue.is_closed() { " and finished" } else { "" },
            )));
        }

        steps.push(handle.clone());
        Ok(handle)
    }

    /// Closes the queue: workers drain what is left and exit.
    pub(crate) fn finish(&self) {
        let _steps = self.steps.write();
        if !self.queue.is_closed() {
            debug!(strategy = self.strategy, pending = self.queue.len(), "Queue finished");
            self.queue.close();
        }
    }

    /// Spawns the workers on the current tokio runtime.
    ///
    /// With `close_queue` the step set is frozen at start.
    pub(crate) fn start(
        self: &Arc<Self>,
        token: &CancellationToken,
        close_queue: bool,
    ) -> Result<(), StepflowError> {
        token.check()?;

        let steps = {
            let steps = self.steps.write();
            self.state
                .transition(RunState::NotStarted, RunState::Running)
                .map_err(|actual| {
                    StepflowError::InvalidState(format!(
                        "{} runner is already {actual}",
                        self.strategy
                    ))
                })?;
            if close_queue {
                self.queue.close();
            }
            steps.len()
        };

        *self.caller_token.write() = Some(token.clone());
        let internal = token.child_token();

        info!(
            strategy = self.strategy,
            workers = self.workers,
            steps,
            fail_fast = self.fail_fast(),
            "Runner started"
        );

        let handles: Vec<JoinHandle<()>> = (0..self.workers)
            .map(|index| tokio::spawn(Arc::clone(self).worker_loop(internal.clone(), index)))
            .collect();
        tokio::spawn(Arc::clone(self).supervise(handles));
        Ok(())
    }

    async fn worker_loop(self: Arc<Self>, token: CancellationToken, index: usize) {
        debug!(strategy = self.strategy, worker = index, "Worker started");

        while let Some(step) = self.queue.next(&token).await {
            self.executed.lock().push(step.clone());

            match step.execute(&token).await {
                Executed::Completed => {}
                Executed::Failed(failure) => {
                    let event = StepErrorEvent::new(failure.error.clone(), Some(step.clone()));
                    self.failures.lock().push(failure);

                    let decision = self.observers.dispatch(&event);
                    if self.fail_fast() || decision.is_cancel() {
                        info!(
                            strategy = self.strategy,
                            step = %step.name(),
                            fail_fast = self.fail_fast(),
                            "Cancelling pending steps after failure"
                        );
                        token.cancel(format!("step '{}' failed", step.name()));
                    }
                }
                Executed::Stopped => {
                    debug!(
                        strategy = self.strategy,
                        step = %step.name(),
                        "Step stopped the remaining steps"
                    );
                    token.cancel(format!("step '{}' requested stop", step.name()));
                }
                Executed::Cancelled => {
                    // only count cancellations the step raised on its own
                    if !token.is_cancelled() {
                        self.cancelled_steps.fetch_add(1, Ordering::AcqRel);
                        token.cancel(format!("step '{}' cancelled", step.name()));
                    }
                }
            }
        }

        debug!(strategy = self.strategy, worker = index, "Worker exited");
    }

    async fn supervise(self: Arc<Self>, handles: Vec<JoinHandle<()>>) {
        for joined in futures::future::join_all(handles).await {
            if let Err(e) = joined {
                error!(strategy = self.strategy, error = %e, "Worker task failed");
                let error = Arc::new(anyhow::anyhow!("worker task failed: {e}"));
                self.internal_errors.lock().push(error.to_string());
                self.observers.dispatch(&StepErrorEvent::new(error, None));
            }
        }

        self.state.store(RunState::Completed);
        info!(
            strategy = self.strategy,
            executed = self.executed.lock().len(),
            failed = self.failures.lock().len(),
            "Runner completed"
        );
        self.done.send_replace(true);
    }

    /// Waits for the workers to exit and reports the run result.
    pub(crate) async fn wait(&self) -> Result<(), StepflowError> {
        if self.state.load() == RunState::NotStarted {
            return Err(StepflowError::InvalidState(format!(
                "{} runner was not started",
                self.strategy
            )));
        }

        let mut done = self.done.subscribe();
        loop {
            let finished = *done.borrow_and_update();
            if finished {
                break;
            }
            if done.changed().await.is_err() {
                return Err(StepflowError::Internal(format!(
                    "{} runner dropped its completion signal",
                    self.strategy
                )));
            }
        }

        self.outcome()
    }

    pub(crate) async fn wait_timeout(&self, timeout: Duration) -> Result<(), StepflowError> {
        match tokio::time::timeout(timeout, self.wait()).await {
            Ok(result) => result,
            Err(_) => {
                warn!(strategy = self.strategy, ?timeout, "Timed out waiting for runner");
                Err(StepflowError::Timeout(timeout))
            }
        }
    }

    fn outcome(&self) -> Result<(), StepflowError> {
        let failures = self.failures.lock().clone();
        if !failures.is_empty() {
            return Err(StepflowError::StepsFailed(AggregateFailure::new(failures)));
        }

        let internal = self.internal_errors.lock();
        if !internal.is_empty() {
            return Err(StepflowError::Internal(internal.join("; ")));
        }

        if let Some(token) = self.caller_token.read().as_ref() {
            if token.is_cancelled() {
                return token.check();
            }
        }

        let cancelled = self.cancelled_steps.load(Ordering::Acquire);
        if cancelled > 0 {
            return Err(StepflowError::Cancelled(format!(
                "{cancelled} step(s) cancelled"
            )));
        }

        Ok(())
    }

    pub(crate) fn release(&self) {
        if self.state.load() == RunState::Running {
            return;
        }
        self.steps.write().clear();
        self.executed.lock().clear();
    }
}

impl std::fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerPool")
            .field("strategy", &self.strategy)
            .field("workers", &self.workers)
            .field("fail_fast", &self.fail_fast())
            .field("state", &self.state.load())
            .field("queued", &self.queue.len())
            .finish()
    }
}
