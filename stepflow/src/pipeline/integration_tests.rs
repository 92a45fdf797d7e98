//! End-to-end tests for pipelines over every runner strategy.

use super::*;
use crate::config::RunnerStrategy;
use crate::observability::init_test_tracing;
use crate::progress::{CollectingProgressSink, ProgressReporter};
use crate::steps::{FnStep, Step, StepOutcome, WaitStep};
use crate::testing::{
    assert_cancelled, assert_failed_steps, assert_step_not_run, assert_step_succeeded,
    CancelAwareStep, CountingStep, ExecutionLog, FailingStep, RecordingStep, SlowStep,
};
use async_trait::async_trait;
use pretty_assertions::assert_eq;
use std::time::Duration;

/// Adds a fixed list of steps to any runner and reports ready.
struct StepsDefinition(Vec<Arc<dyn Step>>);

#[async_trait]
impl<R: Runner> PipelineDefinition<R> for StepsDefinition {
    async fn build(&self, runner: &R) -> anyhow::Result<bool> {
        for step in &self.0 {
            runner.add_step(Arc::clone(step))?;
        }
        Ok(true)
    }
}

fn steps_definition(steps: Vec<Arc<dyn Step>>) -> StepsDefinition {
    StepsDefinition(steps)
}

fn empty() -> StepsDefinition {
    StepsDefinition(Vec::new())
}

#[derive(Debug)]
struct ReportingStep {
    name: String,
    size: u64,
    fraction: f64,
    reporter: Arc<ProgressReporter>,
}

#[async_trait]
impl Step for ReportingStep {
    fn name(&self) -> &str {
        &self.name
    }

    fn size(&self) -> u64 {
        self.size
    }

    async fn run(&self, _token: &CancellationToken) -> StepOutcome {
        self.reporter.report(self, self.fraction);
        StepOutcome::Completed
    }
}

#[tokio::test]
async fn test_zero_steps_succeed_for_every_strategy() {
    init_test_tracing();
    let token = CancellationToken::new();

    Pipeline::sequential(empty()).run(&token).await.unwrap();
    Pipeline::parallel(empty(), 4).unwrap().run(&token).await.unwrap();
    Pipeline::producer_consumer(empty(), 4)
        .unwrap()
        .run(&token)
        .await
        .unwrap();

    for strategy in [
        RunnerStrategy::Sequential,
        RunnerStrategy::Parallel,
        RunnerStrategy::ProducerConsumer,
    ] {
        let config = RunnerConfig::new().with_strategy(strategy).with_workers(2);
        let pipeline = Pipeline::from_config(empty(), &config).unwrap();
        pipeline.run(&token).await.unwrap();
        assert_eq!(pipeline.state(), PipelineState::Completed);
    }
}

#[tokio::test]
async fn test_prepare_is_memoized() {
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = calls.clone();
    let pipeline = Pipeline::sequential(FnDefinition::new(move |_: &SequentialRunner| {
        counter.fetch_add(1, Ordering::SeqCst);
        Ok(true)
    }));

    assert_eq!(pipeline.is_prepared(), None);
    assert!(pipeline.prepare().await);
    assert!(pipeline.prepare().await);
    pipeline.run(&CancellationToken::new()).await.unwrap();

    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(pipeline.is_prepared(), Some(true));
}

#[tokio::test]
async fn test_prepare_false_skips_run() {
    let step = Arc::new(CountingStep::new("never"));
    let added = step.clone();
    let pipeline = Pipeline::sequential(FnDefinition::new(move |runner: &SequentialRunner| {
        runner.add_step(added.clone())?;
        Ok(false)
    }));

    pipeline.run(&CancellationToken::new()).await.unwrap();
    assert_eq!(step.count(), 0);
    assert_eq!(pipeline.state(), PipelineState::PreparedFailed);
}

#[tokio::test]
async fn test_prepare_error_is_memoized_as_false() {
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = calls.clone();
    let pipeline = Pipeline::parallel(
        FnDefinition::new(move |_: &ParallelRunner| -> anyhow::Result<bool> {
            counter.fetch_add(1, Ordering::SeqCst);
            anyhow::bail!("registry unavailable")
        }),
        2,
    )
    .unwrap();

    assert!(!pipeline.prepare().await);
    assert!(!pipeline.prepare().await);
    pipeline.run(&CancellationToken::new()).await.unwrap();

    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(
        pipeline.prepare_error().unwrap().to_string(),
        "Pipeline preparation failed: registry unavailable"
    );
}

#[tokio::test]
async fn test_abandoned_prepare_is_not_rebuilt() {
    struct SlowDefinition {
        calls: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl PipelineDefinition<SequentialRunner> for SlowDefinition {
        async fn build(&self, runner: &SequentialRunner) -> anyhow::Result<bool> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            runner.add_step(Arc::new(CountingStep::new("index")))?;
            tokio::time::sleep(Duration::from_millis(50)).await;
            Ok(true)
        }
    }

    let calls = Arc::new(AtomicUsize::new(0));
    let pipeline = Pipeline::sequential(SlowDefinition {
        calls: calls.clone(),
    });

    let first = tokio::time::timeout(Duration::from_millis(5), pipeline.prepare()).await;
    assert!(first.is_err());

    assert!(!pipeline.prepare().await);
    assert!(!pipeline.prepare().await);
    pipeline.run(&CancellationToken::new()).await.unwrap();

    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(pipeline.steps().len(), 1);
    assert_eq!(pipeline.state(), PipelineState::PreparedFailed);
    assert!(matches!(
        pipeline.prepare_error(),
        Some(StepflowError::Prepare(_))
    ));
}

#[tokio::test]
async fn test_async_definition() {
    struct Downloads;

    #[async_trait]
    impl PipelineDefinition<QueueRunner> for Downloads {
        async fn build(&self, runner: &QueueRunner) -> anyhow::Result<bool> {
            tokio::task::yield_now().await;
            for i in 0..3 {
                runner.queue(Arc::new(CountingStep::new(format!("file-{i}"))))?;
            }
            Ok(true)
        }
    }

    let pipeline = Pipeline::producer_consumer(Downloads, 2).unwrap();
    pipeline.run(&CancellationToken::new()).await.unwrap();

    assert_eq!(pipeline.steps().len(), 3);
    pipeline.steps().iter().for_each(assert_step_succeeded);
}

#[tokio::test]
async fn test_pre_cancelled_token_runs_nothing() {
    let token = CancellationToken::new();
    token.cancel("user abort");

    let step = Arc::new(CountingStep::new("counted"));
    let steps: Vec<Arc<dyn Step>> = vec![step.clone()];

    let sequential = Pipeline::sequential(steps_definition(steps.clone()));
    assert_cancelled(&sequential.run(&token).await);

    let parallel = Pipeline::parallel(steps_definition(steps.clone()), 2).unwrap();
    assert_cancelled(&parallel.run(&token).await);

    let queue = Pipeline::producer_consumer(steps_definition(steps), 2).unwrap();
    assert_cancelled(&queue.run(&token).await);

    assert_eq!(step.count(), 0);
}

#[tokio::test]
async fn test_sequential_order_and_fail_fast() {
    let log = ExecutionLog::new();
    let steps: Vec<Arc<dyn Step>> = vec![
        Arc::new(RecordingStep::new("a", &log)),
        Arc::new(FailingStep::new("b", "disk full")),
        Arc::new(RecordingStep::new("c", &log)),
    ];
    let pipeline = Pipeline::sequential(steps_definition(steps));

    let err = pipeline.run(&CancellationToken::new()).await.unwrap_err();

    assert_eq!(err.to_string(), "Pipeline failed: b: disk full");
    assert_eq!(log.entries(), vec!["a".to_string()]);
    assert_eq!(pipeline.state(), PipelineState::Faulted);
    assert_step_not_run(&pipeline.steps()[2]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_parallel_fail_fast_stops_pending_sibling() {
    let slow = Arc::new(SlowStep::new("slow", Duration::from_secs(10)));
    let steps: Vec<Arc<dyn Step>> = vec![
        Arc::new(FailingStep::new("bad", "boom").with_delay(Duration::from_millis(10))),
        slow.clone(),
    ];
    let pipeline = Pipeline::parallel(steps_definition(steps), 2).unwrap();

    let err = tokio::time::timeout(
        Duration::from_secs(5),
        pipeline.run(&CancellationToken::new()),
    )
    .await
    .unwrap()
    .unwrap_err();

    assert!(matches!(err, StepflowError::PipelineFailed(_)));
    assert_failed_steps(&err, &["bad"]);
    assert!(!slow.completed());
    assert_eq!(pipeline.observed_failures(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 3)]
async fn test_continue_on_failure_runs_the_rest() {
    for strategy in [
        RunnerStrategy::Sequential,
        RunnerStrategy::Parallel,
        RunnerStrategy::ProducerConsumer,
    ] {
        let ok1 = Arc::new(CountingStep::new("ok1"));
        let ok2 = Arc::new(CountingStep::new("ok2"));
        let steps: Vec<Arc<dyn Step>> = vec![
            ok1.clone(),
            Arc::new(FailingStep::new("bad", "boom")),
            ok2.clone(),
        ];
        let config = RunnerConfig::new()
            .with_strategy(strategy)
            .with_workers(3)
            .with_fail_fast(false);
        let pipeline = Pipeline::from_config(steps_definition(steps), &config).unwrap();

        let err = pipeline.run(&CancellationToken::new()).await.unwrap_err();

        assert_failed_steps(&err, &["bad"]);
        assert_eq!(ok1.count(), 1, "{strategy}");
        assert_eq!(ok2.count(), 1, "{strategy}");
    }
}

#[tokio::test]
async fn test_weighted_progress() {
    let sink = Arc::new(CollectingProgressSink::new());
    let reporter = Arc::new(ProgressReporter::new(sink.clone()));

    let small: Arc<dyn Step> = Arc::new(CountingStep::new("small").with_size(4));
    let big: Arc<dyn Step> = Arc::new(ReportingStep {
        name: "big".to_string(),
        size: 6,
        fraction: 0.5,
        reporter: reporter.clone(),
    });
    let pipeline = Pipeline::sequential(steps_definition(vec![small, big]));

    assert!(pipeline.prepare().await);
    assert_eq!(reporter.register_runner(pipeline.runner()), 2);
    pipeline.run(&CancellationToken::new()).await.unwrap();

    let updates = sink.updates();
    assert_eq!(updates.len(), 1);
    assert!((updates[0].fraction - 0.3).abs() < 1e-9);
    assert_eq!(updates[0].step.as_deref(), Some("big"));
}

#[tokio::test]
async fn test_unregistered_progress_is_dropped() {
    let sink = Arc::new(CollectingProgressSink::new());
    let reporter = Arc::new(ProgressReporter::new(sink.clone()));
    let step: Arc<dyn Step> = Arc::new(ReportingStep {
        name: "stranger".to_string(),
        size: 6,
        fraction: 0.5,
        reporter,
    });

    Pipeline::sequential(steps_definition(vec![step]))
        .run(&CancellationToken::new())
        .await
        .unwrap();
    assert!(sink.is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_wait_bridge_stops_sequence_without_failing() {
    let background = ParallelRunner::new(2).unwrap();
    background
        .add_step(Arc::new(FailingStep::new("remote", "checksum mismatch")))
        .unwrap();
    background.start(&CancellationToken::new()).unwrap();

    let log = ExecutionLog::new();
    let steps: Vec<Arc<dyn Step>> = vec![
        Arc::new(RecordingStep::new("a", &log)),
        Arc::new(WaitStep::new("join", background.clone())),
        Arc::new(RecordingStep::new("c", &log)),
    ];
    let pipeline = Pipeline::sequential(steps_definition(steps));

    pipeline.run(&CancellationToken::new()).await.unwrap();

    assert_eq!(log.entries(), vec!["a".to_string()]);
    assert_eq!(pipeline.state(), PipelineState::Completed);
    assert!(pipeline.failures().is_empty());
    assert_eq!(background.failures().len(), 1);
}

#[tokio::test]
async fn test_wait_on_unstarted_runner_fails_pipeline() {
    let background = ParallelRunner::new(1).unwrap();
    let work = Arc::new(CountingStep::new("work"));
    background.add_step(work.clone()).unwrap();

    let after = Arc::new(CountingStep::new("after"));
    let steps: Vec<Arc<dyn Step>> = vec![
        Arc::new(WaitStep::new("join", background)),
        after.clone(),
    ];
    let pipeline = Pipeline::sequential(steps_definition(steps));

    let err = pipeline.run(&CancellationToken::new()).await.unwrap_err();

    assert_failed_steps(&err, &["join"]);
    assert_eq!(work.count(), 0);
    assert_eq!(after.count(), 0);
    assert_eq!(pipeline.state(), PipelineState::Faulted);
}

#[tokio::test]
async fn test_wait_timeout_zero_is_timeout() {
    let runner = QueueRunner::new(1).unwrap();
    let token = CancellationToken::new();
    runner.start(&token).unwrap();
    runner
        .queue(Arc::new(SlowStep::new("slow", Duration::from_secs(10))))
        .unwrap();

    let err = runner.wait_timeout(Duration::ZERO).await.unwrap_err();
    assert!(err.is_timeout());
    assert!(!err.is_cancelled());
    assert!(!token.is_cancelled());

    token.cancel("cleanup");
    runner.finish();
    assert_cancelled(&runner.wait().await);
}

#[tokio::test]
async fn test_finished_runs_release_the_caller_token() {
    let caller = CancellationToken::new();

    for _ in 0..100 {
        let steps: Vec<Arc<dyn Step>> = vec![Arc::new(CountingStep::new("tick"))];
        let pipeline = Pipeline::parallel(steps_definition(steps), 2).unwrap();
        pipeline.run(&caller).await.unwrap();
    }
    tokio::task::yield_now().await;

    assert_eq!(caller.listener_count(), 0);
}

#[tokio::test]
async fn test_second_run_is_invalid() {
    let pipeline = Pipeline::sequential(empty());
    pipeline.run(&CancellationToken::new()).await.unwrap();

    let err = pipeline.run(&CancellationToken::new()).await.unwrap_err();
    assert!(matches!(err, StepflowError::InvalidState(_)));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_cancel_during_run() {
    let waiter = Arc::new(CancelAwareStep::new("waiter"));
    let steps: Vec<Arc<dyn Step>> = vec![waiter.clone()];
    let pipeline = Arc::new(Pipeline::parallel(steps_definition(steps), 1).unwrap());

    let task = {
        let pipeline = pipeline.clone();
        tokio::spawn(async move { pipeline.run(&CancellationToken::new()).await })
    };

    tokio::time::sleep(Duration::from_millis(20)).await;
    pipeline.cancel("operator abort");

    let result = tokio::time::timeout(Duration::from_secs(5), task)
        .await
        .unwrap()
        .unwrap();
    assert_cancelled(&result);
    assert_eq!(pipeline.state(), PipelineState::Canceled);
    assert_eq!(waiter.observed_reason().as_deref(), Some("operator abort"));
    assert!(pipeline.failures().is_empty());
}

#[tokio::test]
async fn test_caller_cancellation_between_steps() {
    let token = CancellationToken::new();
    let trigger = token.clone();
    let after = Arc::new(CountingStep::new("after"));
    let steps: Vec<Arc<dyn Step>> = vec![
        Arc::new(FnStep::new("cancel", move |_| {
            trigger.cancel("caller abort");
            StepOutcome::Completed
        })),
        after.clone(),
    ];
    let pipeline = Pipeline::sequential(steps_definition(steps));

    assert_cancelled(&pipeline.run(&token).await);
    assert_eq!(after.count(), 0);
    assert_eq!(pipeline.state(), PipelineState::Canceled);
}

#[tokio::test]
async fn test_observer_is_scoped_to_the_run() {
    let steps: Vec<Arc<dyn Step>> = vec![Arc::new(FailingStep::new("bad", "boom"))];
    let pipeline = Pipeline::sequential(steps_definition(steps));

    let _ = pipeline.run(&CancellationToken::new()).await;

    assert_eq!(pipeline.observed_failures(), 1);
    assert!(pipeline.runner().observers().is_empty());
}

#[tokio::test]
async fn test_close_releases_steps() {
    let steps: Vec<Arc<dyn Step>> = vec![Arc::new(CountingStep::new("a"))];
    let pipeline = Pipeline::sequential(steps_definition(steps)).with_name("cleanup");
    pipeline.run(&CancellationToken::new()).await.unwrap();
    assert_eq!(pipeline.steps().len(), 1);

    pipeline.close();
    assert!(pipeline.steps().is_empty());
    assert!(pipeline.token().is_cancelled());
}

#[tokio::test]
async fn test_drop_cancels_background_work() {
    let waiter = Arc::new(CancelAwareStep::new("waiter"));
    let runner = QueueRunner::new(1).unwrap();
    runner.queue(waiter.clone()).unwrap();

    let pipeline = Pipeline::with_runner(empty(), runner.clone());
    let caller = CancellationToken::new();
    // the run parks on the waiter; abandon it
    let _ = tokio::time::timeout(Duration::from_millis(20), pipeline.run(&caller)).await;
    drop(pipeline);

    let result = tokio::time::timeout(Duration::from_secs(5), runner.wait())
        .await
        .unwrap();
    assert_cancelled(&result);
    assert!(waiter.observed_cancel());
}
