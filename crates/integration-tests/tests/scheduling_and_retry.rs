//! Scheduled jobs, worker outcomes and the retry path

mod common;

use common::{retry_config, worker_config, Harness, PROCESS_TIMEOUT_MS};
use quarry_core::application::{Dispatcher, EnqueueRequest, HandlerRegistry, JobOutcome, JobService};
use quarry_core::config::{DispatcherConfig, RetryRule};
use quarry_core::domain::{JobStatus, NewJob, ProcessKind, QueueSelector};
use quarry_core::port::job_handler::mocks::{Outcome, ScriptedHandler};
use quarry_core::port::{ExecutionError, JobStore};
use serde_json::json;
use std::sync::Arc;

fn dispatcher(h: &Harness) -> Dispatcher {
    Dispatcher::new(
        DispatcherConfig {
            process_timeout_ms: PROCESS_TIMEOUT_MS,
            ..DispatcherConfig::default()
        },
        h.store.clone(),
        h.registry.clone(),
        h.scheduler(),
        h.reclaimer(),
        h.clock.clone(),
    )
}

#[tokio::test]
async fn test_scheduled_job_waits_for_promotion() {
    let h = Harness::new().await;
    let service = JobService::new(h.store.clone(), h.clock.clone());
    let (id, status) = service
        .enqueue_in(EnqueueRequest::new("default", "Later"), 60_000)
        .await
        .unwrap();
    assert_eq!(status, JobStatus::Scheduled);

    let worker = h.register_worker("w", 100).await;
    let dispatcher_row = h.register(ProcessKind::Dispatcher, "d", 101, None).await;
    let dispatcher = dispatcher(&h);

    // Not due yet
    let report = dispatcher.run_cycle(dispatcher_row.id, false).await.unwrap();
    assert_eq!(report.promoted, 0);
    assert!(h.store.claim(worker.id, &QueueSelector::all(), 1).await.unwrap().is_empty());

    h.clock.advance(60_000);
    let report = dispatcher.run_cycle(dispatcher_row.id, false).await.unwrap();
    assert_eq!(report.promoted, 1);
    assert_eq!(h.store.job_status(id).await.unwrap(), JobStatus::Ready);

    let claimed = h.store.claim(worker.id, &QueueSelector::all(), 1).await.unwrap();
    assert_eq!(claimed[0].job.id, id);
}

#[tokio::test]
async fn test_failures_back_off_then_exhaust() {
    let h = Harness::new().await;
    let id = h.enqueue(NewJob::new("default", "Flaky")).await;

    let handler = ScriptedHandler::failing("Timeout", "upstream timed out");
    let mut handlers = HandlerRegistry::new();
    handlers.register("Flaky", Arc::new(handler.clone()));

    let process = h.register_worker("w", 100).await;
    let dispatcher_row = h.register(ProcessKind::Dispatcher, "d", 101, None).await;
    let dispatcher = dispatcher(&h);
    let worker = h.worker(worker_config(&["*"], 1), handlers, retry_config(3, 1_000));

    // Attempt 1: retry in 1s
    let claimed = worker.claim(process.id).await.unwrap().pop().unwrap();
    let outcome = worker.process_job(claimed).await.unwrap();
    assert_eq!(outcome, JobOutcome::Retrying { delay_ms: 1_000 });
    assert_eq!(h.store.job_status(id).await.unwrap(), JobStatus::Scheduled);
    assert!(h.store.failed_execution(id).await.unwrap().is_none());

    h.clock.advance(1_000);
    dispatcher.run_cycle(dispatcher_row.id, false).await.unwrap();

    // Attempt 2: retry in 2s
    let claimed = worker.claim(process.id).await.unwrap().pop().unwrap();
    assert_eq!(claimed.job.attempts, 2);
    let outcome = worker.process_job(claimed).await.unwrap();
    assert_eq!(outcome, JobOutcome::Retrying { delay_ms: 2_000 });

    h.clock.advance(2_000);
    dispatcher.run_cycle(dispatcher_row.id, false).await.unwrap();

    // Attempt 3: out of attempts
    let claimed = worker.claim(process.id).await.unwrap().pop().unwrap();
    let outcome = worker.process_job(claimed).await.unwrap();
    assert_eq!(outcome, JobOutcome::Failed);
    assert_eq!(handler.call_count(), 3);

    assert_eq!(h.store.job_status(id).await.unwrap(), JobStatus::Failed);
    let failed = h.store.failed_execution(id).await.unwrap().unwrap();
    assert_eq!(failed.error.error_class, "Timeout");
    assert_eq!(failed.error.message, "upstream timed out");
}

#[tokio::test]
async fn test_retry_rule_per_error_class() {
    let h = Harness::new().await;
    let id = h.enqueue(NewJob::new("default", "Flaky")).await;

    let mut handlers = HandlerRegistry::new();
    handlers.register(
        "Flaky",
        Arc::new(ScriptedHandler::failing("Deadlock", "try again")),
    );

    let mut retry = retry_config(1, 1_000);
    retry.rules.insert(
        "Deadlock".to_string(),
        RetryRule {
            max_attempts: 5,
            base_delay_ms: 250,
            backoff_factor: 2.0,
            jitter: 0.0,
            ..RetryRule::default()
        },
    );

    let process = h.register_worker("w", 100).await;
    let worker = h.worker(worker_config(&["*"], 1), handlers, retry);

    let claimed = worker.claim(process.id).await.unwrap().pop().unwrap();
    let outcome = worker.process_job(claimed).await.unwrap();
    assert_eq!(outcome, JobOutcome::Retrying { delay_ms: 250 });
    assert_eq!(h.store.job_status(id).await.unwrap(), JobStatus::Scheduled);
}

#[tokio::test]
async fn test_panics_and_unknown_handlers_are_recorded() {
    let h = Harness::new().await;
    let panics = h.enqueue(NewJob::new("default", "Panics")).await;
    let unknown = h.enqueue(NewJob::new("default", "NobodyHandlesThis")).await;

    let mut handlers = HandlerRegistry::new();
    handlers.register(
        "Panics",
        Arc::new(ScriptedHandler::new(Outcome::Panic("boom".to_string()))),
    );

    let process = h.register_worker("w", 100).await;
    let worker = h.worker(worker_config(&["*"], 2), handlers, retry_config(1, 0));

    for claimed in worker.claim(process.id).await.unwrap() {
        assert_eq!(worker.process_job(claimed).await.unwrap(), JobOutcome::Failed);
    }

    let failed = h.store.failed_execution(panics).await.unwrap().unwrap();
    assert_eq!(failed.error.error_class, "PanicError");
    assert!(failed.error.message.contains("boom"));

    let failed = h.store.failed_execution(unknown).await.unwrap().unwrap();
    assert_eq!(failed.error.error_class, "UnknownHandlerError");
    assert!(failed.error.message.contains("NobodyHandlesThis"));
}

#[tokio::test]
async fn test_enveloped_job_runs_inner_class() {
    let h = Harness::new().await;
    let id = h
        .enqueue(
            NewJob::new("default", "ActiveJob::Wrapper")
                .with_active_job_id("aj-1")
                .with_arguments(json!({"job_class": "SendEmail", "arguments": ["a@example.com"]})),
        )
        .await;

    let handler = ScriptedHandler::succeeding();
    let mut handlers = HandlerRegistry::new();
    handlers.register("SendEmail", Arc::new(handler.clone()));

    let process = h.register_worker("w", 100).await;
    let worker = h.worker(worker_config(&["*"], 1), handlers, retry_config(1, 0));
    let claimed = worker.claim(process.id).await.unwrap().pop().unwrap();
    assert_eq!(worker.process_job(claimed).await.unwrap(), JobOutcome::Finished);

    assert_eq!(handler.calls(), vec![(id, json!(["a@example.com"]))]);
    assert_eq!(h.store.job_status(id).await.unwrap(), JobStatus::Finished);
}

#[tokio::test]
async fn test_manual_retry_after_permanent_failure() {
    let h = Harness::new().await;
    let service = JobService::new(h.store.clone(), h.clock.clone());
    let (id, _) = service
        .enqueue(EnqueueRequest::new("default", "Fixed"))
        .await
        .unwrap();

    let handler = ScriptedHandler::succeeding().then(Outcome::Fail(ExecutionError::failed("Bug", "nil")));
    let mut handlers = HandlerRegistry::new();
    handlers.register("Fixed", Arc::new(handler.clone()));

    let process = h.register_worker("w", 100).await;
    let worker = h.worker(worker_config(&["*"], 1), handlers, retry_config(1, 0));

    let claimed = worker.claim(process.id).await.unwrap().pop().unwrap();
    assert_eq!(worker.process_job(claimed).await.unwrap(), JobOutcome::Failed);
    assert_eq!(service.job_status(id).await.unwrap(), JobStatus::Failed);

    assert_eq!(service.retry(id).await.unwrap(), JobStatus::Ready);
    assert!(h.store.failed_execution(id).await.unwrap().is_none());

    let claimed = worker.claim(process.id).await.unwrap().pop().unwrap();
    assert_eq!(claimed.job.attempts, 2);
    assert_eq!(worker.process_job(claimed).await.unwrap(), JobOutcome::Finished);
    assert_eq!(service.job_status(id).await.unwrap(), JobStatus::Finished);

    // Finished jobs cannot be retried
    assert!(service.retry(id).await.unwrap_err().to_string().contains("no failed execution"));
}

#[tokio::test]
async fn test_late_attempt_backoff_is_capped() {
    let h = Harness::new().await;
    let id = h.enqueue(NewJob::new("default", "Flaky")).await;

    let mut handlers = HandlerRegistry::new();
    handlers.register("Flaky", Arc::new(ScriptedHandler::failing("Timeout", "again")));

    let mut retry = retry_config(100, 1_000);
    retry.default.max_delay_ms = 60 * 60 * 1000;

    let process = h.register_worker("w", 100).await;
    let worker = h.worker(worker_config(&["*"], 1), handlers, retry);

    // 1_000 * 2^69 ms is far past anything a timestamp can hold
    let mut claimed = worker.claim(process.id).await.unwrap().pop().unwrap();
    claimed.job.attempts = 70;
    let outcome = worker.process_job(claimed).await.unwrap();
    assert_eq!(outcome, JobOutcome::Retrying { delay_ms: 60 * 60 * 1000 });

    assert_eq!(h.store.job_status(id).await.unwrap(), JobStatus::Scheduled);
    let job = h.store.find_job(id).await.unwrap().unwrap();
    assert_eq!(job.scheduled_at, Some(common::T0 + 60 * 60 * 1000));
}

#[tokio::test]
async fn test_enqueue_in_saturates_far_future_delay() {
    let h = Harness::new().await;
    let service = JobService::new(h.store.clone(), h.clock.clone());

    let (id, status) = service
        .enqueue_in(EnqueueRequest::new("default", "Later"), i64::MAX)
        .await
        .unwrap();
    assert_eq!(status, JobStatus::Scheduled);
    let job = service.find_job(id).await.unwrap();
    assert_eq!(job.scheduled_at, Some(i64::MAX));
}
