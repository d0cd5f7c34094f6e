//! Execution slots and their circuit breakers

mod common;

use common::{eventually, retry_config, worker_config, Harness};
use quarry_core::application::{shutdown_channel, HandlerRegistry, SlotExit, WorkerExit};
use quarry_core::config::{CircuitBreakerConfig, WorkerConfig};
use quarry_core::domain::{JobStatus, NewJob};
use quarry_core::port::job_handler::mocks::{Outcome, ScriptedHandler};
use quarry_core::port::{ExecutionError, JobStore};
use std::sync::Arc;
use std::time::Duration;

/// Breaker that trips once more than `threshold` errors land in one window
fn breaker_config(threads: usize, threshold: u32) -> WorkerConfig {
    WorkerConfig {
        threads,
        circuit_breaker: CircuitBreakerConfig {
            threshold,
            reset_window_ms: 60_000,
        },
        ..worker_config(&["*"], 1)
    }
}

async fn statuses(h: &Harness, ids: &[i64]) -> Vec<JobStatus> {
    let mut out = Vec::new();
    for id in ids {
        out.push(h.store.job_status(*id).await.unwrap());
    }
    out
}

#[tokio::test]
async fn test_tripped_slot_stops_while_another_keeps_claiming() {
    let h = Harness::new().await;
    let mut ids = Vec::new();
    for _ in 0..5 {
        ids.push(h.enqueue(NewJob::new("default", "Work")).await);
    }

    // Two failures, then the handler recovers
    let handler = ScriptedHandler::succeeding()
        .then(Outcome::Fail(ExecutionError::failed("Boom", "first")))
        .then(Outcome::Fail(ExecutionError::failed("Boom", "second")));
    let mut handlers = HandlerRegistry::new();
    handlers.register("Work", Arc::new(handler.clone()));

    let process = h.register_worker("w", 100).await;
    let worker = h.worker(breaker_config(2, 1), handlers, retry_config(1, 0));
    let (tx, token) = shutdown_channel();

    let exit = tokio::time::timeout(
        Duration::from_secs(5),
        worker.run_slot(process.id, 0, token.clone()),
    )
    .await
    .unwrap();
    assert_eq!(exit, SlotExit::Tripped);
    assert_eq!(handler.call_count(), 2);
    assert_eq!(
        statuses(&h, &ids).await,
        vec![
            JobStatus::Failed,
            JobStatus::Failed,
            JobStatus::Ready,
            JobStatus::Ready,
            JobStatus::Ready,
        ]
    );

    // A fresh slot on the same worker drains the rest
    let other = worker.clone();
    let slot = tokio::spawn(async move { other.run_slot(process.id, 1, token).await });
    let rest = ids[2..].to_vec();
    eventually("remaining jobs finished", || async {
        statuses(&h, &rest).await.iter().all(|s| *s == JobStatus::Finished)
    })
    .await;

    tx.shutdown();
    let exit = tokio::time::timeout(Duration::from_secs(5), slot)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(exit, SlotExit::Shutdown);
}

#[tokio::test]
async fn test_worker_exits_when_every_slot_trips() {
    let h = Harness::new().await;
    let mut ids = Vec::new();
    for _ in 0..4 {
        ids.push(h.enqueue(NewJob::new("default", "Work")).await);
    }

    let handler = ScriptedHandler::failing("Boom", "always");
    let mut handlers = HandlerRegistry::new();
    handlers.register("Work", Arc::new(handler.clone()));

    let process = h.register_worker("w", 100).await;
    // Threshold 0: the first error stops a slot
    let worker = h.worker(breaker_config(2, 0), handlers, retry_config(1, 0));
    let (_tx, token) = shutdown_channel();

    let exit = tokio::time::timeout(Duration::from_secs(10), worker.run(process.id, token))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(exit, WorkerExit::AllSlotsTripped);
    assert_eq!(handler.call_count(), 2);

    let states = statuses(&h, &ids).await;
    assert_eq!(states.iter().filter(|s| **s == JobStatus::Failed).count(), 2);
    assert_eq!(states.iter().filter(|s| **s == JobStatus::Ready).count(), 2);
}

#[tokio::test]
async fn test_worker_shutdown_honors_configured_grace_period() {
    let h = Harness::new().await;
    h.enqueue(NewJob::new("default", "Slow")).await;

    let handler = ScriptedHandler::new(Outcome::Sleep(Duration::from_secs(30)));
    let mut handlers = HandlerRegistry::new();
    handlers.register("Slow", Arc::new(handler.clone()));

    let process = h.register_worker("w", 100).await;
    let worker = h
        .worker(breaker_config(1, 10), handlers, retry_config(1, 0))
        .with_shutdown_timeout(Duration::from_millis(100));
    let (tx, token) = shutdown_channel();
    let run = tokio::spawn(async move { worker.run(process.id, token).await });

    eventually("job picked up", || async { handler.call_count() == 1 }).await;
    tx.shutdown();

    // Well under the 5s default and the 30s job
    let exit = tokio::time::timeout(Duration::from_secs(2), run)
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    assert_eq!(exit, WorkerExit::Shutdown);
}
