//! Claim protocol against a file database
//!
//! Every Ready job is claimed by exactly one worker, highest priority first,
//! and only from the queues the worker subscribes to.

mod common;

use common::{retry_config, worker_config, Harness};
use quarry_core::application::HandlerRegistry;
use quarry_core::domain::{JobStatus, NewJob, QueueSelector};
use quarry_core::port::JobStore;
use std::collections::HashSet;

#[tokio::test]
async fn test_concurrent_claims_never_overlap() {
    let h = Harness::new().await;
    let mut enqueued = HashSet::new();
    for i in 0..60 {
        let id = h
            .enqueue(NewJob::new("default", "Job").with_arguments(serde_json::json!([i])))
            .await;
        enqueued.insert(id);
    }

    let mut tasks = Vec::new();
    for n in 0..8u32 {
        let process = h.register_worker(&format!("worker-{}", n), 100 + n).await;
        let worker = h.worker(worker_config(&["*"], 3), HandlerRegistry::new(), retry_config(1, 0));
        tasks.push(tokio::spawn(async move {
            let mut mine = Vec::new();
            loop {
                let claimed = worker.claim(process.id).await.unwrap();
                if claimed.is_empty() {
                    break;
                }
                for c in claimed {
                    assert_eq!(c.claim.process_id, Some(process.id));
                    mine.push(c.job.id);
                }
            }
            mine
        }));
    }

    let mut claimed = Vec::new();
    for task in tasks {
        claimed.extend(task.await.unwrap());
    }

    let unique: HashSet<i64> = claimed.iter().copied().collect();
    assert_eq!(claimed.len(), 60, "every job claimed once");
    assert_eq!(unique, enqueued, "no job claimed twice");

    for id in unique {
        assert_eq!(h.store.job_status(id).await.unwrap(), JobStatus::Claimed);
    }
}

#[tokio::test]
async fn test_claim_order_is_priority_then_age() {
    let h = Harness::new().await;
    let low = h.enqueue(NewJob::new("default", "Low")).await;
    let high_old = h.enqueue(NewJob::new("default", "High").with_priority(10)).await;
    let high_new = h.enqueue(NewJob::new("default", "High").with_priority(10)).await;
    let mid = h.enqueue(NewJob::new("default", "Mid").with_priority(5)).await;

    let worker = h.register_worker("w", 100).await;
    let mut order = Vec::new();
    for _ in 0..4 {
        let claimed = h.store.claim(worker.id, &QueueSelector::all(), 1).await.unwrap();
        assert_eq!(claimed.len(), 1);
        order.push(claimed[0].job.id);
    }

    assert_eq!(order, vec![high_old, high_new, mid, low]);
    assert!(h.store.claim(worker.id, &QueueSelector::all(), 1).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_worker_only_claims_subscribed_queues() {
    let h = Harness::new().await;
    let mail = h.enqueue(NewJob::new("mail", "Send")).await;
    let report = h.enqueue(NewJob::new("reports_daily", "Build")).await;
    let other = h.enqueue(NewJob::new("billing", "Charge")).await;

    let process = h.register_worker("w", 100).await;
    let worker = h.worker(
        worker_config(&["mail", "reports*"], 10),
        HandlerRegistry::new(),
        retry_config(1, 0),
    );

    let claimed: HashSet<i64> = worker
        .claim(process.id)
        .await
        .unwrap()
        .into_iter()
        .map(|c| c.job.id)
        .collect();

    assert_eq!(claimed, HashSet::from([mail, report]));
    assert_eq!(h.store.job_status(other).await.unwrap(), JobStatus::Ready);
}

#[tokio::test]
async fn test_claimed_job_is_not_claimable_after_finish() {
    let h = Harness::new().await;
    let id = h.enqueue(NewJob::new("default", "Once")).await;
    let worker = h.register_worker("w", 100).await;

    let claimed = h.store.claim(worker.id, &QueueSelector::all(), 5).await.unwrap();
    assert_eq!(claimed.len(), 1);
    assert_eq!(claimed[0].job.attempts, 1);

    h.store.mark_finished(id).await.unwrap();
    // Second finish is a no-op
    h.store.mark_finished(id).await.unwrap();

    assert_eq!(h.store.job_status(id).await.unwrap(), JobStatus::Finished);
    assert!(h.store.claim(worker.id, &QueueSelector::all(), 5).await.unwrap().is_empty());
}
