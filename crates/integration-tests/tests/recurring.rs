//! Recurring tasks: each fire time becomes exactly one job

mod common;

use common::{Harness, T0};
use quarry_core::domain::{JobStatus, RecurringTask};
use quarry_core::port::{JobStore, RecurringTaskStore};
use serde_json::json;

const HOUR_MS: i64 = 60 * 60 * 1000;

fn hourly(key: &str) -> RecurringTask {
    RecurringTask::new(key, "0 * * * *", "HourlyReport")
        .with_queue("reports")
        .with_priority(3)
        .with_arguments(json!({"scope": key}))
}

async fn recurring_rows(h: &Harness, key: &str) -> i64 {
    sqlx::query_scalar("SELECT COUNT(*) FROM recurring_executions WHERE task_key = ?")
        .bind(key)
        .fetch_one(&h.pool)
        .await
        .unwrap()
}

#[tokio::test]
async fn test_sync_upserts_and_removes_tasks() {
    let h = Harness::new().await;
    let scheduler = h.scheduler();

    let stored = scheduler.sync(&[hourly("a"), hourly("b")]).await.unwrap();
    assert_eq!(stored.len(), 2);
    assert!(stored.iter().all(|t| t.next_at == Some(T0 + HOUR_MS)));

    // "b" dropped from configuration, "a" moved to every 15 minutes
    let mut a = hourly("a");
    a.schedule = "*/15 * * * *".to_string();
    let stored = scheduler.sync(&[a]).await.unwrap();
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].key, "a");
    assert_eq!(stored[0].next_at, Some(T0 + 15 * 60 * 1000));
}

#[tokio::test]
async fn test_due_task_materializes_once() {
    let h = Harness::new().await;
    let scheduler = h.scheduler();
    scheduler.sync(&[hourly("report")]).await.unwrap();

    assert!(scheduler.materialize_due(10).await.unwrap().is_empty());

    h.clock.advance(HOUR_MS);
    let created = scheduler.materialize_due(10).await.unwrap();
    assert_eq!(created.len(), 1);
    assert!(scheduler.materialize_due(10).await.unwrap().is_empty());

    let job = h.store.find_job(created[0]).await.unwrap().unwrap();
    assert_eq!(job.class_name, "HourlyReport");
    assert_eq!(job.queue_name, "reports");
    assert_eq!(job.priority, 3);
    assert_eq!(job.arguments.as_value(), &json!({"scope": "report"}));
    assert_eq!(job.scheduled_at, Some(T0 + HOUR_MS));
    assert_eq!(h.store.job_status(job.id).await.unwrap(), JobStatus::Ready);
    assert_eq!(recurring_rows(&h, "report").await, 1);

    let task = h.recurring.list().await.unwrap().pop().unwrap();
    assert_eq!(task.next_at, Some(T0 + 2 * HOUR_MS));
}

#[tokio::test]
async fn test_racing_schedulers_create_one_job() {
    let h = Harness::new().await;
    h.scheduler().sync(&[hourly("race")]).await.unwrap();
    h.clock.advance(HOUR_MS);

    let mut tasks = Vec::new();
    for _ in 0..4 {
        let scheduler = h.scheduler();
        tasks.push(tokio::spawn(async move { scheduler.materialize_due(10).await.unwrap() }));
    }

    let mut created = Vec::new();
    for task in tasks {
        created.extend(task.await.unwrap());
    }
    assert_eq!(created.len(), 1);
    assert_eq!(recurring_rows(&h, "race").await, 1);
}

#[tokio::test]
async fn test_same_run_is_not_materialized_twice() {
    let h = Harness::new().await;
    let stored = h.scheduler().sync(&[hourly("dup")]).await.unwrap();
    let task = &stored[0];
    let run_at = T0 + HOUR_MS;
    h.clock.set(run_at);

    let first = h
        .recurring
        .materialize(task, run_at, Some(run_at + HOUR_MS))
        .await
        .unwrap();
    assert!(first.is_some());

    // Stale view of the task: next_at no longer matches
    let second = h
        .recurring
        .materialize(task, run_at, Some(run_at + HOUR_MS))
        .await
        .unwrap();
    assert!(second.is_none());
    assert_eq!(recurring_rows(&h, "dup").await, 1);
}

#[tokio::test]
async fn test_missed_fires_are_skipped() {
    let h = Harness::new().await;
    let scheduler = h.scheduler();
    scheduler.sync(&[hourly("catchup")]).await.unwrap();

    // Down for five and a half hours
    h.clock.advance(5 * HOUR_MS + HOUR_MS / 2);
    let created = scheduler.materialize_due(10).await.unwrap();
    assert_eq!(created.len(), 1);

    let task = h.recurring.list().await.unwrap().pop().unwrap();
    assert_eq!(task.next_at, Some(T0 + 6 * HOUR_MS));
    assert!(scheduler.materialize_due(10).await.unwrap().is_empty());
}
