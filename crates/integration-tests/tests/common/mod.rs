//! Shared setup: a file-backed SQLite database with the real adapters,
//! a manual clock and a static process probe.

#![allow(dead_code)]

use quarry_core::application::{
    HandlerRegistry, OrphanReclaimer, RecurringScheduler, RetryPolicy, Worker,
};
use quarry_core::config::{RetryConfig, RetryRule, WorkerConfig};
use quarry_core::domain::{NewJob, NewProcess, Process, ProcessId, ProcessKind, QueueSelector};
use quarry_core::port::process_probe::mocks::StaticProbe;
use quarry_core::port::time_provider::mocks::ManualClock;
use quarry_core::port::{JobStore, ProcessRegistry};
use quarry_infra_sqlite::{
    create_pool, run_migrations, SqliteJobStore, SqliteProcessRegistry, SqliteRecurringTaskStore,
};
use sqlx::SqlitePool;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

/// 2024-01-01T00:00:00Z
pub const T0: i64 = 1_704_067_200_000;
pub const HOST: &str = "test-host";
pub const ENGINE_PID: u32 = 4242;
pub const PROCESS_TIMEOUT_MS: i64 = 30_000;

pub struct Harness {
    _dir: TempDir,
    pub pool: SqlitePool,
    pub clock: Arc<ManualClock>,
    pub probe: Arc<StaticProbe>,
    pub store: Arc<SqliteJobStore>,
    pub registry: Arc<SqliteProcessRegistry>,
    pub recurring: Arc<SqliteRecurringTaskStore>,
}

impl Harness {
    pub async fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let url = format!("sqlite://{}", dir.path().join("quarry.db").display());
        let pool = create_pool(&url).await.unwrap();
        run_migrations(&pool).await.unwrap();

        let clock = Arc::new(ManualClock::new(T0));
        Self {
            _dir: dir,
            store: Arc::new(SqliteJobStore::new(pool.clone(), clock.clone())),
            registry: Arc::new(SqliteProcessRegistry::new(pool.clone(), clock.clone())),
            recurring: Arc::new(SqliteRecurringTaskStore::new(pool.clone(), clock.clone())),
            probe: Arc::new(StaticProbe::new(HOST, ENGINE_PID)),
            pool,
            clock,
        }
    }

    pub async fn register(&self, kind: ProcessKind, name: &str, pid: u32, supervisor_id: Option<ProcessId>) -> Process {
        self.probe.spawn(pid);
        self.registry
            .register(NewProcess {
                kind,
                name: name.to_string(),
                pid,
                hostname: HOST.to_string(),
                supervisor_id,
                metadata: serde_json::json!({}),
            })
            .await
            .unwrap()
    }

    pub async fn register_worker(&self, name: &str, pid: u32) -> Process {
        self.register(ProcessKind::Worker, name, pid, None).await
    }

    pub async fn enqueue(&self, job: NewJob) -> i64 {
        self.store.enqueue(job).await.unwrap().0
    }

    pub fn reclaimer(&self) -> OrphanReclaimer {
        OrphanReclaimer::new(
            self.store.clone(),
            self.registry.clone(),
            self.probe.clone(),
            self.clock.clone(),
            PROCESS_TIMEOUT_MS,
        )
    }

    pub fn scheduler(&self) -> RecurringScheduler {
        RecurringScheduler::new(self.recurring.clone(), self.clock.clone())
    }

    pub fn worker(&self, config: WorkerConfig, handlers: HandlerRegistry, retry: RetryConfig) -> Worker {
        Worker::new(
            config,
            self.store.clone(),
            self.registry.clone(),
            Arc::new(handlers),
            Arc::new(RetryPolicy::new(retry)),
            self.clock.clone(),
        )
    }
}

pub fn worker_config(queues: &[&str], batch_size: usize) -> WorkerConfig {
    WorkerConfig {
        queues: QueueSelector::new(queues.iter().copied()),
        threads: 1,
        polling_interval_ms: 10,
        batch_size,
        heartbeat_interval_ms: 50,
        ..WorkerConfig::default()
    }
}

/// Retry rule without jitter so delays are exact
pub fn retry_config(max_attempts: i32, base_delay_ms: i64) -> RetryConfig {
    RetryConfig {
        default: RetryRule {
            max_attempts,
            base_delay_ms,
            backoff_factor: 2.0,
            jitter: 0.0,
            ..RetryRule::default()
        },
        ..RetryConfig::default()
    }
}

/// Poll `check` every 20ms for up to 5s
pub async fn eventually<F, Fut>(what: &str, mut check: F)
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    for _ in 0..250 {
        if check().await {
            return;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("timed out waiting for: {}", what);
}
