//! RPC Method Handlers
//!
//! Implements the business logic for each JSON-RPC method.

use crate::error::to_rpc_error;
use crate::types::{
    EnqueueParams, JobDetails, JobIdParams, JobStatusResult, MaintenanceParams,
    MaintenanceResult, StatsParams,
};
use jsonrpsee::types::ErrorObjectOwned;
use quarry_core::application::{EnqueueRequest, HealthSnapshot, JobService, MaintenanceScheduler, StatsService};
use quarry_core::error::AppError;
use quarry_core::port::JobStore;
use std::sync::Arc;

/// Trailing window for admin.stats.v1 when none is given
const DEFAULT_STATS_WINDOW_SECS: u64 = 3600;

/// RPC Handler with injected dependencies
pub struct RpcHandler {
    jobs: JobService,
    job_store: Arc<dyn JobStore>,
    stats: StatsService,
    /// `None` when maintenance is not wired (admin.maintenance.v1 then fails)
    maintenance: Option<MaintenanceScheduler>,
}

impl RpcHandler {
    pub fn new(
        jobs: JobService,
        job_store: Arc<dyn JobStore>,
        stats: StatsService,
        maintenance: Option<MaintenanceScheduler>,
    ) -> Self {
        Self {
            jobs,
            job_store,
            stats,
            maintenance,
        }
    }

    /// jobs.enqueue.v1
    pub async fn enqueue(&self, params: EnqueueParams) -> Result<JobStatusResult, ErrorObjectOwned> {
        let req = EnqueueRequest {
            queue_name: params.queue_name,
            class_name: params.class_name,
            arguments: params.arguments,
            priority: params.priority,
            scheduled_at: params.scheduled_at,
            active_job_id: params.active_job_id,
            concurrency: params.concurrency,
        };

        let (job_id, status) = self.jobs.enqueue(req).await.map_err(to_rpc_error)?;
        Ok(JobStatusResult { job_id, status })
    }

    /// jobs.status.v1
    pub async fn status(&self, params: JobIdParams) -> Result<JobDetails, ErrorObjectOwned> {
        let job = self.jobs.find_job(params.job_id).await.map_err(to_rpc_error)?;
        let status = self.jobs.job_status(params.job_id).await.map_err(to_rpc_error)?;
        let error = self
            .job_store
            .failed_execution(params.job_id)
            .await
            .map_err(to_rpc_error)?
            .map(|failed| format!("{}: {}", failed.error.error_class, failed.error.message));

        Ok(JobDetails::new(job, status, error))
    }

    /// jobs.retry.v1
    pub async fn retry(&self, params: JobIdParams) -> Result<JobStatusResult, ErrorObjectOwned> {
        let status = self.jobs.retry(params.job_id).await.map_err(to_rpc_error)?;
        Ok(JobStatusResult {
            job_id: params.job_id,
            status,
        })
    }

    /// admin.stats.v1
    pub async fn stats(&self, params: StatsParams) -> Result<HealthSnapshot, ErrorObjectOwned> {
        let window_secs = params.window_secs.unwrap_or(DEFAULT_STATS_WINDOW_SECS);
        let window_ms = i64::try_from(window_secs.saturating_mul(1000)).unwrap_or(i64::MAX);
        self.stats.snapshot(window_ms).await.map_err(to_rpc_error)
    }

    /// admin.maintenance.v1
    pub async fn maintenance(
        &self,
        params: MaintenanceParams,
    ) -> Result<MaintenanceResult, ErrorObjectOwned> {
        let scheduler = self.maintenance.as_ref().ok_or_else(|| {
            to_rpc_error(AppError::Internal("maintenance is not configured".to_string()))
        })?;

        let report = scheduler
            .run_now(params.force_vacuum)
            .await
            .map_err(to_rpc_error)?;
        Ok(report.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::code;
    use quarry_core::domain::{ExecutionFailure, JobStatus, NewProcess, ProcessKind, QueueSelector};
    use quarry_core::port::time_provider::mocks::ManualClock;
    use quarry_core::port::{MaintenanceConfig, ProcessRegistry};
    use quarry_infra_sqlite::{
        create_pool, run_migrations, SqliteJobStore, SqliteMaintenance, SqliteProcessRegistry,
    };

    const T0: i64 = 1_700_000_000_000;

    struct Fixture {
        handler: RpcHandler,
        store: Arc<SqliteJobStore>,
        registry: Arc<SqliteProcessRegistry>,
    }

    async fn fixture() -> Fixture {
        let pool = create_pool("sqlite::memory:").await.unwrap();
        run_migrations(&pool).await.unwrap();
        let clock = Arc::new(ManualClock::new(T0));
        let store = Arc::new(SqliteJobStore::new(pool.clone(), clock.clone()));
        let registry = Arc::new(SqliteProcessRegistry::new(pool.clone(), clock.clone()));

        let handler = RpcHandler::new(
            JobService::new(store.clone(), clock.clone()),
            store.clone(),
            StatsService::new(store.clone(), registry.clone(), clock.clone(), 30_000),
            Some(MaintenanceScheduler::new(
                Arc::new(SqliteMaintenance::new(pool)),
                MaintenanceConfig::default(),
                clock,
            )),
        );
        Fixture {
            handler,
            store,
            registry,
        }
    }

    fn params(queue: &str, class: &str) -> EnqueueParams {
        EnqueueParams {
            queue_name: queue.to_string(),
            class_name: class.to_string(),
            arguments: serde_json::json!([]),
            priority: 0,
            scheduled_at: None,
            active_job_id: None,
            concurrency: None,
        }
    }

    #[tokio::test]
    async fn test_enqueue_and_status() {
        let f = fixture().await;
        let enqueued = f.handler.enqueue(params("mail", "SendEmail")).await.unwrap();
        assert_eq!(enqueued.status, JobStatus::Ready);

        let details = f
            .handler
            .status(JobIdParams {
                job_id: enqueued.job_id,
            })
            .await
            .unwrap();
        assert_eq!(details.queue_name, "mail");
        assert_eq!(details.status, JobStatus::Ready);
        assert!(details.error.is_none());
    }

    #[tokio::test]
    async fn test_enqueue_rejects_missing_class() {
        let f = fixture().await;
        let err = f.handler.enqueue(params("mail", "")).await.unwrap_err();
        assert_eq!(err.code(), code::VALIDATION_ERROR);
    }

    #[tokio::test]
    async fn test_status_of_unknown_job() {
        let f = fixture().await;
        let err = f.handler.status(JobIdParams { job_id: 42 }).await.unwrap_err();
        assert_eq!(err.code(), code::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_retry_failed_job() {
        let f = fixture().await;
        let enqueued = f.handler.enqueue(params("default", "Flaky")).await.unwrap();
        let worker = f
            .registry
            .register(NewProcess {
                kind: ProcessKind::Worker,
                name: "w".to_string(),
                pid: 1,
                hostname: "h".to_string(),
                supervisor_id: None,
                metadata: serde_json::json!({}),
            })
            .await
            .unwrap();
        f.store.claim(worker.id, &QueueSelector::all(), 1).await.unwrap();

        // Retrying before the failure is a conflict
        let early = f
            .handler
            .retry(JobIdParams {
                job_id: enqueued.job_id,
            })
            .await
            .unwrap_err();
        assert_eq!(early.code(), code::CONFLICT);

        f.store
            .mark_failed(enqueued.job_id, &ExecutionFailure::new("IOError", "disk full"))
            .await
            .unwrap();
        let details = f
            .handler
            .status(JobIdParams {
                job_id: enqueued.job_id,
            })
            .await
            .unwrap();
        assert_eq!(details.status, JobStatus::Failed);
        assert_eq!(details.error.as_deref(), Some("IOError: disk full"));

        let retried = f
            .handler
            .retry(JobIdParams {
                job_id: enqueued.job_id,
            })
            .await
            .unwrap();
        assert_eq!(retried.status, JobStatus::Ready);
    }

    #[tokio::test]
    async fn test_stats_and_maintenance() {
        let f = fixture().await;
        f.handler.enqueue(params("mail", "A")).await.unwrap();

        let snapshot = f.handler.stats(StatsParams::default()).await.unwrap();
        assert_eq!(snapshot.queues.len(), 1);
        assert_eq!(snapshot.queues[0].ready, 1);
        assert_eq!(snapshot.window_ms, 3_600_000);

        let report = f
            .handler
            .maintenance(MaintenanceParams { force_vacuum: true })
            .await
            .unwrap();
        assert!(report.vacuum_run);
        assert_eq!(report.jobs_deleted, 0);
    }
}
