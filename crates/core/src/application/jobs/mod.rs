// Job Service - inbound use cases: enqueue, status, retry

pub mod enqueue;

pub use enqueue::{validate_request, EnqueueRequest, MAX_CONCURRENCY_DURATION_MS};

use crate::domain::{Job, JobId, JobStatus, Timestamp};
use crate::error::{AppError, Result};
use crate::port::{JobStore, TimeProvider};
use std::sync::Arc;
use tracing::info;

pub struct JobService {
    job_store: Arc<dyn JobStore>,
    time_provider: Arc<dyn TimeProvider>,
}

impl JobService {
    pub fn new(job_store: Arc<dyn JobStore>, time_provider: Arc<dyn TimeProvider>) -> Self {
        Self {
            job_store,
            time_provider,
        }
    }

    /// Enqueue a new job
    pub async fn enqueue(&self, req: EnqueueRequest) -> Result<(JobId, JobStatus)> {
        let queue = req.queue_name.clone();
        let (job_id, status) = enqueue::execute(self.job_store.as_ref(), req).await?;
        info!(job_id = %job_id, queue = %queue, status = %status, "Job enqueued");
        Ok((job_id, status))
    }

    /// Enqueue to run no earlier than `at`
    pub async fn enqueue_at(
        &self,
        req: EnqueueRequest,
        at: Timestamp,
    ) -> Result<(JobId, JobStatus)> {
        self.enqueue(req.scheduled_at(at)).await
    }

    /// Enqueue to run after `delay_ms` from now
    pub async fn enqueue_in(
        &self,
        req: EnqueueRequest,
        delay_ms: i64,
    ) -> Result<(JobId, JobStatus)> {
        let at = self.time_provider.now_millis().saturating_add(delay_ms);
        self.enqueue_at(req, at).await
    }

    pub async fn job_status(&self, job_id: JobId) -> Result<JobStatus> {
        self.job_store.job_status(job_id).await
    }

    pub async fn find_job(&self, job_id: JobId) -> Result<Job> {
        self.job_store
            .find_job(job_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("job {}", job_id)))
    }

    /// Re-admit a failed job
    pub async fn retry(&self, job_id: JobId) -> Result<JobStatus> {
        let status = self.job_store.retry(job_id).await?;
        info!(job_id = %job_id, status = %status, "Job retried manually");
        Ok(status)
    }
}
