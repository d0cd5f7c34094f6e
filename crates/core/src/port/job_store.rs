// Job Store Port
// Jobs plus their execution markers. Every method is one store transaction;
// a marker is never read and acted on outside the transaction that moves it.

use crate::domain::{
    ClaimedJob, ExecutionFailure, FailedExecution, Job, JobId, JobStatus, NewJob, ProcessId,
    QueueSelector, Semaphore, Timestamp,
};
use crate::error::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Marker counts for one queue
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueCounts {
    pub queue_name: String,
    pub ready: i64,
    pub scheduled: i64,
    pub claimed: i64,
    pub blocked: i64,
    pub failed: i64,
}

/// Jobs that reached a terminal state since some instant
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutcomeCounts {
    pub finished: i64,
    pub failed: i64,
}

#[async_trait]
pub trait JobStore: Send + Sync {
    /// Insert the job and exactly one marker (Ready, Scheduled or Blocked)
    async fn enqueue(&self, job: NewJob) -> Result<(JobId, JobStatus)>;

    async fn find_job(&self, job_id: JobId) -> Result<Option<Job>>;

    /// # Errors
    /// - AppError::NotFound if the job does not exist
    async fn job_status(&self, job_id: JobId) -> Result<JobStatus>;

    /// Move up to `limit` Ready jobs matching `queues` to Claimed under `process_id`.
    ///
    /// Returned in `(priority desc, job_id asc)` order. Rows taken by a
    /// concurrent claimant are simply absent from the result.
    async fn claim(
        &self,
        process_id: ProcessId,
        queues: &QueueSelector,
        limit: usize,
    ) -> Result<Vec<ClaimedJob>>;

    /// Set `finished_at` and drop every liveness marker. No-op when already finished.
    async fn mark_finished(&self, job_id: JobId) -> Result<()>;

    /// Set `finished_at`/`failed_at`, drop liveness markers, write the Failed row
    async fn mark_failed(&self, job_id: JobId, failure: &ExecutionFailure) -> Result<()>;

    /// Re-admit a failed job to Ready (or Blocked when its concurrency key is full)
    ///
    /// # Errors
    /// - AppError::InvalidState unless a Failed row exists
    async fn retry(&self, job_id: JobId) -> Result<JobStatus>;

    /// Like `retry`, but parks the job in Scheduled until `at`
    async fn retry_at(&self, job_id: JobId, at: Timestamp) -> Result<JobStatus>;

    /// `mark_failed` followed by `retry_at`, in one transaction
    async fn fail_and_retry_at(
        &self,
        job_id: JobId,
        failure: &ExecutionFailure,
        at: Timestamp,
    ) -> Result<JobStatus>;

    async fn failed_execution(&self, job_id: JobId) -> Result<Option<FailedExecution>>;

    /// Scheduled -> Ready for rows with `scheduled_at <= now`,
    /// oldest `scheduled_at` first, then `priority desc, job_id asc`
    async fn promote_due_scheduled(&self, limit: usize) -> Result<Vec<JobId>>;

    /// Claimed -> Ready for claims whose owner row is gone
    async fn release_orphaned_claims(&self, limit: usize) -> Result<Vec<JobId>>;

    /// Blocked -> Ready for rows past `expires_at`
    async fn expire_blocked(&self, limit: usize) -> Result<Vec<JobId>>;

    /// Drop semaphores past `expires_at`
    async fn expire_semaphores(&self) -> Result<u64>;

    /// Current row of the key's semaphore, if one exists
    async fn semaphore(&self, key: &str) -> Result<Option<Semaphore>>;

    async fn queue_counts(&self) -> Result<Vec<QueueCounts>>;

    async fn outcome_counts(&self, since: Timestamp) -> Result<OutcomeCounts>;
}
