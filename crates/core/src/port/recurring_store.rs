// Recurring Task Store Port

use crate::domain::{JobId, RecurringTask, Timestamp};
use crate::error::Result;
use async_trait::async_trait;

#[async_trait]
pub trait RecurringTaskStore: Send + Sync {
    /// Insert or update by key.
    ///
    /// An existing `next_at` survives when the schedule is unchanged; a new
    /// schedule takes the caller's `next_at`.
    async fn upsert(&self, task: &RecurringTask) -> Result<RecurringTask>;

    async fn list(&self) -> Result<Vec<RecurringTask>>;

    /// Delete tasks whose key is not in `keep`; returns how many went
    async fn delete_not_in(&self, keep: &[String]) -> Result<u64>;

    /// Tasks with `next_at <= now`, earliest first
    async fn due(&self, now: Timestamp, limit: usize) -> Result<Vec<RecurringTask>>;

    /// Create the job for the `(task, run_at)` fire and advance `next_at`, atomically.
    ///
    /// Returns `None` when another dispatcher already advanced the task or a
    /// Recurring execution for `run_at` already exists.
    async fn materialize(
        &self,
        task: &RecurringTask,
        run_at: Timestamp,
        next_at: Option<Timestamp>,
    ) -> Result<Option<JobId>>;
}
