// SQLite JobStore Implementation
//
// SQLite has a single writer and no row-skip locking. Each transaction opens
// with a write (`DELETE ... RETURNING` or a compare-and-set `UPDATE`) so the
// write lock is held from the first statement; a row removed by one claimant
// is simply absent for the next.

use crate::error::map_sqlx_error;
use crate::executions::{
    admit, clear_liveness_markers, insert_job, insert_ready, insert_scheduled, job_exists,
    load_admission, load_job, release_and_unblock, Admission, JobRow, JOB_COLUMNS,
};
use async_trait::async_trait;
use quarry_core::domain::{
    ClaimedExecution, ClaimedJob, ExecutionFailure, FailedExecution, Job, JobId, JobStatus,
    NewJob, Priority, ProcessId, QueuePattern, QueueSelector, Semaphore, Timestamp,
};
use quarry_core::error::{AppError, Result};
use quarry_core::port::{JobStore, OutcomeCounts, QueueCounts, TimeProvider};
use sqlx::{QueryBuilder, Sqlite, SqliteConnection, SqlitePool};
use std::sync::Arc;
use tracing::{debug, info};

pub struct SqliteJobStore {
    pool: SqlitePool,
    time_provider: Arc<dyn TimeProvider>,
}

impl SqliteJobStore {
    pub fn new(pool: SqlitePool, time_provider: Arc<dyn TimeProvider>) -> Self {
        Self {
            pool,
            time_provider,
        }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Shared body of `retry` and `retry_at`
    async fn readmit(&self, job_id: JobId, at: Option<Timestamp>) -> Result<JobStatus> {
        let now = self.time_provider.now_millis();
        let mut tx = self.pool.begin().await.map_err(map_sqlx_error)?;
        let status = readmit_failed(&mut tx, job_id, at, now).await?;
        tx.commit().await.map_err(map_sqlx_error)?;
        info!(job_id = %job_id, status = %status, "Job re-admitted after failure");
        Ok(status)
    }
}

/// Close the job as failed: drop its markers, write the Failed row, pass its slot on
async fn record_failure(
    conn: &mut SqliteConnection,
    job_id: JobId,
    failure: &ExecutionFailure,
    now: Timestamp,
) -> Result<()> {
    let error = serde_json::to_string(failure)?;

    let updated: Option<Option<String>> = sqlx::query_scalar(
        "UPDATE jobs SET finished_at = ?, failed_at = ?, updated_at = ? \
         WHERE id = ? AND finished_at IS NULL RETURNING concurrency_key",
    )
    .bind(now)
    .bind(now)
    .bind(now)
    .bind(job_id)
    .fetch_optional(&mut *conn)
    .await
    .map_err(map_sqlx_error)?;

    let Some(concurrency_key) = updated else {
        if job_exists(conn, job_id).await? {
            return Err(AppError::InvalidState(format!("job {} is already finished", job_id)));
        }
        return Err(AppError::NotFound(format!("job {}", job_id)));
    };

    let held_slot = clear_liveness_markers(conn, job_id).await?;

    sqlx::query(
        "INSERT INTO failed_executions (job_id, error, created_at) VALUES (?, ?, ?) \
         ON CONFLICT(job_id) DO UPDATE SET error = excluded.error, created_at = excluded.created_at",
    )
    .bind(job_id)
    .bind(error)
    .bind(now)
    .execute(&mut *conn)
    .await
    .map_err(map_sqlx_error)?;

    if let (true, Some(key)) = (held_slot, concurrency_key.as_deref()) {
        release_and_unblock(conn, key, now).await?;
    }
    Ok(())
}

/// Turn a Failed job back into Ready/Blocked, or Scheduled when `at` is in the future
async fn readmit_failed(
    conn: &mut SqliteConnection,
    job_id: JobId,
    at: Option<Timestamp>,
    now: Timestamp,
) -> Result<JobStatus> {
    let removed: Option<JobId> =
        sqlx::query_scalar("DELETE FROM failed_executions WHERE job_id = ? RETURNING job_id")
            .bind(job_id)
            .fetch_optional(&mut *conn)
            .await
            .map_err(map_sqlx_error)?;
    if removed.is_none() {
        return Err(AppError::InvalidState(format!(
            "job {} has no failed execution to retry",
            job_id
        )));
    }

    sqlx::query(
        "UPDATE jobs SET finished_at = NULL, failed_at = NULL, \
         scheduled_at = COALESCE(?, scheduled_at), updated_at = ? WHERE id = ?",
    )
    .bind(at)
    .bind(now)
    .bind(job_id)
    .execute(&mut *conn)
    .await
    .map_err(map_sqlx_error)?;

    // A Failed job holds no liveness marker; drop any stray one before re-admitting
    clear_liveness_markers(conn, job_id).await?;

    let admission = load_admission(conn, job_id).await?;
    match at {
        Some(at) if at > now => {
            insert_scheduled(conn, job_id, &admission.queue_name, admission.priority, at, now).await?;
            Ok(JobStatus::Scheduled)
        }
        _ => admit(conn, &admission, now).await,
    }
}

fn push_queue_filter(builder: &mut QueryBuilder<'_, Sqlite>, queues: &QueueSelector) {
    if queues.matches_all() {
        return;
    }

    builder.push(" WHERE (");
    for (i, pattern) in queues.resolved().enumerate() {
        if i > 0 {
            builder.push(" OR ");
        }
        match pattern {
            QueuePattern::Exact(name) => {
                builder.push("queue_name = ").push_bind(name.to_string());
            }
            QueuePattern::Prefix(prefix) => {
                builder
                    .push("substr(queue_name, 1, ")
                    .push_bind(prefix.chars().count() as i64)
                    .push(") = ")
                    .push_bind(prefix.to_string());
            }
        }
    }
    builder.push(")");
}

#[async_trait]
impl JobStore for SqliteJobStore {
    async fn enqueue(&self, job: NewJob) -> Result<(JobId, JobStatus)> {
        let now = self.time_provider.now_millis();
        let mut tx = self.pool.begin().await.map_err(map_sqlx_error)?;

        let job_id = insert_job(&mut tx, &job, now).await?;
        let status = match job.scheduled_at {
            Some(at) if job.is_deferred(now) => {
                insert_scheduled(&mut tx, job_id, &job.queue_name, job.priority, at, now).await?;
                JobStatus::Scheduled
            }
            _ => {
                let admission = Admission {
                    job_id,
                    queue_name: job.queue_name.clone(),
                    priority: job.priority,
                    concurrency: job.concurrency.clone(),
                };
                admit(&mut tx, &admission, now).await?
            }
        };

        tx.commit().await.map_err(map_sqlx_error)?;
        debug!(job_id = %job_id, queue = %job.queue_name, class = %job.class_name, status = %status, "Job enqueued");
        Ok((job_id, status))
    }

    async fn find_job(&self, job_id: JobId) -> Result<Option<Job>> {
        let row = sqlx::query_as::<_, JobRow>(&format!("SELECT {} FROM jobs WHERE id = ?", JOB_COLUMNS))
            .bind(job_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(map_sqlx_error)?;
        row.map(JobRow::into_job).transpose()
    }

    async fn job_status(&self, job_id: JobId) -> Result<JobStatus> {
        let row: Option<(Option<i64>, Option<i64>, i64, i64, i64, i64)> = sqlx::query_as(
            r#"
            SELECT j.finished_at, j.failed_at,
                EXISTS(SELECT 1 FROM claimed_executions WHERE job_id = j.id),
                EXISTS(SELECT 1 FROM ready_executions WHERE job_id = j.id),
                EXISTS(SELECT 1 FROM scheduled_executions WHERE job_id = j.id),
                EXISTS(SELECT 1 FROM blocked_executions WHERE job_id = j.id)
            FROM jobs j WHERE j.id = ?
            "#,
        )
        .bind(job_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        let (finished_at, failed_at, claimed, ready, scheduled, blocked) =
            row.ok_or_else(|| AppError::NotFound(format!("job {}", job_id)))?;

        let status = match (finished_at, failed_at) {
            (Some(_), Some(_)) => JobStatus::Failed,
            (Some(_), None) => JobStatus::Finished,
            _ if claimed > 0 => JobStatus::Claimed,
            _ if ready > 0 => JobStatus::Ready,
            _ if scheduled > 0 => JobStatus::Scheduled,
            _ if blocked > 0 => JobStatus::Blocked,
            _ => {
                return Err(AppError::Internal(format!(
                    "job {} has no execution marker",
                    job_id
                )))
            }
        };
        Ok(status)
    }

    async fn claim(
        &self,
        process_id: ProcessId,
        queues: &QueueSelector,
        limit: usize,
    ) -> Result<Vec<ClaimedJob>> {
        if limit == 0 {
            return Ok(Vec::new());
        }
        let now = self.time_provider.now_millis();
        let mut tx = self.pool.begin().await.map_err(map_sqlx_error)?;

        let mut builder = QueryBuilder::<Sqlite>::new(
            "DELETE FROM ready_executions WHERE job_id IN (SELECT job_id FROM ready_executions",
        );
        push_queue_filter(&mut builder, queues);
        builder
            .push(" ORDER BY priority DESC, job_id LIMIT ")
            .push_bind(limit as i64)
            .push(") RETURNING job_id, priority");

        let mut taken: Vec<(JobId, Priority)> = builder
            .build_query_as()
            .fetch_all(&mut *tx)
            .await
            .map_err(map_sqlx_error)?;
        if taken.is_empty() {
            return Ok(Vec::new());
        }
        taken.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(&b.0)));

        let mut claimed = Vec::with_capacity(taken.len());
        for (job_id, _) in taken {
            sqlx::query("INSERT INTO claimed_executions (job_id, process_id, created_at) VALUES (?, ?, ?)")
                .bind(job_id)
                .bind(process_id)
                .bind(now)
                .execute(&mut *tx)
                .await
                .map_err(map_sqlx_error)?;
            sqlx::query("UPDATE jobs SET attempts = attempts + 1, updated_at = ? WHERE id = ?")
                .bind(now)
                .bind(job_id)
                .execute(&mut *tx)
                .await
                .map_err(map_sqlx_error)?;

            let job = load_job(&mut tx, job_id).await?;
            claimed.push(ClaimedJob {
                job,
                claim: ClaimedExecution {
                    job_id,
                    process_id: Some(process_id),
                    created_at: now,
                },
            });
        }

        tx.commit().await.map_err(map_sqlx_error)?;
        debug!(process_id = %process_id, claimed = claimed.len(), "Claimed jobs");
        Ok(claimed)
    }

    async fn mark_finished(&self, job_id: JobId) -> Result<()> {
        let now = self.time_provider.now_millis();
        let mut tx = self.pool.begin().await.map_err(map_sqlx_error)?;

        let updated: Option<Option<String>> = sqlx::query_scalar(
            "UPDATE jobs SET finished_at = ?, updated_at = ? \
             WHERE id = ? AND finished_at IS NULL RETURNING concurrency_key",
        )
        .bind(now)
        .bind(now)
        .bind(job_id)
        .fetch_optional(&mut *tx)
        .await
        .map_err(map_sqlx_error)?;

        let Some(concurrency_key) = updated else {
            if job_exists(&mut tx, job_id).await? {
                // Already finished
                return Ok(());
            }
            return Err(AppError::NotFound(format!("job {}", job_id)));
        };

        let held_slot = clear_liveness_markers(&mut tx, job_id).await?;
        if let (true, Some(key)) = (held_slot, concurrency_key.as_deref()) {
            release_and_unblock(&mut tx, key, now).await?;
        }

        tx.commit().await.map_err(map_sqlx_error)
    }

    async fn mark_failed(&self, job_id: JobId, failure: &ExecutionFailure) -> Result<()> {
        let now = self.time_provider.now_millis();
        let mut tx = self.pool.begin().await.map_err(map_sqlx_error)?;
        record_failure(&mut tx, job_id, failure, now).await?;
        tx.commit().await.map_err(map_sqlx_error)
    }

    async fn fail_and_retry_at(
        &self,
        job_id: JobId,
        failure: &ExecutionFailure,
        at: Timestamp,
    ) -> Result<JobStatus> {
        let now = self.time_provider.now_millis();
        let mut tx = self.pool.begin().await.map_err(map_sqlx_error)?;
        record_failure(&mut tx, job_id, failure, now).await?;
        let status = readmit_failed(&mut tx, job_id, Some(at), now).await?;
        tx.commit().await.map_err(map_sqlx_error)?;
        debug!(job_id = %job_id, retry_at = at, status = %status, "Failed job re-admitted for retry");
        Ok(status)
    }

    async fn retry(&self, job_id: JobId) -> Result<JobStatus> {
        self.readmit(job_id, None).await
    }

    async fn retry_at(&self, job_id: JobId, at: Timestamp) -> Result<JobStatus> {
        self.readmit(job_id, Some(at)).await
    }

    async fn failed_execution(&self, job_id: JobId) -> Result<Option<FailedExecution>> {
        let row: Option<(String, i64)> =
            sqlx::query_as("SELECT error, created_at FROM failed_executions WHERE job_id = ?")
                .bind(job_id)
                .fetch_optional(&self.pool)
                .await
                .map_err(map_sqlx_error)?;

        match row {
            Some((error, created_at)) => Ok(Some(FailedExecution {
                job_id,
                error: serde_json::from_str(&error)?,
                created_at,
            })),
            None => Ok(None),
        }
    }

    async fn promote_due_scheduled(&self, limit: usize) -> Result<Vec<JobId>> {
        let now = self.time_provider.now_millis();
        let mut tx = self.pool.begin().await.map_err(map_sqlx_error)?;

        let mut due: Vec<(JobId, Priority, Timestamp)> = sqlx::query_as(
            r#"
            DELETE FROM scheduled_executions WHERE job_id IN (
                SELECT job_id FROM scheduled_executions
                WHERE scheduled_at <= ?
                ORDER BY scheduled_at, priority DESC, job_id
                LIMIT ?
            )
            RETURNING job_id, priority, scheduled_at
            "#,
        )
        .bind(now)
        .bind(limit as i64)
        .fetch_all(&mut *tx)
        .await
        .map_err(map_sqlx_error)?;
        due.sort_by(|a, b| a.2.cmp(&b.2).then(b.1.cmp(&a.1)).then(a.0.cmp(&b.0)));

        let mut promoted = Vec::with_capacity(due.len());
        for (job_id, _, _) in due {
            let admission = load_admission(&mut tx, job_id).await?;
            admit(&mut tx, &admission, now).await?;
            promoted.push(job_id);
        }

        tx.commit().await.map_err(map_sqlx_error)?;
        Ok(promoted)
    }

    async fn release_orphaned_claims(&self, limit: usize) -> Result<Vec<JobId>> {
        let now = self.time_provider.now_millis();
        let mut tx = self.pool.begin().await.map_err(map_sqlx_error)?;

        let mut orphans: Vec<JobId> = sqlx::query_scalar(
            r#"
            DELETE FROM claimed_executions WHERE job_id IN (
                SELECT job_id FROM claimed_executions
                WHERE process_id IS NULL
                   OR process_id NOT IN (SELECT id FROM processes)
                ORDER BY job_id
                LIMIT ?
            )
            RETURNING job_id
            "#,
        )
        .bind(limit as i64)
        .fetch_all(&mut *tx)
        .await
        .map_err(map_sqlx_error)?;
        orphans.sort_unstable();

        // The claim keeps its semaphore slot, so the job goes straight to Ready
        for &job_id in &orphans {
            let admission = load_admission(&mut tx, job_id).await?;
            insert_ready(&mut tx, job_id, &admission.queue_name, admission.priority, now).await?;
        }

        tx.commit().await.map_err(map_sqlx_error)?;
        Ok(orphans)
    }

    async fn expire_blocked(&self, limit: usize) -> Result<Vec<JobId>> {
        let now = self.time_provider.now_millis();
        let mut tx = self.pool.begin().await.map_err(map_sqlx_error)?;

        let mut expired: Vec<(JobId, String, Priority)> = sqlx::query_as(
            r#"
            DELETE FROM blocked_executions WHERE job_id IN (
                SELECT job_id FROM blocked_executions
                WHERE expires_at <= ?
                ORDER BY priority DESC, job_id
                LIMIT ?
            )
            RETURNING job_id, queue_name, priority
            "#,
        )
        .bind(now)
        .bind(limit as i64)
        .fetch_all(&mut *tx)
        .await
        .map_err(map_sqlx_error)?;
        expired.sort_by(|a, b| b.2.cmp(&a.2).then(a.0.cmp(&b.0)));

        let mut released = Vec::with_capacity(expired.len());
        for (job_id, queue_name, priority) in expired {
            insert_ready(&mut tx, job_id, &queue_name, priority, now).await?;
            released.push(job_id);
        }

        tx.commit().await.map_err(map_sqlx_error)?;
        Ok(released)
    }

    async fn expire_semaphores(&self) -> Result<u64> {
        let now = self.time_provider.now_millis();
        let result = sqlx::query("DELETE FROM semaphores WHERE expires_at <= ?")
            .bind(now)
            .execute(&self.pool)
            .await
            .map_err(map_sqlx_error)?;
        Ok(result.rows_affected())
    }

    async fn semaphore(&self, key: &str) -> Result<Option<Semaphore>> {
        let row: Option<(String, i32, i32, i64)> = sqlx::query_as(
            "SELECT key, value, limit_value, expires_at FROM semaphores WHERE key = ?",
        )
        .bind(key)
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        Ok(row.map(|(key, value, limit, expires_at)| Semaphore {
            key,
            value,
            limit,
            expires_at,
        }))
    }

    async fn queue_counts(&self) -> Result<Vec<QueueCounts>> {
        let rows: Vec<(String, i64, i64, i64, i64, i64)> = sqlx::query_as(
            r#"
            SELECT queue_name,
                CAST(SUM(CASE WHEN kind = 'ready' THEN 1 ELSE 0 END) AS INTEGER),
                CAST(SUM(CASE WHEN kind = 'scheduled' THEN 1 ELSE 0 END) AS INTEGER),
                CAST(SUM(CASE WHEN kind = 'claimed' THEN 1 ELSE 0 END) AS INTEGER),
                CAST(SUM(CASE WHEN kind = 'blocked' THEN 1 ELSE 0 END) AS INTEGER),
                CAST(SUM(CASE WHEN kind = 'failed' THEN 1 ELSE 0 END) AS INTEGER)
            FROM (
                SELECT queue_name, 'ready' AS kind FROM ready_executions
                UNION ALL SELECT queue_name, 'scheduled' FROM scheduled_executions
                UNION ALL SELECT j.queue_name, 'claimed'
                    FROM claimed_executions c JOIN jobs j ON j.id = c.job_id
                UNION ALL SELECT queue_name, 'blocked' FROM blocked_executions
                UNION ALL SELECT j.queue_name, 'failed'
                    FROM failed_executions f JOIN jobs j ON j.id = f.job_id
            )
            GROUP BY queue_name
            ORDER BY queue_name
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        Ok(rows
            .into_iter()
            .map(|(queue_name, ready, scheduled, claimed, blocked, failed)| QueueCounts {
                queue_name,
                ready,
                scheduled,
                claimed,
                blocked,
                failed,
            })
            .collect())
    }

    async fn outcome_counts(&self, since: Timestamp) -> Result<OutcomeCounts> {
        let (finished, failed): (i64, i64) = sqlx::query_as(
            r#"
            SELECT
                CAST(COALESCE(SUM(CASE WHEN failed_at IS NULL THEN 1 ELSE 0 END), 0) AS INTEGER),
                CAST(COALESCE(SUM(CASE WHEN failed_at IS NOT NULL THEN 1 ELSE 0 END), 0) AS INTEGER)
            FROM jobs
            WHERE finished_at IS NOT NULL AND finished_at >= ?
            "#,
        )
        .bind(since)
        .fetch_one(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        Ok(OutcomeCounts { finished, failed })
    }
}
