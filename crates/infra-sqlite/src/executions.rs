// Execution marker helpers shared by the store adapters
//
// Every function runs on a connection already inside a transaction that
// has taken the write lock; none of them commits.

use crate::error::map_sqlx_error;
use quarry_core::domain::{
    ConcurrencyLimit, Job, JobArguments, JobId, JobStatus, NewJob, Priority, Timestamp,
};
use quarry_core::error::{AppError, Result};
use sqlx::SqliteConnection;
use tracing::debug;

pub(crate) const JOB_COLUMNS: &str = "id, queue_name, class_name, arguments, priority, \
     active_job_id, concurrency_key, concurrency_limit, concurrency_duration_ms, attempts, \
     scheduled_at, finished_at, failed_at, created_at";

/// Internal row struct for sqlx mapping
#[derive(sqlx::FromRow)]
pub(crate) struct JobRow {
    id: i64,
    queue_name: String,
    class_name: String,
    arguments: String,
    priority: i32,
    active_job_id: Option<String>,
    concurrency_key: Option<String>,
    concurrency_limit: Option<i32>,
    concurrency_duration_ms: Option<i64>,
    attempts: i32,
    scheduled_at: Option<i64>,
    finished_at: Option<i64>,
    failed_at: Option<i64>,
    created_at: i64,
}

impl JobRow {
    pub(crate) fn into_job(self) -> Result<Job> {
        let arguments: serde_json::Value = serde_json::from_str(&self.arguments)?;
        let concurrency = concurrency_from_columns(
            self.concurrency_key,
            self.concurrency_limit,
            self.concurrency_duration_ms,
        );

        Ok(Job {
            id: self.id,
            queue_name: self.queue_name,
            class_name: self.class_name,
            arguments: JobArguments::new(arguments),
            priority: self.priority,
            active_job_id: self.active_job_id,
            concurrency,
            attempts: self.attempts,
            scheduled_at: self.scheduled_at,
            finished_at: self.finished_at,
            failed_at: self.failed_at,
            created_at: self.created_at,
        })
    }
}

fn concurrency_from_columns(
    key: Option<String>,
    limit: Option<i32>,
    duration_ms: Option<i64>,
) -> Option<ConcurrencyLimit> {
    match (key, limit, duration_ms) {
        (Some(key), Some(limit), Some(duration_ms)) => {
            Some(ConcurrencyLimit::new(key, limit, duration_ms))
        }
        _ => None,
    }
}

/// Fields a liveness marker copies from its job
#[derive(Debug, Clone)]
pub(crate) struct Admission {
    pub job_id: JobId,
    pub queue_name: String,
    pub priority: Priority,
    pub concurrency: Option<ConcurrencyLimit>,
}

pub(crate) async fn load_job(conn: &mut SqliteConnection, job_id: JobId) -> Result<Job> {
    let row = sqlx::query_as::<_, JobRow>(&format!("SELECT {} FROM jobs WHERE id = ?", JOB_COLUMNS))
        .bind(job_id)
        .fetch_optional(&mut *conn)
        .await
        .map_err(map_sqlx_error)?
        .ok_or_else(|| AppError::NotFound(format!("job {}", job_id)))?;
    row.into_job()
}

pub(crate) async fn load_admission(conn: &mut SqliteConnection, job_id: JobId) -> Result<Admission> {
    let row: Option<(String, i32, Option<String>, Option<i32>, Option<i64>)> = sqlx::query_as(
        "SELECT queue_name, priority, concurrency_key, concurrency_limit, concurrency_duration_ms \
         FROM jobs WHERE id = ?",
    )
    .bind(job_id)
    .fetch_optional(&mut *conn)
    .await
    .map_err(map_sqlx_error)?;

    let (queue_name, priority, key, limit, duration_ms) =
        row.ok_or_else(|| AppError::NotFound(format!("job {}", job_id)))?;
    Ok(Admission {
        job_id,
        queue_name,
        priority,
        concurrency: concurrency_from_columns(key, limit, duration_ms),
    })
}

/// Insert the job row; the caller adds its marker
pub(crate) async fn insert_job(conn: &mut SqliteConnection, job: &NewJob, now: Timestamp) -> Result<JobId> {
    let arguments = serde_json::to_string(job.arguments.as_value())?;
    let (key, limit, duration_ms) = match &job.concurrency {
        Some(c) => (Some(c.key.as_str()), Some(c.limit), Some(c.duration_ms)),
        None => (None, None, None),
    };

    sqlx::query_scalar::<_, JobId>(
        r#"
        INSERT INTO jobs (
            queue_name, class_name, arguments, priority, active_job_id,
            concurrency_key, concurrency_limit, concurrency_duration_ms,
            attempts, scheduled_at, created_at, updated_at
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, 0, ?, ?, ?)
        RETURNING id
        "#,
    )
    .bind(&job.queue_name)
    .bind(&job.class_name)
    .bind(arguments)
    .bind(job.priority)
    .bind(&job.active_job_id)
    .bind(key)
    .bind(limit)
    .bind(duration_ms)
    .bind(job.scheduled_at)
    .bind(now)
    .bind(now)
    .fetch_one(&mut *conn)
    .await
    .map_err(map_sqlx_error)
}

pub(crate) async fn insert_ready(
    conn: &mut SqliteConnection,
    job_id: JobId,
    queue_name: &str,
    priority: Priority,
    now: Timestamp,
) -> Result<()> {
    sqlx::query(
        "INSERT INTO ready_executions (job_id, queue_name, priority, created_at) VALUES (?, ?, ?, ?)",
    )
    .bind(job_id)
    .bind(queue_name)
    .bind(priority)
    .bind(now)
    .execute(&mut *conn)
    .await
    .map_err(map_sqlx_error)?;
    Ok(())
}

pub(crate) async fn insert_scheduled(
    conn: &mut SqliteConnection,
    job_id: JobId,
    queue_name: &str,
    priority: Priority,
    scheduled_at: Timestamp,
    now: Timestamp,
) -> Result<()> {
    sqlx::query(
        "INSERT INTO scheduled_executions (job_id, queue_name, priority, scheduled_at, created_at) \
         VALUES (?, ?, ?, ?, ?)",
    )
    .bind(job_id)
    .bind(queue_name)
    .bind(priority)
    .bind(scheduled_at)
    .bind(now)
    .execute(&mut *conn)
    .await
    .map_err(map_sqlx_error)?;
    Ok(())
}

/// Ready when the job has no concurrency key or its semaphore has room,
/// Blocked otherwise
pub(crate) async fn admit(conn: &mut SqliteConnection, admission: &Admission, now: Timestamp) -> Result<JobStatus> {
    let Some(limit) = admission.concurrency.as_ref() else {
        insert_ready(conn, admission.job_id, &admission.queue_name, admission.priority, now).await?;
        return Ok(JobStatus::Ready);
    };

    if try_acquire(conn, limit, now).await? {
        insert_ready(conn, admission.job_id, &admission.queue_name, admission.priority, now).await?;
        return Ok(JobStatus::Ready);
    }

    sqlx::query(
        "INSERT INTO blocked_executions (job_id, queue_name, priority, concurrency_key, expires_at, created_at) \
         VALUES (?, ?, ?, ?, ?, ?)",
    )
    .bind(admission.job_id)
    .bind(&admission.queue_name)
    .bind(admission.priority)
    .bind(&limit.key)
    .bind(now.saturating_add(limit.duration_ms))
    .bind(now)
    .execute(&mut *conn)
    .await
    .map_err(map_sqlx_error)?;

    debug!(job_id = %admission.job_id, concurrency_key = %limit.key, "Job blocked on concurrency limit");
    Ok(JobStatus::Blocked)
}

/// Take one slot of the key's semaphore, creating it on first use
async fn try_acquire(conn: &mut SqliteConnection, limit: &ConcurrencyLimit, now: Timestamp) -> Result<bool> {
    let expires_at = now.saturating_add(limit.duration_ms);

    let created = sqlx::query(
        "INSERT INTO semaphores (key, value, limit_value, expires_at, created_at, updated_at) \
         VALUES (?, ?, ?, ?, ?, ?) ON CONFLICT(key) DO NOTHING",
    )
    .bind(&limit.key)
    .bind(limit.limit - 1)
    .bind(limit.limit)
    .bind(expires_at)
    .bind(now)
    .bind(now)
    .execute(&mut *conn)
    .await
    .map_err(map_sqlx_error)?;
    if created.rows_affected() == 1 {
        return Ok(true);
    }

    let taken = sqlx::query(
        "UPDATE semaphores SET value = value - 1, expires_at = MAX(expires_at, ?), updated_at = ? \
         WHERE key = ? AND value > 0",
    )
    .bind(expires_at)
    .bind(now)
    .bind(&limit.key)
    .execute(&mut *conn)
    .await
    .map_err(map_sqlx_error)?;
    Ok(taken.rows_affected() == 1)
}

/// Give a slot back and hand it to the next Blocked job for the key.
///
/// Returns the unblocked job, if any.
pub(crate) async fn release_and_unblock(
    conn: &mut SqliteConnection,
    key: &str,
    now: Timestamp,
) -> Result<Option<JobId>> {
    sqlx::query(
        "UPDATE semaphores SET value = MIN(value + 1, limit_value), updated_at = ? WHERE key = ?",
    )
    .bind(now)
    .bind(key)
    .execute(&mut *conn)
    .await
    .map_err(map_sqlx_error)?;

    let next: Option<JobId> = sqlx::query_scalar(
        "SELECT job_id FROM blocked_executions WHERE concurrency_key = ? \
         ORDER BY priority DESC, job_id LIMIT 1",
    )
    .bind(key)
    .fetch_optional(&mut *conn)
    .await
    .map_err(map_sqlx_error)?;

    let Some(job_id) = next else {
        return Ok(None);
    };

    let admission = load_admission(conn, job_id).await?;
    let Some(limit) = admission.concurrency.as_ref() else {
        return Ok(None);
    };
    if !try_acquire(conn, limit, now).await? {
        return Ok(None);
    }

    sqlx::query("DELETE FROM blocked_executions WHERE job_id = ?")
        .bind(job_id)
        .execute(&mut *conn)
        .await
        .map_err(map_sqlx_error)?;
    insert_ready(conn, job_id, &admission.queue_name, admission.priority, now).await?;

    debug!(job_id = %job_id, concurrency_key = %key, "Blocked job released");
    Ok(Some(job_id))
}

/// Delete every liveness marker of the job.
///
/// Returns whether the job was holding a semaphore slot (Ready or Claimed).
pub(crate) async fn clear_liveness_markers(conn: &mut SqliteConnection, job_id: JobId) -> Result<bool> {
    let mut held_slot = false;
    for table in ["ready_executions", "claimed_executions"] {
        let removed = sqlx::query(&format!("DELETE FROM {} WHERE job_id = ?", table))
            .bind(job_id)
            .execute(&mut *conn)
            .await
            .map_err(map_sqlx_error)?;
        held_slot |= removed.rows_affected() > 0;
    }
    for table in ["scheduled_executions", "blocked_executions"] {
        sqlx::query(&format!("DELETE FROM {} WHERE job_id = ?", table))
            .bind(job_id)
            .execute(&mut *conn)
            .await
            .map_err(map_sqlx_error)?;
    }
    Ok(held_slot)
}

pub(crate) async fn job_exists(conn: &mut SqliteConnection, job_id: JobId) -> Result<bool> {
    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM jobs WHERE id = ?")
        .bind(job_id)
        .fetch_one(&mut *conn)
        .await
        .map_err(map_sqlx_error)?;
    Ok(count > 0)
}
