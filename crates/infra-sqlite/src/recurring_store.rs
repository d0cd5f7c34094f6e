// SQLite RecurringTaskStore Implementation

use crate::error::map_sqlx_error;
use crate::executions::{admit, insert_job, Admission};
use async_trait::async_trait;
use quarry_core::domain::{JobArguments, JobId, NewJob, RecurringTask, Timestamp};
use quarry_core::error::Result;
use quarry_core::port::{RecurringTaskStore, TimeProvider};
use sqlx::{QueryBuilder, Sqlite, SqlitePool};
use std::sync::Arc;

const TASK_COLUMNS: &str = "key, schedule, class_name, queue_name, priority, arguments, next_at";

#[derive(sqlx::FromRow)]
struct RecurringTaskRow {
    key: String,
    schedule: String,
    class_name: String,
    queue_name: String,
    priority: i32,
    arguments: String,
    next_at: Option<i64>,
}

impl RecurringTaskRow {
    fn into_task(self) -> Result<RecurringTask> {
        Ok(RecurringTask {
            key: self.key,
            schedule: self.schedule,
            class_name: self.class_name,
            queue_name: self.queue_name,
            priority: self.priority,
            arguments: JobArguments::new(serde_json::from_str(&self.arguments)?),
            next_at: self.next_at,
        })
    }
}

pub struct SqliteRecurringTaskStore {
    pool: SqlitePool,
    time_provider: Arc<dyn TimeProvider>,
}

impl SqliteRecurringTaskStore {
    pub fn new(pool: SqlitePool, time_provider: Arc<dyn TimeProvider>) -> Self {
        Self {
            pool,
            time_provider,
        }
    }
}

#[async_trait]
impl RecurringTaskStore for SqliteRecurringTaskStore {
    async fn upsert(&self, task: &RecurringTask) -> Result<RecurringTask> {
        let now = self.time_provider.now_millis();
        let arguments = serde_json::to_string(task.arguments.as_value())?;

        // SET expressions see the old row, so the CASE compares against the stored schedule
        let row = sqlx::query_as::<_, RecurringTaskRow>(&format!(
            r#"
            INSERT INTO recurring_tasks (
                key, schedule, class_name, queue_name, priority, arguments, next_at,
                created_at, updated_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(key) DO UPDATE SET
                next_at = CASE
                    WHEN recurring_tasks.schedule = excluded.schedule
                         AND recurring_tasks.next_at IS NOT NULL
                    THEN recurring_tasks.next_at
                    ELSE excluded.next_at
                END,
                schedule = excluded.schedule,
                class_name = excluded.class_name,
                queue_name = excluded.queue_name,
                priority = excluded.priority,
                arguments = excluded.arguments,
                updated_at = excluded.updated_at
            RETURNING {}
            "#,
            TASK_COLUMNS
        ))
        .bind(&task.key)
        .bind(&task.schedule)
        .bind(&task.class_name)
        .bind(&task.queue_name)
        .bind(task.priority)
        .bind(arguments)
        .bind(task.next_at)
        .bind(now)
        .bind(now)
        .fetch_one(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        row.into_task()
    }

    async fn list(&self) -> Result<Vec<RecurringTask>> {
        let rows = sqlx::query_as::<_, RecurringTaskRow>(&format!(
            "SELECT {} FROM recurring_tasks ORDER BY key",
            TASK_COLUMNS
        ))
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_error)?;
        rows.into_iter().map(RecurringTaskRow::into_task).collect()
    }

    async fn delete_not_in(&self, keep: &[String]) -> Result<u64> {
        let mut builder = QueryBuilder::<Sqlite>::new("DELETE FROM recurring_tasks");
        if !keep.is_empty() {
            builder.push(" WHERE key NOT IN (");
            let mut separated = builder.separated(", ");
            for key in keep {
                separated.push_bind(key.clone());
            }
            separated.push_unseparated(")");
        }

        let result = builder
            .build()
            .execute(&self.pool)
            .await
            .map_err(map_sqlx_error)?;
        Ok(result.rows_affected())
    }

    async fn due(&self, now: Timestamp, limit: usize) -> Result<Vec<RecurringTask>> {
        let rows = sqlx::query_as::<_, RecurringTaskRow>(&format!(
            "SELECT {} FROM recurring_tasks WHERE next_at IS NOT NULL AND next_at <= ? \
             ORDER BY next_at, key LIMIT ?",
            TASK_COLUMNS
        ))
        .bind(now)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_error)?;
        rows.into_iter().map(RecurringTaskRow::into_task).collect()
    }

    async fn materialize(
        &self,
        task: &RecurringTask,
        run_at: Timestamp,
        next_at: Option<Timestamp>,
    ) -> Result<Option<JobId>> {
        let now = self.time_provider.now_millis();
        let mut tx = self.pool.begin().await.map_err(map_sqlx_error)?;

        // Compare-and-set on next_at: only one dispatcher advances a given fire
        let advanced = sqlx::query(
            "UPDATE recurring_tasks SET next_at = ?, updated_at = ? WHERE key = ? AND next_at = ?",
        )
        .bind(next_at)
        .bind(now)
        .bind(&task.key)
        .bind(run_at)
        .execute(&mut *tx)
        .await
        .map_err(map_sqlx_error)?;
        if advanced.rows_affected() == 0 {
            return Ok(None);
        }

        let existing: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM recurring_executions WHERE task_key = ? AND run_at = ?",
        )
        .bind(&task.key)
        .bind(run_at)
        .fetch_one(&mut *tx)
        .await
        .map_err(map_sqlx_error)?;
        if existing > 0 {
            tx.commit().await.map_err(map_sqlx_error)?;
            return Ok(None);
        }

        let job = NewJob {
            queue_name: task.queue_name.clone(),
            class_name: task.class_name.clone(),
            arguments: task.arguments.clone(),
            priority: task.priority,
            scheduled_at: Some(run_at),
            active_job_id: None,
            concurrency: None,
        };
        let job_id = insert_job(&mut tx, &job, now).await?;

        sqlx::query(
            "INSERT INTO recurring_executions (job_id, task_key, run_at, created_at) VALUES (?, ?, ?, ?)",
        )
        .bind(job_id)
        .bind(&task.key)
        .bind(run_at)
        .bind(now)
        .execute(&mut *tx)
        .await
        .map_err(map_sqlx_error)?;

        admit(
            &mut tx,
            &Admission {
                job_id,
                queue_name: job.queue_name,
                priority: job.priority,
                concurrency: None,
            },
            now,
        )
        .await?;

        tx.commit().await.map_err(map_sqlx_error)?;
        Ok(Some(job_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{create_pool, run_migrations, SqliteJobStore};
    use quarry_core::domain::JobStatus;
    use quarry_core::port::time_provider::mocks::ManualClock;
    use quarry_core::port::JobStore;

    const T0: i64 = 1_704_067_200_000;
    const MINUTE: i64 = 60_000;

    async fn setup() -> (SqliteRecurringTaskStore, SqliteJobStore, Arc<ManualClock>) {
        let pool = create_pool("sqlite::memory:").await.unwrap();
        run_migrations(&pool).await.unwrap();
        let clock = Arc::new(ManualClock::new(T0));
        (
            SqliteRecurringTaskStore::new(pool.clone(), clock.clone()),
            SqliteJobStore::new(pool, clock.clone()),
            clock,
        )
    }

    fn task(schedule: &str, next_at: i64) -> RecurringTask {
        let mut task = RecurringTask::new("cleanup", schedule, "Cleanup")
            .with_queue("maintenance")
            .with_arguments(serde_json::json!({ "days": 7 }));
        task.next_at = Some(next_at);
        task
    }

    #[tokio::test]
    async fn test_upsert_keeps_next_at_for_same_schedule() {
        let (store, _, _) = setup().await;
        store.upsert(&task("* * * * *", T0 + MINUTE)).await.unwrap();

        let again = store.upsert(&task("* * * * *", T0 + 5 * MINUTE)).await.unwrap();
        assert_eq!(again.next_at, Some(T0 + MINUTE));

        let changed = store.upsert(&task("*/5 * * * *", T0 + 5 * MINUTE)).await.unwrap();
        assert_eq!(changed.next_at, Some(T0 + 5 * MINUTE));
        assert_eq!(changed.schedule, "*/5 * * * *");
    }

    #[tokio::test]
    async fn test_delete_not_in_removes_unconfigured_tasks() {
        let (store, _, _) = setup().await;
        store.upsert(&task("* * * * *", T0)).await.unwrap();
        let mut other = task("* * * * *", T0);
        other.key = "report".to_string();
        store.upsert(&other).await.unwrap();

        assert_eq!(store.delete_not_in(&["report".to_string()]).await.unwrap(), 1);
        let keys: Vec<String> = store.list().await.unwrap().into_iter().map(|t| t.key).collect();
        assert_eq!(keys, vec!["report".to_string()]);

        assert_eq!(store.delete_not_in(&[]).await.unwrap(), 1);
        assert!(store.list().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_due_returns_tasks_at_or_before_now() {
        let (store, _, _) = setup().await;
        store.upsert(&task("* * * * *", T0 + MINUTE)).await.unwrap();

        assert!(store.due(T0, 10).await.unwrap().is_empty());
        assert_eq!(store.due(T0 + MINUTE, 10).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_materialize_creates_one_ready_job_per_fire() {
        let (store, jobs, clock) = setup().await;
        let stored = store.upsert(&task("* * * * *", T0 + MINUTE)).await.unwrap();
        clock.set(T0 + MINUTE);

        let job_id = store
            .materialize(&stored, T0 + MINUTE, Some(T0 + 2 * MINUTE))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(jobs.job_status(job_id).await.unwrap(), JobStatus::Ready);

        let job = jobs.find_job(job_id).await.unwrap().unwrap();
        assert_eq!(job.queue_name, "maintenance");
        assert_eq!(job.class_name, "Cleanup");
        assert_eq!(job.arguments.as_value(), &serde_json::json!({ "days": 7 }));

        // A second dispatcher racing on the same fire loses the compare-and-set
        let again = store
            .materialize(&stored, T0 + MINUTE, Some(T0 + 2 * MINUTE))
            .await
            .unwrap();
        assert!(again.is_none());

        let listed = store.list().await.unwrap();
        assert_eq!(listed[0].next_at, Some(T0 + 2 * MINUTE));
    }
}
