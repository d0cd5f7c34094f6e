// SQLite ProcessRegistry Implementation

use crate::error::map_sqlx_error;
use crate::executions::{insert_ready, load_admission};
use async_trait::async_trait;
use quarry_core::domain::{NewProcess, Process, ProcessId, ProcessKind, Timestamp};
use quarry_core::error::{AppError, Result};
use quarry_core::port::{Deregistration, ProcessRegistry, TimeProvider};
use sqlx::SqlitePool;
use std::sync::Arc;
use tracing::debug;

const PROCESS_COLUMNS: &str =
    "id, kind, name, pid, hostname, last_heartbeat_at, supervisor_id, metadata";

/// The process and every row it supervises, directly or not
const SUBTREE: &str = "WITH RECURSIVE subtree(id) AS ( \
     SELECT id FROM processes WHERE id = ? \
     UNION ALL \
     SELECT p.id FROM processes p JOIN subtree s ON p.supervisor_id = s.id)";

#[derive(sqlx::FromRow)]
struct ProcessRow {
    id: i64,
    kind: String,
    name: String,
    pid: i64,
    hostname: String,
    last_heartbeat_at: i64,
    supervisor_id: Option<i64>,
    metadata: String,
}

impl ProcessRow {
    fn into_process(self) -> Result<Process> {
        Ok(Process {
            id: self.id,
            kind: self.kind.parse::<ProcessKind>()?,
            name: self.name,
            pid: u32::try_from(self.pid)
                .map_err(|_| AppError::Database(format!("invalid pid {}", self.pid)))?,
            hostname: self.hostname,
            last_heartbeat_at: self.last_heartbeat_at,
            supervisor_id: self.supervisor_id,
            metadata: serde_json::from_str(&self.metadata)?,
        })
    }
}

pub struct SqliteProcessRegistry {
    pool: SqlitePool,
    time_provider: Arc<dyn TimeProvider>,
}

impl SqliteProcessRegistry {
    pub fn new(pool: SqlitePool, time_provider: Arc<dyn TimeProvider>) -> Self {
        Self {
            pool,
            time_provider,
        }
    }
}

#[async_trait]
impl ProcessRegistry for SqliteProcessRegistry {
    async fn register(&self, process: NewProcess) -> Result<Process> {
        let now = self.time_provider.now_millis();
        let metadata = serde_json::to_string(&process.metadata)?;

        let id: ProcessId = sqlx::query_scalar(
            r#"
            INSERT INTO processes (
                kind, name, pid, hostname, last_heartbeat_at, supervisor_id, metadata, created_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            RETURNING id
            "#,
        )
        .bind(process.kind.as_str())
        .bind(&process.name)
        .bind(i64::from(process.pid))
        .bind(&process.hostname)
        .bind(now)
        .bind(process.supervisor_id)
        .bind(metadata)
        .bind(now)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| match map_sqlx_error(e) {
            AppError::Conflict(_) => AppError::Conflict(format!(
                "process name {} already registered under supervisor {:?}",
                process.name, process.supervisor_id
            )),
            other => other,
        })?;

        debug!(
            process_id = %id,
            kind = %process.kind,
            pid = process.pid,
            hostname = %process.hostname,
            "Process row inserted"
        );

        Ok(Process {
            id,
            kind: process.kind,
            name: process.name,
            pid: process.pid,
            hostname: process.hostname,
            last_heartbeat_at: now,
            supervisor_id: process.supervisor_id,
            metadata: process.metadata,
        })
    }

    async fn heartbeat(&self, process_id: ProcessId) -> Result<()> {
        let now = self.time_provider.now_millis();
        let result = sqlx::query("UPDATE processes SET last_heartbeat_at = ? WHERE id = ?")
            .bind(now)
            .bind(process_id)
            .execute(&self.pool)
            .await
            .map_err(map_sqlx_error)?;

        if result.rows_affected() == 0 {
            return Err(AppError::NotFound(format!("process {}", process_id)));
        }
        debug!(process_id = %process_id, "Heartbeat");
        Ok(())
    }

    async fn deregister(&self, process_id: ProcessId) -> Result<Deregistration> {
        let now = self.time_provider.now_millis();
        let mut tx = self.pool.begin().await.map_err(map_sqlx_error)?;

        let mut released_jobs: Vec<i64> = sqlx::query_scalar(&format!(
            "{} DELETE FROM claimed_executions WHERE process_id IN (SELECT id FROM subtree) RETURNING job_id",
            SUBTREE
        ))
        .bind(process_id)
        .fetch_all(&mut *tx)
        .await
        .map_err(map_sqlx_error)?;
        released_jobs.sort_unstable();

        for &job_id in &released_jobs {
            let admission = load_admission(&mut tx, job_id).await?;
            insert_ready(&mut tx, job_id, &admission.queue_name, admission.priority, now).await?;
        }

        let mut processes: Vec<ProcessId> = sqlx::query_scalar(&format!(
            "{} DELETE FROM processes WHERE id IN (SELECT id FROM subtree) RETURNING id",
            SUBTREE
        ))
        .bind(process_id)
        .fetch_all(&mut *tx)
        .await
        .map_err(map_sqlx_error)?;
        // The process itself first, then its descendants
        processes.sort_unstable_by_key(|id| (*id != process_id, *id));

        tx.commit().await.map_err(map_sqlx_error)?;

        if !processes.is_empty() {
            debug!(
                process_id = %process_id,
                removed = processes.len(),
                released_jobs = released_jobs.len(),
                "Process subtree deleted"
            );
        }
        Ok(Deregistration {
            processes,
            released_jobs,
        })
    }

    async fn find(&self, process_id: ProcessId) -> Result<Option<Process>> {
        let row = sqlx::query_as::<_, ProcessRow>(&format!(
            "SELECT {} FROM processes WHERE id = ?",
            PROCESS_COLUMNS
        ))
        .bind(process_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx_error)?;
        row.map(ProcessRow::into_process).transpose()
    }

    async fn list(&self) -> Result<Vec<Process>> {
        let rows = sqlx::query_as::<_, ProcessRow>(&format!(
            "SELECT {} FROM processes ORDER BY id",
            PROCESS_COLUMNS
        ))
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_error)?;
        rows.into_iter().map(ProcessRow::into_process).collect()
    }

    async fn list_stale(&self, cutoff: Timestamp) -> Result<Vec<Process>> {
        let rows = sqlx::query_as::<_, ProcessRow>(&format!(
            "SELECT {} FROM processes WHERE last_heartbeat_at < ? ORDER BY last_heartbeat_at, id",
            PROCESS_COLUMNS
        ))
        .bind(cutoff)
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_error)?;
        rows.into_iter().map(ProcessRow::into_process).collect()
    }
}
