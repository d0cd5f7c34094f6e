// SQLite Maintenance Implementation
use crate::error::map_sqlx_error;
use async_trait::async_trait;
use quarry_core::domain::Timestamp;
use quarry_core::error::Result;
use quarry_core::port::{Maintenance, MaintenanceStats};
use sqlx::SqlitePool;
use tracing::info;

/// SQLite maintenance implementation
pub struct SqliteMaintenance {
    pool: SqlitePool,
}

impl SqliteMaintenance {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Allocated and free page counts, and the page size
    async fn page_stats(&self) -> Result<(i64, i64, i64)> {
        let page_count: i64 = sqlx::query_scalar("PRAGMA page_count")
            .fetch_one(&self.pool)
            .await
            .map_err(map_sqlx_error)?;
        let freelist_count: i64 = sqlx::query_scalar("PRAGMA freelist_count")
            .fetch_one(&self.pool)
            .await
            .map_err(map_sqlx_error)?;
        let page_size: i64 = sqlx::query_scalar("PRAGMA page_size")
            .fetch_one(&self.pool)
            .await
            .map_err(map_sqlx_error)?;
        Ok((page_count, freelist_count, page_size))
    }

    /// Get DB file size in MB
    async fn get_db_size(&self) -> Result<f64> {
        let (page_count, _, page_size) = self.page_stats().await?;
        Ok((page_count * page_size) as f64 / (1024.0 * 1024.0))
    }
}

#[async_trait]
impl Maintenance for SqliteMaintenance {
    async fn vacuum(&self) -> Result<f64> {
        info!("Running VACUUM to optimize database...");

        let size_before = self.get_db_size().await?;

        sqlx::query("VACUUM")
            .execute(&self.pool)
            .await
            .map_err(map_sqlx_error)?;

        let size_after = self.get_db_size().await?;
        let reclaimed = (size_before - size_after).max(0.0);

        info!(
            size_before_mb = size_before,
            size_after_mb = size_after,
            reclaimed_mb = reclaimed,
            "VACUUM completed"
        );

        Ok(reclaimed)
    }

    async fn purge_finished_jobs(&self, before: Timestamp) -> Result<i64> {
        // Execution rows go with the job (ON DELETE CASCADE)
        let result = sqlx::query(
            r#"
            DELETE FROM jobs
            WHERE finished_at IS NOT NULL
            AND failed_at IS NULL
            AND finished_at < ?
            "#,
        )
        .bind(before)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        let deleted = result.rows_affected() as i64;
        info!(deleted_jobs = deleted, cutoff = before, "Finished job purge completed");
        Ok(deleted)
    }

    async fn purge_failed_jobs(&self, before: Timestamp) -> Result<i64> {
        let result = sqlx::query(
            r#"
            DELETE FROM jobs
            WHERE finished_at IS NOT NULL
            AND failed_at IS NOT NULL
            AND failed_at < ?
            "#,
        )
        .bind(before)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        let deleted = result.rows_affected() as i64;
        info!(deleted_jobs = deleted, cutoff = before, "Failed job purge completed");
        Ok(deleted)
    }

    async fn get_stats(&self) -> Result<MaintenanceStats> {
        let (page_count, freelist_count, page_size) = self.page_stats().await?;
        let db_size_bytes = page_count * page_size;

        let (job_count, finished_job_count, failed_job_count): (i64, i64, i64) = sqlx::query_as(
            r#"
            SELECT
                COUNT(*),
                CAST(COALESCE(SUM(CASE WHEN finished_at IS NOT NULL AND failed_at IS NULL THEN 1 ELSE 0 END), 0) AS INTEGER),
                CAST(COALESCE(SUM(CASE WHEN failed_at IS NOT NULL THEN 1 ELSE 0 END), 0) AS INTEGER)
            FROM jobs
            "#,
        )
        .fetch_one(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        let fragmentation_percent = if page_count > 0 {
            freelist_count as f64 / page_count as f64 * 100.0
        } else {
            0.0
        };

        Ok(MaintenanceStats {
            db_size_mb: db_size_bytes as f64 / (1024.0 * 1024.0),
            db_size_bytes,
            job_count,
            finished_job_count,
            failed_job_count,
            fragmentation_percent,
        })
    }
}
