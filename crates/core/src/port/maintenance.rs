// Retention cleanup & DB maintenance port
use crate::domain::Timestamp;
use crate::error::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

const DAY_MS: i64 = 24 * 60 * 60 * 1000;

/// Database maintenance statistics
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MaintenanceStats {
    pub db_size_mb: f64,
    pub db_size_bytes: i64,
    pub job_count: i64,
    pub finished_job_count: i64,
    pub failed_job_count: i64,
    pub fragmentation_percent: f64,
}

/// Outcome of one maintenance pass
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MaintenanceReport {
    pub jobs_deleted: i64,
    pub failed_jobs_deleted: i64,
    pub vacuum_run: bool,
    pub db_size_before: i64,
    pub db_size_after: i64,
}

/// Maintenance configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MaintenanceConfig {
    /// How often the maintenance loop runs
    pub interval_ms: u64,

    /// Retention period for successfully finished jobs (days)
    pub finished_job_retention_days: i64,

    /// Retention period for permanently failed jobs; `None` keeps them
    pub failed_job_retention_days: Option<i64>,

    /// Maximum DB size before forcing VACUUM (MB)
    pub max_db_size_mb: f64,
}

impl Default for MaintenanceConfig {
    fn default() -> Self {
        Self {
            interval_ms: 60 * 60 * 1000,
            finished_job_retention_days: 1,
            failed_job_retention_days: None,
            max_db_size_mb: 1000.0,
        }
    }
}

/// Database maintenance operations
#[async_trait]
pub trait Maintenance: Send + Sync {
    /// Run VACUUM to reclaim space and optimize DB
    ///
    /// # Returns
    /// Space reclaimed in MB
    async fn vacuum(&self) -> Result<f64>;

    /// Delete successfully finished jobs with `finished_at < before`
    ///
    /// # Returns
    /// Number of jobs deleted
    async fn purge_finished_jobs(&self, before: Timestamp) -> Result<i64>;

    /// Delete permanently failed jobs with `failed_at < before`
    async fn purge_failed_jobs(&self, before: Timestamp) -> Result<i64>;

    /// Get maintenance statistics
    async fn get_stats(&self) -> Result<MaintenanceStats>;

    /// Run full maintenance (retention GC + VACUUM)
    async fn run_full_maintenance(
        &self,
        config: &MaintenanceConfig,
        now: Timestamp,
        force_vacuum: bool,
    ) -> Result<MaintenanceReport> {
        // 1. Get pre-maintenance stats
        let stats_before = self.get_stats().await?;

        // 2. GC finished jobs
        let jobs_deleted = self
            .purge_finished_jobs(now - config.finished_job_retention_days * DAY_MS)
            .await?;

        // 3. GC failed jobs, only when a retention is configured
        let failed_jobs_deleted = match config.failed_job_retention_days {
            Some(days) => self.purge_failed_jobs(now - days * DAY_MS).await?,
            None => 0,
        };

        // 4. VACUUM if DB is large
        let vacuum_run = force_vacuum || stats_before.db_size_mb > config.max_db_size_mb;
        let reclaimed_mb = if vacuum_run { self.vacuum().await? } else { 0.0 };

        // 5. Get post-maintenance stats
        let stats_after = self.get_stats().await?;

        tracing::info!(
            jobs_deleted = jobs_deleted,
            failed_jobs_deleted = failed_jobs_deleted,
            reclaimed_mb = reclaimed_mb,
            db_size_mb = stats_after.db_size_mb,
            "Maintenance completed"
        );

        Ok(MaintenanceReport {
            jobs_deleted,
            failed_jobs_deleted,
            vacuum_run,
            db_size_before: stats_before.db_size_bytes,
            db_size_after: stats_after.db_size_bytes,
        })
    }
}
