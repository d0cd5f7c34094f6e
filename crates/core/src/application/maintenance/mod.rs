// Maintenance Service
// Scheduled retention cleanup and VACUUM

use crate::application::worker::ShutdownToken;
use crate::error::Result;
use crate::port::{Maintenance, MaintenanceConfig, MaintenanceReport, TimeProvider};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{error, info};

/// Maintenance scheduler
///
/// Runs periodic maintenance operations (retention GC, VACUUM) in the background
pub struct MaintenanceScheduler {
    maintenance: Arc<dyn Maintenance>,
    config: MaintenanceConfig,
    time_provider: Arc<dyn TimeProvider>,
}

impl MaintenanceScheduler {
    pub fn new(
        maintenance: Arc<dyn Maintenance>,
        config: MaintenanceConfig,
        time_provider: Arc<dyn TimeProvider>,
    ) -> Self {
        Self {
            maintenance,
            config,
            time_provider,
        }
    }

    /// Run maintenance loop until shutdown (first pass after one interval)
    pub async fn run(self, mut shutdown: ShutdownToken) {
        info!(
            interval_ms = self.config.interval_ms,
            retention_days = self.config.finished_job_retention_days,
            failed_retention_days = ?self.config.failed_job_retention_days,
            "Maintenance scheduler started"
        );

        let period = Duration::from_millis(self.config.interval_ms.max(1));
        let mut tick = interval_at(Instant::now() + period, period);
        tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = tick.tick() => {}
                _ = shutdown.wait() => break,
            }

            info!("Running scheduled maintenance...");

            match self.run_now(false).await {
                Ok(report) => {
                    info!(
                        jobs_deleted = report.jobs_deleted,
                        failed_jobs_deleted = report.failed_jobs_deleted,
                        db_size_after = report.db_size_after,
                        "Scheduled maintenance completed successfully"
                    );
                }
                Err(e) => {
                    error!(error = ?e, "Scheduled maintenance failed");
                }
            }
        }

        info!("Maintenance scheduler stopped");
    }

    /// Run maintenance immediately (for manual trigger)
    pub async fn run_now(&self, force_vacuum: bool) -> Result<MaintenanceReport> {
        let now = self.time_provider.now_millis();
        self.maintenance
            .run_full_maintenance(&self.config, now, force_vacuum)
            .await
    }
}
