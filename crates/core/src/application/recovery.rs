// Orphan reclaim: stale processes are swept, their claims go back to Ready
use crate::application::backoff::retry_transient;
use crate::domain::{JobId, Process, ProcessId, ReclaimReason};
use crate::error::Result;
use crate::port::{JobStore, ProcessProbe, ProcessRegistry, TimeProvider};
use std::sync::Arc;
use tracing::{info, warn};

/// What one reclaim pass did
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReclaimReport {
    /// Deregistered process rows (including supervised children)
    pub swept_processes: Vec<ProcessId>,
    pub released: Vec<(JobId, ReclaimReason)>,
}

impl ReclaimReport {
    pub fn released_count(&self) -> usize {
        self.released.len()
    }
}

/// Crash recovery service
///
/// A process is dead when its heartbeat is older than the process timeout,
/// or when it claims to run on this host under a pid that no longer exists.
pub struct OrphanReclaimer {
    job_store: Arc<dyn JobStore>,
    registry: Arc<dyn ProcessRegistry>,
    probe: Arc<dyn ProcessProbe>,
    time_provider: Arc<dyn TimeProvider>,
    process_timeout_ms: i64,
}

impl OrphanReclaimer {
    pub fn new(
        job_store: Arc<dyn JobStore>,
        registry: Arc<dyn ProcessRegistry>,
        probe: Arc<dyn ProcessProbe>,
        time_provider: Arc<dyn TimeProvider>,
        process_timeout_ms: i64,
    ) -> Self {
        Self {
            job_store,
            registry,
            probe,
            time_provider,
            process_timeout_ms,
        }
    }

    /// Deregister every dead process; their claims return to Ready
    pub async fn sweep_stale(&self) -> Result<ReclaimReport> {
        let now = self.time_provider.now_millis();
        let hostname = self.probe.hostname();
        let processes = retry_transient("list_processes", || self.registry.list()).await?;

        let mut report = ReclaimReport::default();
        for process in processes {
            // Already removed as part of a swept supervisor's subtree
            if report.swept_processes.contains(&process.id) {
                continue;
            }
            if !self.is_dead(&process, now, &hostname) {
                continue;
            }

            let process_id = process.id;
            let registry = &self.registry;
            let removed = retry_transient("deregister", move || async move {
                registry.deregister(process_id).await
            })
            .await?;

            warn!(
                process_id = %process.id,
                kind = %process.kind,
                name = %process.name,
                last_heartbeat_at = %process.last_heartbeat_at,
                released_jobs = removed.released_jobs.len(),
                "Stale process deregistered"
            );

            report.swept_processes.extend(removed.processes);
            report.released.extend(
                removed
                    .released_jobs
                    .into_iter()
                    .map(|job_id| (job_id, ReclaimReason::StaleProcess)),
            );
        }

        Ok(report)
    }

    /// Sweep stale processes, then release claims whose owner row is already gone
    pub async fn reclaim(&self, limit: usize) -> Result<ReclaimReport> {
        let mut report = self.sweep_stale().await?;

        let orphans = retry_transient("release_orphaned_claims", || {
            self.job_store.release_orphaned_claims(limit)
        })
        .await?;

        for job_id in orphans {
            info!(job_id = %job_id, reason = %ReclaimReason::OrphanedClaim, "Claim reclaimed");
            report.released.push((job_id, ReclaimReason::OrphanedClaim));
        }

        if !report.released.is_empty() {
            info!(
                swept_processes = report.swept_processes.len(),
                released = report.released_count(),
                "Orphan reclaim complete"
            );
        }
        Ok(report)
    }

    fn is_dead(&self, process: &Process, now: i64, hostname: &str) -> bool {
        if process.heartbeat_expired(now, self.process_timeout_ms) {
            return true;
        }
        process.hostname == hostname && !self.probe.is_alive(process.pid)
    }
}
