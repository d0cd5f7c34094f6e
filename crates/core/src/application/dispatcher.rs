// Dispatcher - promotes due work into the Ready set
//
// Cycle order: heartbeat, promote Scheduled, materialize recurring tasks,
// reclaim orphaned claims, expire Blocked (and, less often, semaphores).

use crate::application::backoff::retry_transient;
use crate::application::recovery::OrphanReclaimer;
use crate::application::registry::HeartbeatLoop;
use crate::application::scheduler::RecurringScheduler;
use crate::application::worker::ShutdownToken;
use crate::config::DispatcherConfig;
use crate::domain::{ProcessId, RecurringTask};
use crate::error::Result;
use crate::port::{JobStore, ProcessRegistry, TimeProvider};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Counts produced by one poll cycle
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CycleReport {
    pub promoted: usize,
    pub materialized: usize,
    pub reclaimed: usize,
    pub unblocked: usize,
    pub semaphores_expired: u64,
    /// Steps that failed this cycle
    pub errors: usize,
}

impl CycleReport {
    /// Whether the next cycle should start without sleeping
    pub fn found_work(&self) -> bool {
        self.promoted + self.materialized + self.reclaimed + self.unblocked > 0
    }
}

/// Why a dispatcher loop ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatcherExit {
    Shutdown,
    /// Own process row is gone
    Lost,
}

pub struct Dispatcher {
    config: DispatcherConfig,
    job_store: Arc<dyn JobStore>,
    registry: Arc<dyn ProcessRegistry>,
    scheduler: RecurringScheduler,
    reclaimer: OrphanReclaimer,
    recurring_tasks: Vec<RecurringTask>,
    time_provider: Arc<dyn TimeProvider>,
}

impl Dispatcher {
    pub fn new(
        config: DispatcherConfig,
        job_store: Arc<dyn JobStore>,
        registry: Arc<dyn ProcessRegistry>,
        scheduler: RecurringScheduler,
        reclaimer: OrphanReclaimer,
        time_provider: Arc<dyn TimeProvider>,
    ) -> Self {
        Self {
            config,
            job_store,
            registry,
            scheduler,
            reclaimer,
            recurring_tasks: Vec::new(),
            time_provider,
        }
    }

    /// Recurring tasks upserted when the loop starts
    pub fn with_recurring_tasks(mut self, tasks: Vec<RecurringTask>) -> Self {
        self.recurring_tasks = tasks;
        self
    }

    /// Run one poll cycle as `process_id`
    pub async fn run_cycle(&self, process_id: ProcessId, expire_semaphores: bool) -> Result<CycleReport> {
        // Heartbeat first so a stalled dispatcher is visible to the monitor
        HeartbeatLoop::new(Arc::clone(&self.registry), process_id, Duration::ZERO)
            .beat()
            .await?;

        let batch = self.config.batch_size;
        let mut report = CycleReport::default();

        let store = &self.job_store;
        match retry_transient("promote_due_scheduled", move || async move {
            store.promote_due_scheduled(batch).await
        })
        .await
        {
            Ok(ids) => report.promoted = ids.len(),
            Err(e) => Self::step_failed("promote", &e, &mut report),
        }

        match self.scheduler.materialize_due(batch).await {
            Ok(ids) => report.materialized = ids.len(),
            Err(e) => Self::step_failed("recurring", &e, &mut report),
        }

        match self.reclaimer.reclaim(batch).await {
            Ok(reclaim) => report.reclaimed = reclaim.released_count(),
            Err(e) => Self::step_failed("reclaim", &e, &mut report),
        }

        match retry_transient("expire_blocked", move || async move {
            store.expire_blocked(batch).await
        })
        .await
        {
            Ok(ids) => report.unblocked = ids.len(),
            Err(e) => Self::step_failed("expire_blocked", &e, &mut report),
        }

        if expire_semaphores {
            match retry_transient("expire_semaphores", move || async move {
                store.expire_semaphores().await
            })
            .await
            {
                Ok(n) => report.semaphores_expired = n,
                Err(e) => Self::step_failed("expire_semaphores", &e, &mut report),
            }
        }

        Ok(report)
    }

    /// Poll until shutdown or until the process row disappears
    pub async fn run(&self, process_id: ProcessId, mut shutdown: ShutdownToken) -> Result<DispatcherExit> {
        info!(
            process_id = %process_id,
            batch_size = self.config.batch_size,
            polling_interval_ms = self.config.polling_interval_ms,
            "Dispatcher started"
        );

        if let Err(e) = self.scheduler.sync(&self.recurring_tasks).await {
            error!(error = %e, "Failed to sync recurring tasks");
        }

        let semaphore_every = self.config.concurrency_maintenance_interval_ms as i64;
        let mut last_semaphore_sweep = i64::MIN;
        let mut failed_cycles: u64 = 0;

        loop {
            if shutdown.is_shutdown() {
                break;
            }

            let now = self.time_provider.now_millis();
            let expire_semaphores = now.saturating_sub(last_semaphore_sweep) >= semaphore_every;

            let found_work = match self.run_cycle(process_id, expire_semaphores).await {
                Ok(report) => {
                    if expire_semaphores {
                        last_semaphore_sweep = now;
                    }
                    if report.errors > 0 {
                        failed_cycles += 1;
                    }
                    if report.found_work() {
                        debug!(
                            promoted = report.promoted,
                            materialized = report.materialized,
                            reclaimed = report.reclaimed,
                            unblocked = report.unblocked,
                            "Dispatcher cycle"
                        );
                    }
                    report.found_work()
                }
                Err(e) if e.is_not_found() => {
                    error!(process_id = %process_id, "Dispatcher process row vanished");
                    return Ok(DispatcherExit::Lost);
                }
                Err(e) => {
                    failed_cycles += 1;
                    warn!(error = %e, failed_cycles = failed_cycles, "Dispatcher cycle failed");
                    false
                }
            };

            if found_work {
                // Drain backlog without sleeping, but still let other tasks run
                tokio::task::yield_now().await;
                continue;
            }

            if shutdown.sleep_or_shutdown(self.config.polling_interval()).await {
                break;
            }
        }

        info!(process_id = %process_id, failed_cycles = failed_cycles, "Dispatcher stopped");
        Ok(DispatcherExit::Shutdown)
    }

    fn step_failed(step: &str, err: &crate::error::AppError, report: &mut CycleReport) {
        report.errors += 1;
        error!(step = step, error = %err, "Dispatcher step failed");
    }
}
