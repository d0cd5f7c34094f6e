// Supervisor - owns the worker and dispatcher lifecycles for one host
//
// Registers itself and its children, heartbeats its own row, and restarts
// all children when one of them exits or loses its registry row. After
// `max_restarts` restarts it stops everything and returns an error so an
// outer process manager can take over.

use crate::application::dispatcher::Dispatcher;
use crate::application::handlers::HandlerRegistry;
use crate::application::maintenance::MaintenanceScheduler;
use crate::application::recovery::OrphanReclaimer;
use crate::application::registry::{register_process, HeartbeatExit, HeartbeatLoop};
use crate::application::retry::RetryPolicy;
use crate::application::scheduler::RecurringScheduler;
use crate::application::worker::{shutdown_channel, ShutdownSender, ShutdownToken, Worker};
use crate::config::EngineConfig;
use crate::domain::{ProcessId, ProcessKind, ReclaimReason, RecurringTask};
use crate::error::{AppError, Result};
use crate::port::{
    IdProvider, JobStore, Maintenance, ProcessProbe, ProcessRegistry, RecurringTaskStore,
    TimeProvider,
};
use futures::future::join_all;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

/// Store adapters and providers the engine runs on
#[derive(Clone)]
pub struct EngineServices {
    pub job_store: Arc<dyn JobStore>,
    pub registry: Arc<dyn ProcessRegistry>,
    pub recurring_store: Arc<dyn RecurringTaskStore>,
    /// `None` disables the retention loop
    pub maintenance: Option<Arc<dyn Maintenance>>,
    pub probe: Arc<dyn ProcessProbe>,
    pub ids: Arc<dyn IdProvider>,
    pub time_provider: Arc<dyn TimeProvider>,
}

impl EngineServices {
    pub fn reclaimer(&self, process_timeout_ms: i64) -> OrphanReclaimer {
        OrphanReclaimer::new(
            Arc::clone(&self.job_store),
            Arc::clone(&self.registry),
            Arc::clone(&self.probe),
            Arc::clone(&self.time_provider),
            process_timeout_ms,
        )
    }
}

struct Child {
    kind: ProcessKind,
    process_id: ProcessId,
    handle: JoinHandle<()>,
}

/// One generation of children sharing a shutdown signal
struct Children {
    tx: ShutdownSender,
    members: Vec<Child>,
}

struct SupervisorRow {
    process_id: ProcessId,
    heartbeat: JoinHandle<HeartbeatExit>,
    tx: ShutdownSender,
}

pub struct Supervisor {
    config: EngineConfig,
    services: EngineServices,
    handlers: Arc<HandlerRegistry>,
    retry_policy: Arc<RetryPolicy>,
}

impl Supervisor {
    pub fn new(config: EngineConfig, services: EngineServices, handlers: Arc<HandlerRegistry>) -> Self {
        let retry_policy = Arc::new(RetryPolicy::new(config.retry.clone()));
        Self {
            config,
            services,
            handlers,
            retry_policy,
        }
    }

    /// Run until `shutdown`; errors when the restart budget is spent
    pub async fn run(&self, mut shutdown: ShutdownToken) -> Result<()> {
        let mut row = self.register_self().await?;

        // Claims left behind by a previous crash go back to Ready right away
        let reclaimer = self.services.reclaimer(self.config.dispatcher.process_timeout_ms);
        match reclaimer.reclaim(self.config.dispatcher.batch_size).await {
            Ok(report) if report.released_count() > 0 => {
                info!(released = report.released_count(), "Startup recovery reclaimed jobs")
            }
            Ok(_) => {}
            Err(e) => warn!(error = %e, "Startup recovery failed"),
        }

        let (maintenance_tx, maintenance_task) = self.spawn_maintenance();

        let mut children = self.start_children(row.process_id).await?;
        let monitor_interval = Duration::from_millis(self.config.supervisor.monitor_interval_ms);
        let mut restarts: u32 = 0;

        let outcome = loop {
            if shutdown.sleep_or_shutdown(monitor_interval).await {
                break Ok(());
            }

            let own_row_ok = self.row_present(row.process_id).await && !row.heartbeat.is_finished();
            let children_ok = self.children_healthy(&children).await;
            if own_row_ok && children_ok {
                continue;
            }

            restarts += 1;
            if restarts > self.config.supervisor.max_restarts {
                error!(
                    restarts = restarts - 1,
                    max_restarts = self.config.supervisor.max_restarts,
                    "Supervisor giving up"
                );
                break Err(AppError::Internal(format!(
                    "supervisor gave up after {} restarts",
                    restarts - 1
                )));
            }

            warn!(
                restart = restarts,
                max_restarts = self.config.supervisor.max_restarts,
                supervisor_row_lost = !own_row_ok,
                "Child process lost, restarting children"
            );

            self.stop_children(children).await;
            if !own_row_ok {
                self.retire_row(row).await;
                row = self.register_self().await?;
            }
            children = self.start_children(row.process_id).await?;
        };

        self.stop_children(children).await;
        if let Some(tx) = maintenance_tx {
            tx.shutdown();
        }
        if let Some(task) = maintenance_task {
            let _ = task.await;
        }
        self.retire_row(row).await;

        info!("Supervisor stopped");
        outcome
    }

    async fn register_self(&self) -> Result<SupervisorRow> {
        let process = register_process(
            self.services.registry.as_ref(),
            self.services.probe.as_ref(),
            self.services.ids.as_ref(),
            ProcessKind::Supervisor,
            None,
            serde_json::json!({
                "workers": self.config.workers.len(),
                "max_restarts": self.config.supervisor.max_restarts,
            }),
        )
        .await?;

        let (tx, token) = shutdown_channel();
        let heartbeat = tokio::spawn(
            HeartbeatLoop::new(
                Arc::clone(&self.services.registry),
                process.id,
                Duration::from_millis(self.config.supervisor.heartbeat_interval_ms),
            )
            .run(token),
        );

        Ok(SupervisorRow {
            process_id: process.id,
            heartbeat,
            tx,
        })
    }

    /// Stop the supervisor heartbeat and delete its subtree
    async fn retire_row(&self, row: SupervisorRow) {
        row.tx.shutdown();
        let _ = row.heartbeat.await;
        self.deregister(row.process_id).await;
    }

    async fn start_children(&self, supervisor_id: ProcessId) -> Result<Children> {
        let (tx, token) = shutdown_channel();
        let mut members = Vec::new();

        for worker_config in &self.config.workers {
            let process = register_process(
                self.services.registry.as_ref(),
                self.services.probe.as_ref(),
                self.services.ids.as_ref(),
                ProcessKind::Worker,
                Some(supervisor_id),
                serde_json::json!({
                    "queues": worker_config.queues,
                    "threads": worker_config.threads,
                    "polling_interval_ms": worker_config.polling_interval_ms,
                    "batch_size": worker_config.batch_size,
                }),
            )
            .await?;

            let worker = Worker::new(
                worker_config.clone(),
                Arc::clone(&self.services.job_store),
                Arc::clone(&self.services.registry),
                Arc::clone(&self.handlers),
                Arc::clone(&self.retry_policy),
                Arc::clone(&self.services.time_provider),
            )
            .with_shutdown_timeout(Duration::from_millis(
                self.config.supervisor.shutdown_timeout_ms,
            ));
            let child_token = token.clone();
            let process_id = process.id;
            let handle = tokio::spawn(async move {
                match worker.run(process_id, child_token).await {
                    Ok(exit) => info!(process_id = %process_id, exit = ?exit, "Worker exited"),
                    Err(e) => error!(process_id = %process_id, error = %e, "Worker failed"),
                }
            });
            members.push(Child {
                kind: ProcessKind::Worker,
                process_id,
                handle,
            });
        }

        let dispatcher_config = self.config.dispatcher.clone();
        let process = register_process(
            self.services.registry.as_ref(),
            self.services.probe.as_ref(),
            self.services.ids.as_ref(),
            ProcessKind::Dispatcher,
            Some(supervisor_id),
            serde_json::json!({
                "batch_size": dispatcher_config.batch_size,
                "polling_interval_ms": dispatcher_config.polling_interval_ms,
                "recurring_tasks": self.config.recurring.len(),
            }),
        )
        .await?;

        let recurring: Vec<RecurringTask> =
            self.config.recurring.iter().map(|t| t.to_task()).collect();
        let dispatcher = Dispatcher::new(
            dispatcher_config.clone(),
            Arc::clone(&self.services.job_store),
            Arc::clone(&self.services.registry),
            RecurringScheduler::new(
                Arc::clone(&self.services.recurring_store),
                Arc::clone(&self.services.time_provider),
            ),
            self.services.reclaimer(dispatcher_config.process_timeout_ms),
            Arc::clone(&self.services.time_provider),
        )
        .with_recurring_tasks(recurring);

        let process_id = process.id;
        let child_token = token.clone();
        let handle = tokio::spawn(async move {
            match dispatcher.run(process_id, child_token).await {
                Ok(exit) => info!(process_id = %process_id, exit = ?exit, "Dispatcher exited"),
                Err(e) => error!(process_id = %process_id, error = %e, "Dispatcher failed"),
            }
        });
        members.push(Child {
            kind: ProcessKind::Dispatcher,
            process_id,
            handle,
        });

        Ok(Children { tx, members })
    }

    /// Signal, await with timeout, abort stragglers, deregister
    async fn stop_children(&self, children: Children) {
        children.tx.shutdown();
        let timeout = Duration::from_millis(self.config.supervisor.shutdown_timeout_ms);

        let stopped = join_all(children.members.into_iter().map(|mut child| async move {
            if tokio::time::timeout(timeout, &mut child.handle).await.is_err() {
                warn!(process_id = %child.process_id, kind = %child.kind, "Child did not stop in time, aborting");
                child.handle.abort();
            }
            child.process_id
        }))
        .await;

        for process_id in stopped {
            self.deregister(process_id).await;
        }
    }

    async fn children_healthy(&self, children: &Children) -> bool {
        let mut healthy = true;
        for child in &children.members {
            if child.handle.is_finished() {
                warn!(process_id = %child.process_id, kind = %child.kind, "Child loop exited");
                healthy = false;
            } else if !self.row_present(child.process_id).await {
                warn!(process_id = %child.process_id, kind = %child.kind, "Child registry row missing");
                healthy = false;
            }
        }
        healthy
    }

    /// Store errors count as present; only a confirmed missing row is fatal
    async fn row_present(&self, process_id: ProcessId) -> bool {
        match self.services.registry.find(process_id).await {
            Ok(found) => found.is_some(),
            Err(e) => {
                warn!(process_id = %process_id, error = %e, "Registry lookup failed");
                true
            }
        }
    }

    async fn deregister(&self, process_id: ProcessId) {
        match self.services.registry.deregister(process_id).await {
            Ok(removed) if !removed.is_empty() => {
                for job_id in &removed.released_jobs {
                    info!(job_id = %job_id, reason = %ReclaimReason::Deregistered, "Claim released");
                }
                info!(
                    process_id = %process_id,
                    released_jobs = removed.released_jobs.len(),
                    "Process deregistered"
                );
            }
            Ok(_) => {}
            Err(e) => error!(process_id = %process_id, error = %e, "Failed to deregister process"),
        }
    }

    fn spawn_maintenance(&self) -> (Option<ShutdownSender>, Option<JoinHandle<()>>) {
        let Some(maintenance) = self.services.maintenance.as_ref() else {
            return (None, None);
        };
        let (tx, token) = shutdown_channel();
        let scheduler = MaintenanceScheduler::new(
            Arc::clone(maintenance),
            self.config.maintenance.clone(),
            Arc::clone(&self.services.time_provider),
        );
        (Some(tx), Some(tokio::spawn(scheduler.run(token))))
    }
}
