// Worker - pool of execution slots claiming and running jobs

mod circuit_breaker;
pub mod constants;
mod panic_guard;
mod shutdown;

use constants::*;
pub use circuit_breaker::{BreakerState, SlotBreaker};
pub use panic_guard::{execute_guarded, panic_message, PanicGuardResult};
pub use shutdown::{shutdown_channel, ShutdownSender, ShutdownToken};

use crate::application::backoff::retry_transient;
use crate::application::handlers::HandlerRegistry;
use crate::application::registry::{HeartbeatExit, HeartbeatLoop};
use crate::application::retry::{RetryDecision, RetryPolicy};
use crate::config::WorkerConfig;
use crate::domain::{ClaimedJob, ExecutionFailure, JobId, ProcessId, Timestamp};
use crate::error::Result;
use crate::port::{ExecutionError, JobStore, ProcessRegistry, TimeProvider};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tracing::{error, info, warn};

/// How one job ended
#[derive(Debug, Clone, PartialEq)]
pub enum JobOutcome {
    Finished,
    /// Failed and parked in Scheduled for another attempt
    Retrying { delay_ms: i64 },
    /// Failed for good
    Failed,
}

/// Why an execution slot stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotExit {
    Shutdown,
    Tripped,
}

/// Why the whole worker stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerExit {
    Shutdown,
    /// Every slot tripped its circuit breaker
    AllSlotsTripped,
    /// Own process row is gone
    Lost,
}

/// Worker processes jobs from its subscribed queues
#[derive(Clone)]
pub struct Worker {
    config: WorkerConfig,
    job_store: Arc<dyn JobStore>,
    registry: Arc<dyn ProcessRegistry>,
    handlers: Arc<HandlerRegistry>,
    retry_policy: Arc<RetryPolicy>,
    time_provider: Arc<dyn TimeProvider>,
    shutdown_timeout: Duration,
}

impl Worker {
    pub fn new(
        config: WorkerConfig,
        job_store: Arc<dyn JobStore>,
        registry: Arc<dyn ProcessRegistry>,
        handlers: Arc<HandlerRegistry>,
        retry_policy: Arc<RetryPolicy>,
        time_provider: Arc<dyn TimeProvider>,
    ) -> Self {
        Self {
            config,
            job_store,
            registry,
            handlers,
            retry_policy,
            time_provider,
            shutdown_timeout: DEFAULT_SHUTDOWN_TIMEOUT,
        }
    }

    /// Grace period for in-flight jobs once the worker is told to stop
    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }

    pub fn config(&self) -> &WorkerConfig {
        &self.config
    }

    /// Run the heartbeat and all slots under the registered `process_id`
    pub async fn run(&self, process_id: ProcessId, shutdown: ShutdownToken) -> Result<WorkerExit> {
        info!(
            process_id = %process_id,
            queues = %self.config.queues,
            threads = self.config.threads,
            "Worker started"
        );

        // Slots and heartbeat stop on either the caller's signal or our own
        let (local_tx, local_token) = shutdown_channel();

        let heartbeat = HeartbeatLoop::new(
            Arc::clone(&self.registry),
            process_id,
            self.config.heartbeat_interval(),
        );
        let mut heartbeat_task = tokio::spawn(heartbeat.run(local_token.clone()));

        let mut slots = JoinSet::new();
        for slot in 0..self.config.threads {
            let worker = self.clone();
            let token = local_token.clone();
            slots.spawn(async move { worker.run_slot(process_id, slot, token).await });
        }

        let mut caller = shutdown;
        let mut tripped = 0;
        let exit = loop {
            tokio::select! {
                _ = caller.wait() => break WorkerExit::Shutdown,
                beat = &mut heartbeat_task => {
                    match beat {
                        Ok(HeartbeatExit::Lost) => break WorkerExit::Lost,
                        Ok(HeartbeatExit::Shutdown) => break WorkerExit::Shutdown,
                        Err(e) => {
                            error!(process_id = %process_id, error = %e, "Heartbeat task died");
                            break WorkerExit::Lost;
                        }
                    }
                }
                joined = slots.join_next() => {
                    match joined {
                        Some(Ok(SlotExit::Tripped)) => tripped += 1,
                        Some(Ok(SlotExit::Shutdown)) => {}
                        Some(Err(e)) => {
                            error!(process_id = %process_id, error = %e, "Execution slot died");
                            tripped += 1;
                        }
                        None => {
                            break if tripped > 0 { WorkerExit::AllSlotsTripped } else { WorkerExit::Shutdown };
                        }
                    }
                }
            }
        };

        local_tx.shutdown();

        // Let in-flight jobs finish; whatever is left is reclaimed later
        let drained = tokio::time::timeout(self.shutdown_timeout, async {
            while slots.join_next().await.is_some() {}
        })
        .await;
        if drained.is_err() {
            warn!(
                process_id = %process_id,
                timeout_ms = self.shutdown_timeout.as_millis() as u64,
                "Slots still busy after grace period, aborting"
            );
            slots.abort_all();
        }
        heartbeat_task.abort();

        info!(process_id = %process_id, exit = ?exit, "Worker stopped");
        Ok(exit)
    }

    /// One execution slot: claim, execute, resolve, until shutdown or breaker trip
    pub async fn run_slot(&self, process_id: ProcessId, slot: usize, mut shutdown: ShutdownToken) -> SlotExit {
        let mut breaker = SlotBreaker::new(&self.config.circuit_breaker);

        loop {
            if shutdown.is_shutdown() {
                return SlotExit::Shutdown;
            }

            let claimed = match self.claim(process_id).await {
                Ok(claimed) => claimed,
                Err(e) => {
                    error!(process_id = %process_id, slot = slot, error = %e, "Claim failed");
                    if self.trip(&mut breaker, process_id, slot) {
                        return SlotExit::Tripped;
                    }
                    if shutdown.sleep_or_shutdown(ERROR_RECOVERY_SLEEP_DURATION).await {
                        return SlotExit::Shutdown;
                    }
                    continue;
                }
            };

            if claimed.is_empty() {
                if shutdown.sleep_or_shutdown(self.config.polling_interval()).await {
                    return SlotExit::Shutdown;
                }
                continue;
            }

            for claimed_job in claimed {
                match self.process_job(claimed_job).await {
                    Ok(JobOutcome::Finished) => {}
                    Ok(_) | Err(_) => {
                        if self.trip(&mut breaker, process_id, slot) {
                            return SlotExit::Tripped;
                        }
                    }
                }
            }
        }
    }

    /// Claim a batch for this worker's queues
    pub async fn claim(&self, process_id: ProcessId) -> Result<Vec<ClaimedJob>> {
        let store = &self.job_store;
        let queues = &self.config.queues;
        let limit = self.config.batch_size;
        retry_transient("claim", move || async move {
            store.claim(process_id, queues, limit).await
        })
        .await
    }

    /// Execute one claimed job and record its outcome
    pub async fn process_job(&self, claimed: ClaimedJob) -> Result<JobOutcome> {
        let job = claimed.job;
        info!(job_id = %job.id, class = %job.class_name, attempt = job.attempts, "Processing job");

        let result = match self.handlers.resolve(&job) {
            Ok(invocation) => {
                // Own task so a panicking handler cannot take the slot down
                let guarded = execute_guarded(async move {
                    invocation
                        .handler
                        .perform(&invocation.context, invocation.arguments)
                        .await
                })
                .await;
                match guarded {
                    PanicGuardResult::Success(result) => result,
                    PanicGuardResult::Panicked(msg) => Err(ExecutionError::Panicked(msg)),
                }
            }
            Err(e) => Err(e),
        };

        match result {
            Ok(()) => {
                self.finish(job.id).await?;
                info!(job_id = %job.id, "Job finished");
                Ok(JobOutcome::Finished)
            }
            Err(exec_err) => {
                let failure = exec_err.to_failure();

                match self.retry_policy.should_retry(&job, &failure) {
                    RetryDecision::Retry(delay_ms) => {
                        let at = self.time_provider.now_millis().saturating_add(delay_ms);
                        self.fail_and_retry_at(job.id, &failure, at).await?;
                        warn!(
                            job_id = %job.id,
                            error_class = %failure.error_class,
                            error = %failure.message,
                            delay_ms = delay_ms,
                            "Job failed, retry scheduled"
                        );
                        Ok(JobOutcome::Retrying { delay_ms })
                    }
                    RetryDecision::Exhausted => {
                        self.fail(job.id, &failure).await?;
                        error!(
                            job_id = %job.id,
                            error_class = %failure.error_class,
                            error = %failure.message,
                            attempts = job.attempts,
                            "Job failed permanently"
                        );
                        Ok(JobOutcome::Failed)
                    }
                }
            }
        }
    }

    async fn finish(&self, job_id: JobId) -> Result<()> {
        let store = &self.job_store;
        retry_transient("mark_finished", move || async move { store.mark_finished(job_id).await })
            .await
            .inspect_err(|e| error!(job_id = %job_id, error = %e, "Failed to mark job finished"))
    }

    async fn fail(&self, job_id: JobId, failure: &ExecutionFailure) -> Result<()> {
        let store = &self.job_store;
        retry_transient("mark_failed", move || async move {
            store.mark_failed(job_id, failure).await
        })
        .await
        .inspect_err(|e| error!(job_id = %job_id, error = %e, "Failed to mark job failed"))
    }

    async fn fail_and_retry_at(
        &self,
        job_id: JobId,
        failure: &ExecutionFailure,
        at: Timestamp,
    ) -> Result<()> {
        let store = &self.job_store;
        retry_transient("fail_and_retry_at", move || async move {
            store.fail_and_retry_at(job_id, failure, at).await
        })
        .await
        .map(|_| ())
        .inspect_err(|e| error!(job_id = %job_id, error = %e, "Failed to schedule job retry"))
    }

    /// Record an error; true when the slot must stop
    fn trip(&self, breaker: &mut SlotBreaker, process_id: ProcessId, slot: usize) -> bool {
        let now = self.time_provider.now_millis();
        if breaker.record_error(now) == BreakerState::Tripped {
            error!(
                process_id = %process_id,
                slot = slot,
                errors = breaker.error_count(),
                window_ms = self.config.circuit_breaker.reset_window_ms,
                "Circuit breaker tripped, execution slot stopping"
            );
            return true;
        }
        false
    }
}
