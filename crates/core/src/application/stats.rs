// Health snapshot for dashboards and the admin RPC

use crate::domain::ProcessKind;
use crate::error::Result;
use crate::port::{JobStore, ProcessRegistry, QueueCounts, TimeProvider};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthSnapshot {
    pub queues: Vec<QueueCounts>,
    /// Workers whose heartbeat is within the process timeout
    pub active_workers: usize,
    pub active_dispatchers: usize,
    pub window_ms: i64,
    pub finished_in_window: i64,
    pub failed_in_window: i64,
    /// failed / (finished + failed) within the window; 0.0 when idle
    pub failure_rate: f64,
    pub taken_at: i64,
}

pub struct StatsService {
    job_store: Arc<dyn JobStore>,
    registry: Arc<dyn ProcessRegistry>,
    time_provider: Arc<dyn TimeProvider>,
    process_timeout_ms: i64,
}

impl StatsService {
    pub fn new(
        job_store: Arc<dyn JobStore>,
        registry: Arc<dyn ProcessRegistry>,
        time_provider: Arc<dyn TimeProvider>,
        process_timeout_ms: i64,
    ) -> Self {
        Self {
            job_store,
            registry,
            time_provider,
            process_timeout_ms,
        }
    }

    pub async fn snapshot(&self, window_ms: i64) -> Result<HealthSnapshot> {
        let now = self.time_provider.now_millis();
        let queues = self.job_store.queue_counts().await?;
        let outcomes = self.job_store.outcome_counts(now - window_ms).await?;
        let processes = self.registry.list().await?;

        let alive = |kind: ProcessKind| {
            processes
                .iter()
                .filter(|p| p.kind == kind && !p.heartbeat_expired(now, self.process_timeout_ms))
                .count()
        };

        let total = outcomes.finished + outcomes.failed;
        let failure_rate = if total == 0 {
            0.0
        } else {
            outcomes.failed as f64 / total as f64
        };

        Ok(HealthSnapshot {
            queues,
            active_workers: alive(ProcessKind::Worker),
            active_dispatchers: alive(ProcessKind::Dispatcher),
            window_ms,
            finished_in_window: outcomes.finished,
            failed_in_window: outcomes.failed,
            failure_rate,
            taken_at: now,
        })
    }
}
