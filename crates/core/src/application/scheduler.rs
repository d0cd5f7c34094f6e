//! Recurring task scheduler
//!
//! Keeps the stored recurring tasks in line with configuration and turns
//! due fire times into jobs. Each `(task_key, run_at)` produces at most one
//! job no matter how many dispatchers race on it.

use crate::application::backoff::retry_transient;
use crate::domain::{next_fire, JobId, RecurringTask, Timestamp};
use crate::error::Result;
use crate::port::{RecurringTaskStore, TimeProvider};
use std::sync::Arc;
use tracing::{debug, info, warn};

pub struct RecurringScheduler {
    store: Arc<dyn RecurringTaskStore>,
    time_provider: Arc<dyn TimeProvider>,
}

impl RecurringScheduler {
    pub fn new(store: Arc<dyn RecurringTaskStore>, time_provider: Arc<dyn TimeProvider>) -> Self {
        Self {
            store,
            time_provider,
        }
    }

    /// Upsert `tasks` and delete stored tasks that are no longer configured.
    ///
    /// Returns the stored tasks after the sync.
    pub async fn sync(&self, tasks: &[RecurringTask]) -> Result<Vec<RecurringTask>> {
        let now = self.time_provider.now_millis();

        for task in tasks {
            let mut task = task.clone();
            task.next_at = next_fire(&task.schedule, now);
            if task.next_at.is_none() {
                warn!(task_key = %task.key, schedule = %task.schedule, "Recurring task will never fire");
            }
            let stored = self.store.upsert(&task).await?;
            debug!(task_key = %stored.key, next_at = ?stored.next_at, "Recurring task synced");
        }

        let keep: Vec<String> = tasks.iter().map(|t| t.key.clone()).collect();
        let removed = self.store.delete_not_in(&keep).await?;
        if removed > 0 {
            info!(removed = removed, "Removed unconfigured recurring tasks");
        }

        self.store.list().await
    }

    /// Materialize every due task once.
    ///
    /// The next fire time is computed from `max(run_at, now)`, so fires missed
    /// while no dispatcher ran are skipped rather than replayed.
    pub async fn materialize_due(&self, limit: usize) -> Result<Vec<JobId>> {
        let now = self.time_provider.now_millis();
        let store = &self.store;
        let due = retry_transient("recurring_due", move || async move {
            store.due(now, limit).await
        })
        .await?;

        let mut created = Vec::new();
        for task in due {
            let Some(run_at) = task.next_at else {
                continue;
            };
            let next_at = Self::following(&task, run_at, now);

            let task_ref = &task;
            let outcome = retry_transient("recurring_materialize", move || async move {
                store.materialize(task_ref, run_at, next_at).await
            })
            .await?;

            match outcome {
                Some(job_id) => {
                    info!(
                        task_key = %task.key,
                        job_id = %job_id,
                        run_at = %run_at,
                        next_at = ?next_at,
                        "Recurring task materialized"
                    );
                    created.push(job_id);
                }
                None => {
                    debug!(task_key = %task.key, run_at = %run_at, "Recurring run already materialized");
                }
            }
        }

        Ok(created)
    }

    fn following(task: &RecurringTask, run_at: Timestamp, now: Timestamp) -> Option<Timestamp> {
        next_fire(&task.schedule, run_at.max(now))
    }
}
