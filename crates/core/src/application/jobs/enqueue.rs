// Enqueue Use Case

use crate::domain::{ConcurrencyLimit, JobId, JobStatus, NewJob, Timestamp};
use crate::error::{AppError, Result};
use crate::port::JobStore;
use serde::{Deserialize, Serialize};

/// Longest accepted queue name
pub const MAX_QUEUE_NAME_LEN: usize = 64;

/// Longest accepted class name
pub const MAX_CLASS_NAME_LEN: usize = 255;

/// Longest accepted concurrency window: 30 days
pub const MAX_CONCURRENCY_DURATION_MS: i64 = 30 * 24 * 60 * 60 * 1000;

/// Enqueue request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnqueueRequest {
    pub queue_name: String,
    pub class_name: String,

    #[serde(default = "default_arguments")]
    pub arguments: serde_json::Value,

    #[serde(default)]
    pub priority: i32,

    /// Epoch millis; in the future means Scheduled instead of Ready
    #[serde(default)]
    pub scheduled_at: Option<Timestamp>,

    #[serde(default)]
    pub active_job_id: Option<String>,

    #[serde(default)]
    pub concurrency: Option<ConcurrencyLimit>,
}

fn default_arguments() -> serde_json::Value {
    serde_json::Value::Array(Vec::new())
}

impl EnqueueRequest {
    pub fn new(queue_name: impl Into<String>, class_name: impl Into<String>) -> Self {
        Self {
            queue_name: queue_name.into(),
            class_name: class_name.into(),
            arguments: default_arguments(),
            priority: 0,
            scheduled_at: None,
            active_job_id: None,
            concurrency: None,
        }
    }

    pub fn with_arguments(mut self, arguments: serde_json::Value) -> Self {
        self.arguments = arguments;
        self
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn scheduled_at(mut self, at: Timestamp) -> Self {
        self.scheduled_at = Some(at);
        self
    }

    pub fn with_concurrency(mut self, limit: ConcurrencyLimit) -> Self {
        self.concurrency = Some(limit);
        self
    }

    fn into_new_job(self) -> NewJob {
        NewJob {
            queue_name: self.queue_name,
            class_name: self.class_name,
            arguments: crate::domain::JobArguments::new(self.arguments),
            priority: self.priority,
            scheduled_at: self.scheduled_at,
            active_job_id: self.active_job_id,
            concurrency: self.concurrency,
        }
    }
}

/// Reject malformed requests before any row is written
pub fn validate_request(req: &EnqueueRequest) -> Result<()> {
    let queue = req.queue_name.trim();
    if queue.is_empty() {
        return Err(AppError::Validation("queue_name cannot be empty".into()));
    }
    if queue.len() > MAX_QUEUE_NAME_LEN {
        return Err(AppError::Validation(format!(
            "queue_name too long (max {} chars)",
            MAX_QUEUE_NAME_LEN
        )));
    }
    if !queue
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.'))
    {
        return Err(AppError::Validation(
            "queue_name must be alphanumeric (plus '_', '-', '.')".into(),
        ));
    }

    let class = req.class_name.trim();
    if class.is_empty() {
        return Err(AppError::Validation("class_name cannot be empty".into()));
    }
    if class.len() > MAX_CLASS_NAME_LEN {
        return Err(AppError::Validation(format!(
            "class_name too long (max {} chars)",
            MAX_CLASS_NAME_LEN
        )));
    }

    if let Some(id) = &req.active_job_id {
        if id.trim().is_empty() {
            return Err(AppError::Validation("active_job_id cannot be blank".into()));
        }
        if req.arguments.get("job_class").and_then(|v| v.as_str()).is_none() {
            return Err(AppError::Validation(
                "jobs with active_job_id need a {\"job_class\", \"arguments\"} envelope".into(),
            ));
        }
    }

    if let Some(limit) = &req.concurrency {
        if limit.key.trim().is_empty() {
            return Err(AppError::Validation("concurrency key cannot be empty".into()));
        }
        if limit.limit < 1 {
            return Err(AppError::Validation("concurrency limit must be >= 1".into()));
        }
        if limit.duration_ms <= 0 {
            return Err(AppError::Validation(
                "concurrency duration_ms must be > 0".into(),
            ));
        }
        if limit.duration_ms > MAX_CONCURRENCY_DURATION_MS {
            return Err(AppError::Validation(format!(
                "concurrency duration_ms too large (max {} ms)",
                MAX_CONCURRENCY_DURATION_MS
            )));
        }
    }

    Ok(())
}

/// Execute enqueue use case: validate, then one store transaction
pub async fn execute(job_store: &dyn JobStore, req: EnqueueRequest) -> Result<(JobId, JobStatus)> {
    validate_request(&req)?;

    let mut req = req;
    req.queue_name = req.queue_name.trim().to_string();
    req.class_name = req.class_name.trim().to_string();

    job_store.enqueue(req.into_new_job()).await
}
