// Job Domain Model

use serde::{Deserialize, Serialize};
use std::str::FromStr;

use crate::domain::error::DomainError;

/// Job ID (auto-increment row id)
pub type JobId = i64;

/// Priority (higher number = dispatched first)
pub type Priority = i32;

/// Epoch milliseconds (UTC)
pub type Timestamp = i64;

/// Current disposition of a job, derived from its execution markers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Ready,
    Scheduled,
    Claimed,
    Blocked,
    Finished,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Ready => "ready",
            JobStatus::Scheduled => "scheduled",
            JobStatus::Claimed => "claimed",
            JobStatus::Blocked => "blocked",
            JobStatus::Finished => "finished",
            JobStatus::Failed => "failed",
        }
    }

    /// Finished and Failed jobs hold no liveness marker
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Finished | JobStatus::Failed)
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ready" => Ok(JobStatus::Ready),
            "scheduled" => Ok(JobStatus::Scheduled),
            "claimed" => Ok(JobStatus::Claimed),
            "blocked" => Ok(JobStatus::Blocked),
            "finished" => Ok(JobStatus::Finished),
            "failed" => Ok(JobStatus::Failed),
            other => Err(DomainError::UnknownStatus(other.to_string())),
        }
    }
}

/// Serialized job arguments, opaque to the engine
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobArguments(serde_json::Value);

impl JobArguments {
    pub fn new(value: serde_json::Value) -> Self {
        Self(value)
    }

    pub fn as_value(&self) -> &serde_json::Value {
        &self.0
    }

    pub fn into_value(self) -> serde_json::Value {
        self.0
    }
}

impl Default for JobArguments {
    fn default() -> Self {
        Self(serde_json::Value::Array(Vec::new()))
    }
}

/// Cooperative limit on how many jobs sharing `key` may be in flight
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConcurrencyLimit {
    pub key: String,
    pub limit: i32,
    /// How long a semaphore slot or a Blocked marker stays valid
    pub duration_ms: i64,
}

impl ConcurrencyLimit {
    pub fn new(key: impl Into<String>, limit: i32, duration_ms: i64) -> Self {
        Self {
            key: key.into(),
            limit,
            duration_ms,
        }
    }
}

/// Job Entity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    pub queue_name: String,
    pub class_name: String,
    pub arguments: JobArguments,
    pub priority: Priority,
    pub active_job_id: Option<String>,
    pub concurrency: Option<ConcurrencyLimit>,

    /// Number of times the job has been claimed
    pub attempts: i32,

    pub scheduled_at: Option<Timestamp>,
    pub finished_at: Option<Timestamp>,
    pub failed_at: Option<Timestamp>,
    pub created_at: Timestamp,
}

impl Job {
    pub fn concurrency_key(&self) -> Option<&str> {
        self.concurrency.as_ref().map(|c| c.key.as_str())
    }

    pub fn is_finished(&self) -> bool {
        self.finished_at.is_some()
    }
}

/// A job about to be written, before the store assigns its id
#[derive(Debug, Clone, PartialEq)]
pub struct NewJob {
    pub queue_name: String,
    pub class_name: String,
    pub arguments: JobArguments,
    pub priority: Priority,
    pub scheduled_at: Option<Timestamp>,
    pub active_job_id: Option<String>,
    pub concurrency: Option<ConcurrencyLimit>,
}

impl NewJob {
    pub fn new(queue_name: impl Into<String>, class_name: impl Into<String>) -> Self {
        Self {
            queue_name: queue_name.into(),
            class_name: class_name.into(),
            arguments: JobArguments::default(),
            priority: 0,
            scheduled_at: None,
            active_job_id: None,
            concurrency: None,
        }
    }

    pub fn with_arguments(mut self, arguments: serde_json::Value) -> Self {
        self.arguments = JobArguments::new(arguments);
        self
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    pub fn scheduled_at(mut self, at: Timestamp) -> Self {
        self.scheduled_at = Some(at);
        self
    }

    pub fn with_active_job_id(mut self, id: impl Into<String>) -> Self {
        self.active_job_id = Some(id.into());
        self
    }

    pub fn with_concurrency(mut self, limit: ConcurrencyLimit) -> Self {
        self.concurrency = Some(limit);
        self
    }

    /// Whether the job lands in Scheduled rather than Ready at `now`
    pub fn is_deferred(&self, now: Timestamp) -> bool {
        matches!(self.scheduled_at, Some(at) if at > now)
    }
}

/// Error captured from a failed execution, stored on the Failed marker
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionFailure {
    pub error_class: String,
    pub message: String,
    #[serde(default)]
    pub backtrace: Vec<String>,
}

/// Upper bounds for stored failure text
pub const MAX_FAILURE_MESSAGE_BYTES: usize = 4096;
pub const MAX_BACKTRACE_LINES: usize = 20;

impl ExecutionFailure {
    pub fn new(error_class: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            error_class: error_class.into(),
            message: truncate_utf8(message.into(), MAX_FAILURE_MESSAGE_BYTES),
            backtrace: Vec::new(),
        }
    }

    pub fn with_backtrace(mut self, lines: impl IntoIterator<Item = String>) -> Self {
        self.backtrace = lines.into_iter().take(MAX_BACKTRACE_LINES).collect();
        self
    }
}

fn truncate_utf8(mut s: String, max_bytes: usize) -> String {
    if s.len() <= max_bytes {
        return s;
    }
    let mut cut = max_bytes;
    while !s.is_char_boundary(cut) {
        cut -= 1;
    }
    s.truncate(cut);
    s
}
