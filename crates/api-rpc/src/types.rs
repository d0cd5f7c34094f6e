//! RPC Request/Response Types
//!
//! Defines the JSON-RPC method parameters and results.

use quarry_core::domain::{ConcurrencyLimit, Job, JobId, JobStatus, Timestamp};
use quarry_core::port::MaintenanceReport;
use serde::{Deserialize, Serialize};

/// jobs.enqueue.v1 - Enqueue a job
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnqueueParams {
    pub queue_name: String,
    pub class_name: String,
    #[serde(default = "default_arguments")]
    pub arguments: serde_json::Value,
    #[serde(default)]
    pub priority: i32,
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

/// Result of jobs.enqueue.v1 and jobs.retry.v1
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobStatusResult {
    pub job_id: JobId,
    pub status: JobStatus,
}

/// jobs.status.v1 / jobs.retry.v1
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobIdParams {
    pub job_id: JobId,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobDetails {
    pub job_id: JobId,
    pub status: JobStatus,
    pub queue_name: String,
    pub class_name: String,
    pub attempts: i32,
    pub finished_at: Option<Timestamp>,
    pub failed_at: Option<Timestamp>,
    /// Most recent failure, while the Failed marker exists
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl JobDetails {
    pub fn new(job: Job, status: JobStatus, error: Option<String>) -> Self {
        Self {
            job_id: job.id,
            status,
            queue_name: job.queue_name,
            class_name: job.class_name,
            attempts: job.attempts,
            finished_at: job.finished_at,
            failed_at: job.failed_at,
            error,
        }
    }
}

/// admin.stats.v1 - Health snapshot over a trailing window
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StatsParams {
    #[serde(default)]
    pub window_secs: Option<u64>,
}

/// admin.maintenance.v1 - Run manual maintenance
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MaintenanceParams {
    #[serde(default)]
    pub force_vacuum: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MaintenanceResult {
    pub jobs_deleted: i64,
    pub failed_jobs_deleted: i64,
    pub vacuum_run: bool,
    pub db_size_before: i64,
    pub db_size_after: i64,
}

impl From<MaintenanceReport> for MaintenanceResult {
    fn from(report: MaintenanceReport) -> Self {
        Self {
            jobs_deleted: report.jobs_deleted,
            failed_jobs_deleted: report.failed_jobs_deleted,
            vacuum_run: report.vacuum_run,
            db_size_before: report.db_size_before,
            db_size_after: report.db_size_after,
        }
    }
}
