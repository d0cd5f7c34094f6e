// Execution records handed out by the job store

use serde::{Deserialize, Serialize};

use crate::domain::job::{ExecutionFailure, Job, JobId, Timestamp};
use crate::domain::process::ProcessId;

/// `process_id == None` means the owner vanished and the claim is orphaned
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClaimedExecution {
    pub job_id: JobId,
    pub process_id: Option<ProcessId>,
    pub created_at: Timestamp,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailedExecution {
    pub job_id: JobId,
    pub error: ExecutionFailure,
    pub created_at: Timestamp,
}

/// A job handed to a worker slot by a successful claim
#[derive(Debug, Clone, PartialEq)]
pub struct ClaimedJob {
    pub job: Job,
    pub claim: ClaimedExecution,
}

/// Why a Claimed marker went back to Ready
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReclaimReason {
    /// Owner row missing or `process_id` already NULL
    OrphanedClaim,
    /// Owner missed its heartbeat and was deregistered
    StaleProcess,
    /// Owner shut down and released its claims
    Deregistered,
}

impl std::fmt::Display for ReclaimReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ReclaimReason::OrphanedClaim => write!(f, "orphaned_claim"),
            ReclaimReason::StaleProcess => write!(f, "stale_process"),
            ReclaimReason::Deregistered => write!(f, "deregistered"),
        }
    }
}
