// Process Domain Model (Worker / Dispatcher / Supervisor registry rows)

use serde::{Deserialize, Serialize};
use std::str::FromStr;

use crate::domain::error::DomainError;
use crate::domain::job::Timestamp;

pub type ProcessId = i64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ProcessKind {
    Worker,
    Dispatcher,
    Supervisor,
}

impl ProcessKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProcessKind::Worker => "Worker",
            ProcessKind::Dispatcher => "Dispatcher",
            ProcessKind::Supervisor => "Supervisor",
        }
    }
}

impl std::fmt::Display for ProcessKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProcessKind {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Worker" => Ok(ProcessKind::Worker),
            "Dispatcher" => Ok(ProcessKind::Dispatcher),
            "Supervisor" => Ok(ProcessKind::Supervisor),
            other => Err(DomainError::UnknownProcessKind(other.to_string())),
        }
    }
}

/// Registration request
#[derive(Debug, Clone, PartialEq)]
pub struct NewProcess {
    pub kind: ProcessKind,
    pub name: String,
    pub pid: u32,
    pub hostname: String,
    pub supervisor_id: Option<ProcessId>,
    /// Config snapshot (queues, threads, polling interval, ...)
    pub metadata: serde_json::Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Process {
    pub id: ProcessId,
    pub kind: ProcessKind,
    pub name: String,
    pub pid: u32,
    pub hostname: String,
    pub last_heartbeat_at: Timestamp,
    pub supervisor_id: Option<ProcessId>,
    pub metadata: serde_json::Value,
}

impl Process {
    /// Heartbeat older than `timeout_ms` at `now`
    pub fn heartbeat_expired(&self, now: Timestamp, timeout_ms: i64) -> bool {
        now - self.last_heartbeat_at > timeout_ms
    }
}
