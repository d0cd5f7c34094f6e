// Process Registry Port (heartbeat-based liveness of workers and dispatchers)

use crate::domain::{JobId, NewProcess, Process, ProcessId, Timestamp};
use crate::error::Result;
use async_trait::async_trait;

/// What a deregistration removed
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Deregistration {
    /// The process itself followed by every supervised descendant
    pub processes: Vec<ProcessId>,
    /// Jobs whose claims went back to Ready
    pub released_jobs: Vec<JobId>,
}

impl Deregistration {
    pub fn is_empty(&self) -> bool {
        self.processes.is_empty()
    }
}

#[async_trait]
pub trait ProcessRegistry: Send + Sync {
    /// Insert a row with `last_heartbeat_at = now`
    ///
    /// # Errors
    /// - AppError::Conflict if `(name, supervisor_id)` is taken
    async fn register(&self, process: NewProcess) -> Result<Process>;

    /// # Errors
    /// - AppError::NotFound if the row was removed (e.g. swept as stale)
    async fn heartbeat(&self, process_id: ProcessId) -> Result<()>;

    /// Delete the row and its subtree, returning their claims to Ready.
    /// Deregistering an unknown id yields an empty report.
    async fn deregister(&self, process_id: ProcessId) -> Result<Deregistration>;

    async fn find(&self, process_id: ProcessId) -> Result<Option<Process>>;

    async fn list(&self) -> Result<Vec<Process>>;

    /// Processes whose last heartbeat is older than `cutoff`
    async fn list_stale(&self, cutoff: Timestamp) -> Result<Vec<Process>>;
}
