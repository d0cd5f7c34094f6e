// Domain Layer - Pure business logic and entities

pub mod error;
pub mod execution;
pub mod job;
pub mod process;
pub mod queue;
pub mod recurring;
pub mod semaphore;

// Re-exports
pub use error::DomainError;
pub use execution::{ClaimedExecution, ClaimedJob, FailedExecution, ReclaimReason};
pub use job::{
    ConcurrencyLimit, ExecutionFailure, Job, JobArguments, JobId, JobStatus, NewJob, Priority,
    Timestamp,
};
pub use process::{NewProcess, Process, ProcessId, ProcessKind};
pub use queue::{QueueName, QueuePattern, QueueSelector};
pub use recurring::{next_fire, CronSchedule, RecurringTask};
pub use semaphore::Semaphore;
