// Application Layer - Use Cases and Business Logic

pub mod backoff;
pub mod dispatcher;
pub mod handlers;
pub mod jobs;
pub mod maintenance;
pub mod recovery;
pub mod registry;
pub mod retry;
pub mod scheduler;
pub mod stats;
pub mod supervisor;
pub mod worker;

// Re-exports
pub use dispatcher::{CycleReport, Dispatcher, DispatcherExit};
pub use handlers::{HandlerRegistry, Perform, Typed};
pub use jobs::{EnqueueRequest, JobService};
pub use maintenance::MaintenanceScheduler;
pub use recovery::{OrphanReclaimer, ReclaimReport};
pub use registry::{register_process, HeartbeatExit, HeartbeatLoop};
pub use retry::{RetryDecision, RetryPolicy};
pub use scheduler::RecurringScheduler;
pub use stats::{HealthSnapshot, StatsService};
pub use supervisor::{EngineServices, Supervisor};
pub use worker::{
    shutdown_channel, JobOutcome, ShutdownSender, ShutdownToken, SlotExit, Worker, WorkerExit,
};
