// Port Layer - Interfaces for external dependencies

pub mod id_provider; // For deterministic testing
pub mod job_handler;
pub mod job_store;
pub mod maintenance;
pub mod process_probe;
pub mod process_registry;
pub mod recurring_store;
pub mod time_provider;

// Re-exports
pub use id_provider::{IdProvider, UuidProvider};
pub use job_handler::{ExecutionError, JobContext, JobHandler};
pub use job_store::{JobStore, OutcomeCounts, QueueCounts};
pub use maintenance::{Maintenance, MaintenanceConfig, MaintenanceReport, MaintenanceStats};
pub use process_probe::ProcessProbe;
pub use process_registry::{Deregistration, ProcessRegistry};
pub use recurring_store::RecurringTaskStore;
pub use time_provider::{SystemTimeProvider, TimeProvider};
