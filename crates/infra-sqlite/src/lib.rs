// Quarry Infrastructure - SQLite Adapter
// Implements: JobStore, ProcessRegistry, RecurringTaskStore, Maintenance

mod connection;
mod error;
mod executions;
mod job_store;
mod maintenance_impl;
mod migration;
mod process_registry;
mod recurring_store;

pub use connection::create_pool;
pub use job_store::SqliteJobStore;
pub use maintenance_impl::SqliteMaintenance;
pub use migration::run_migrations;
pub use process_registry::SqliteProcessRegistry;
pub use recurring_store::SqliteRecurringTaskStore;

// Note: sqlx::Error conversion goes through error::map_sqlx_error
// due to Rust's orphan rules (cannot implement From<sqlx::Error> for AppError here)
