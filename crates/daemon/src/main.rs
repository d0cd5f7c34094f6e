//! Quarry Engine - Main Entry Point
//!
//! Runs the Supervisor (dispatcher, workers, maintenance) and the JSON-RPC
//! server in one process until Ctrl+C.

mod handlers;
mod logging;
mod settings;
mod telemetry;

use anyhow::Result;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};

use quarry_api_rpc::{RpcHandler, RpcServer};
use quarry_core::application::{
    shutdown_channel, EngineServices, JobService, MaintenanceScheduler, StatsService, Supervisor,
};
use quarry_core::port::{Maintenance, SystemTimeProvider, TimeProvider, UuidProvider};
use quarry_infra_sqlite::{
    create_pool, run_migrations, SqliteJobStore, SqliteMaintenance, SqliteProcessRegistry,
    SqliteRecurringTaskStore,
};
use quarry_infra_system::SystemProcessProbe;

const VERSION: &str = env!("CARGO_PKG_VERSION");

#[tokio::main]
async fn main() -> Result<()> {
    // 1. Logging (and OpenTelemetry when configured)
    let _log_guard = logging::init()?;
    info!("Quarry engine v{} starting...", VERSION);

    // 2. Configuration
    let config = settings::load()?;
    info!(
        database_url = %config.database_url,
        workers = config.workers.len(),
        recurring_tasks = config.recurring.len(),
        "Configuration loaded"
    );

    // 3. Database
    let pool = create_pool(&config.database_url)
        .await
        .map_err(|e| anyhow::anyhow!("DB pool creation failed: {}", e))?;
    run_migrations(&pool)
        .await
        .map_err(|e| anyhow::anyhow!("Migration failed: {}", e))?;

    // 4. Dependencies
    let time_provider: Arc<dyn TimeProvider> = Arc::new(SystemTimeProvider);
    let job_store = Arc::new(SqliteJobStore::new(pool.clone(), time_provider.clone()));
    let registry = Arc::new(SqliteProcessRegistry::new(pool.clone(), time_provider.clone()));
    let recurring_store = Arc::new(SqliteRecurringTaskStore::new(
        pool.clone(),
        time_provider.clone(),
    ));
    let maintenance: Arc<dyn Maintenance> = Arc::new(SqliteMaintenance::new(pool.clone()));

    let handlers = Arc::new(handlers::builtin_registry());
    info!(classes = ?handlers.class_names(), "Handlers registered");

    // 5. JSON-RPC server
    let rpc_handler = RpcHandler::new(
        JobService::new(job_store.clone(), time_provider.clone()),
        job_store.clone(),
        StatsService::new(
            job_store.clone(),
            registry.clone(),
            time_provider.clone(),
            config.dispatcher.process_timeout_ms,
        ),
        Some(MaintenanceScheduler::new(
            maintenance.clone(),
            config.maintenance.clone(),
            time_provider.clone(),
        )),
    );
    let (rpc_addr, rpc_handle) = RpcServer::new(config.rpc.clone(), rpc_handler)
        .start()
        .await
        .map_err(|e| anyhow::anyhow!("RPC server start failed: {}", e))?;
    info!(addr = %rpc_addr, "JSON-RPC server listening");

    // 6. Supervisor
    let services = EngineServices {
        job_store,
        registry,
        recurring_store,
        maintenance: Some(maintenance),
        probe: Arc::new(SystemProcessProbe::new()),
        ids: Arc::new(UuidProvider),
        time_provider,
    };
    let shutdown_timeout = Duration::from_millis(config.supervisor.shutdown_timeout_ms);
    let supervisor = Supervisor::new(config, services, handlers);

    let (shutdown_tx, shutdown_rx) = shutdown_channel();
    let mut supervisor_task = tokio::spawn(async move { supervisor.run(shutdown_rx).await });

    info!("System ready. Press Ctrl+C to shutdown");

    // 7. Run until Ctrl+C or the supervisor exits on its own
    let outcome = tokio::select! {
        signal = tokio::signal::ctrl_c() => {
            if let Err(e) = signal {
                error!(error = %e, "Failed to listen for Ctrl+C, shutting down");
            } else {
                info!("Shutdown signal received. Exiting gracefully...");
            }
            shutdown_tx.shutdown();
            // Children get their own shutdown timeout; allow a margin on top
            match tokio::time::timeout(shutdown_timeout * 2, &mut supervisor_task).await {
                Ok(joined) => joined,
                Err(_) => {
                    error!("Supervisor did not stop in time");
                    supervisor_task.abort();
                    Ok(Ok(()))
                }
            }
        }
        joined = &mut supervisor_task => joined,
    };

    // 8. Teardown
    rpc_handle
        .stop()
        .map_err(|e| anyhow::anyhow!("RPC server stop failed: {}", e))?;
    rpc_handle.stopped().await;
    pool.close().await;

    match outcome {
        Ok(Ok(())) => {
            info!("Shutdown complete.");
            Ok(())
        }
        Ok(Err(e)) => {
            error!(error = %e, "Supervisor exited with error");
            Err(anyhow::anyhow!("supervisor failed: {}", e))
        }
        Err(e) => Err(anyhow::anyhow!("supervisor task panicked: {}", e)),
    }
}
