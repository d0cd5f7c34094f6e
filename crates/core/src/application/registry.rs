// Process registration and heartbeat loop

use crate::application::backoff::retry_transient;
use crate::application::worker::ShutdownToken;
use crate::domain::{NewProcess, Process, ProcessId, ProcessKind};
use crate::error::Result;
use crate::port::{id_provider, IdProvider, ProcessProbe, ProcessRegistry};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Register a process of `kind` running in this OS process
pub async fn register_process(
    registry: &dyn ProcessRegistry,
    probe: &dyn ProcessProbe,
    ids: &dyn IdProvider,
    kind: ProcessKind,
    supervisor_id: Option<ProcessId>,
    metadata: serde_json::Value,
) -> Result<Process> {
    let prefix = kind.as_str().to_ascii_lowercase();
    let process = registry
        .register(NewProcess {
            kind,
            name: id_provider::process_name(&prefix, ids),
            pid: probe.current_pid(),
            hostname: probe.hostname(),
            supervisor_id,
            metadata,
        })
        .await?;

    info!(
        process_id = %process.id,
        kind = %process.kind,
        name = %process.name,
        supervisor_id = ?process.supervisor_id,
        "Process registered"
    );
    Ok(process)
}

/// Why a heartbeat loop stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeartbeatExit {
    Shutdown,
    /// The registry row disappeared; the owner must not keep working under it
    Lost,
}

/// Beats one process row on a fixed interval until shutdown or loss
pub struct HeartbeatLoop {
    registry: Arc<dyn ProcessRegistry>,
    process_id: ProcessId,
    interval: Duration,
}

impl HeartbeatLoop {
    pub fn new(registry: Arc<dyn ProcessRegistry>, process_id: ProcessId, interval: Duration) -> Self {
        Self {
            registry,
            process_id,
            interval,
        }
    }

    /// Send one heartbeat, retrying transient store errors
    pub async fn beat(&self) -> Result<()> {
        let registry = &self.registry;
        let process_id = self.process_id;
        retry_transient("heartbeat", move || async move { registry.heartbeat(process_id).await })
            .await
    }

    pub async fn run(self, mut shutdown: ShutdownToken) -> HeartbeatExit {
        loop {
            if shutdown.sleep_or_shutdown(self.interval).await {
                return HeartbeatExit::Shutdown;
            }

            match self.beat().await {
                Ok(()) => debug!(process_id = %self.process_id, "Heartbeat"),
                Err(e) if e.is_not_found() => {
                    error!(process_id = %self.process_id, "Process row vanished, heartbeat lost");
                    return HeartbeatExit::Lost;
                }
                Err(e) => {
                    warn!(process_id = %self.process_id, error = %e, "Heartbeat failed");
                }
            }
        }
    }
}
