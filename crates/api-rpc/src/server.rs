//! JSON-RPC Server
//!
//! Serves the job and admin methods over HTTP on the configured address.

use crate::handler::RpcHandler;
use crate::types::{EnqueueParams, JobIdParams, MaintenanceParams, StatsParams};
use jsonrpsee::server::{Server, ServerHandle};
use jsonrpsee::RpcModule;
use quarry_core::config::RpcConfig;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::info;

/// RPC Server
pub struct RpcServer {
    config: RpcConfig,
    handler: Arc<RpcHandler>,
}

impl RpcServer {
    pub fn new(config: RpcConfig, handler: RpcHandler) -> Self {
        Self {
            config,
            handler: Arc::new(handler),
        }
    }

    /// Bind and start serving
    ///
    /// Returns the bound address (port 0 picks a free one) with the handle
    /// used to stop the server.
    pub async fn start(self) -> Result<(SocketAddr, ServerHandle), String> {
        let addr = format!("{}:{}", self.config.host, self.config.port);

        let server = Server::builder()
            .build(&addr)
            .await
            .map_err(|e| format!("Failed to build server on {}: {}", addr, e))?;
        let local_addr = server
            .local_addr()
            .map_err(|e| format!("Failed to read bound address: {}", e))?;

        let module = self.module()?;
        info!(addr = %local_addr, "JSON-RPC server started");

        let handle = server.start(module);
        Ok((local_addr, handle))
    }

    fn module(&self) -> Result<RpcModule<()>, String> {
        let mut module = RpcModule::new(());

        let handler = self.handler.clone();
        module
            .register_async_method("jobs.enqueue.v1", move |params, _, _| {
                let handler = handler.clone();
                async move {
                    let req: EnqueueParams = params.parse()?;
                    handler.enqueue(req).await
                }
            })
            .map_err(|e| e.to_string())?;

        let handler = self.handler.clone();
        module
            .register_async_method("jobs.status.v1", move |params, _, _| {
                let handler = handler.clone();
                async move {
                    let req: JobIdParams = params.parse()?;
                    handler.status(req).await
                }
            })
            .map_err(|e| e.to_string())?;

        let handler = self.handler.clone();
        module
            .register_async_method("jobs.retry.v1", move |params, _, _| {
                let handler = handler.clone();
                async move {
                    let req: JobIdParams = params.parse()?;
                    handler.retry(req).await
                }
            })
            .map_err(|e| e.to_string())?;

        let handler = self.handler.clone();
        module
            .register_async_method("admin.stats.v1", move |params, _, _| {
                let handler = handler.clone();
                async move {
                    // Params are optional here
                    let req: StatsParams = if params.is_object() {
                        params.parse()?
                    } else {
                        StatsParams::default()
                    };
                    handler.stats(req).await
                }
            })
            .map_err(|e| e.to_string())?;

        let handler = self.handler.clone();
        module
            .register_async_method("admin.maintenance.v1", move |params, _, _| {
                let handler = handler.clone();
                async move {
                    let req: MaintenanceParams = if params.is_object() {
                        params.parse()?
                    } else {
                        MaintenanceParams::default()
                    };
                    handler.maintenance(req).await
                }
            })
            .map_err(|e| e.to_string())?;

        Ok(module)
    }
}
