//! JSON-RPC API Layer
//!
//! Implements the JSON-RPC 2.0 server for the Quarry job engine:
//! enqueue, job status, retry, stats snapshot and manual maintenance.

pub mod error;
pub mod handler;
pub mod server;
pub mod types;

pub use handler::RpcHandler;
pub use server::RpcServer;
