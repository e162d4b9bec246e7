pub mod client;
pub mod coordinator_service;
pub mod server;
pub mod worker_service;

use std::time::Duration;

use tonic::transport::Endpoint;

use crate::error::{FleetError, Result};

pub use client::GrpcWorkerClient;
pub use coordinator_service::CoordinatorServiceImpl;
pub use server::{serve_coordinator, serve_worker};
pub use worker_service::WorkerServiceImpl;

/// Build a plaintext endpoint for `addr` (`host:port` or a full `http://` URI)
/// with both connect and request timeouts bounded by `timeout`.
pub(crate) fn endpoint(addr: &str, timeout: Duration) -> Result<Endpoint> {
    let uri = if addr.starts_with("http://") || addr.starts_with("https://") {
        addr.to_string()
    } else {
        format!("http://{}", addr)
    };

    Endpoint::from_shared(uri)
        .map(|e| e.connect_timeout(timeout).timeout(timeout))
        .map_err(|e| FleetError::MalformedInput(format!("invalid endpoint '{}': {}", addr, e)))
}
