use tokio::net::TcpListener;
use tokio_stream::wrappers::TcpListenerStream;
use tokio_util::sync::CancellationToken;
use tonic::transport::Server;

use crate::grpc::{CoordinatorServiceImpl, WorkerServiceImpl};
use crate::proto::coordinator_service_server::CoordinatorServiceServer;
use crate::proto::worker_service_server::WorkerServiceServer;

/// Serve a worker's admission endpoint on `listener` until `stop` is cancelled.
pub async fn serve_worker(
    listener: TcpListener,
    service: WorkerServiceImpl,
    stop: CancellationToken,
) -> Result<(), tonic::transport::Error> {
    tracing::info!(addr = ?listener.local_addr().ok(), "Starting worker gRPC server");

    Server::builder()
        .add_service(WorkerServiceServer::new(service))
        .serve_with_incoming_shutdown(TcpListenerStream::new(listener), async move {
            stop.cancelled().await
        })
        .await
}

/// Serve the orchestrator's completion endpoint on `listener` until `stop` is cancelled.
pub async fn serve_coordinator(
    listener: TcpListener,
    service: CoordinatorServiceImpl,
    stop: CancellationToken,
) -> Result<(), tonic::transport::Error> {
    tracing::info!(addr = ?listener.local_addr().ok(), "Starting coordinator gRPC server");

    Server::builder()
        .add_service(CoordinatorServiceServer::new(service))
        .serve_with_incoming_shutdown(TcpListenerStream::new(listener), async move {
            stop.cancelled().await
        })
        .await
}
