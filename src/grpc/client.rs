use std::time::Duration;

use async_trait::async_trait;
use tonic::transport::Channel;

use crate::config::WorkerDescriptor;
use crate::error::{FleetError, Result};
use crate::grpc::endpoint;
use crate::proto::worker_service_client::WorkerServiceClient;
use crate::proto::StartJobRequest;
use crate::scheduler::dispatcher::WorkerClient;
use crate::scheduler::job::Job;

/// Dispatcher-side handle to one worker's gRPC admission endpoint.
#[derive(Debug, Clone)]
pub struct GrpcWorkerClient {
    name: String,
    client: WorkerServiceClient<Channel>,
}

impl GrpcWorkerClient {
    /// Connection is established on first use and re-established after failures.
    pub fn connect_lazy(worker: &WorkerDescriptor, timeout: Duration) -> Result<Self> {
        let channel = endpoint(&worker.rpc_addr, timeout)?.connect_lazy();
        Ok(Self {
            name: worker.name.clone(),
            client: WorkerServiceClient::new(channel),
        })
    }
}

#[async_trait]
impl WorkerClient for GrpcWorkerClient {
    fn name(&self) -> &str {
        &self.name
    }

    async fn start_job(&self, job: &Job) -> Result<()> {
        let mut client = self.client.clone();
        let response = client
            .start_job(StartJobRequest {
                job_id: job.id.to_string(),
                operation: job.operation.clone(),
                cost_ms: job.cost_table.to_wire(),
            })
            .await
            .map_err(FleetError::from)?
            .into_inner();

        if response.job_id != job.id.to_string() {
            return Err(FleetError::TransportFailure(format!(
                "worker acknowledged job {} instead of {}",
                response.job_id, job.id
            )));
        }
        Ok(())
    }
}
