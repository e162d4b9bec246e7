use std::time::Duration;

use async_trait::async_trait;
use tonic::transport::Channel;
use uuid::Uuid;

use crate::error::{FleetError, Result};
use crate::grpc::endpoint;
use crate::proto::coordinator_service_client::CoordinatorServiceClient;
use crate::proto::CompleteJobRequest;
use crate::store::CompletionSink;

/// Worker-side completion reporting over the orchestrator's CoordinatorService.
#[derive(Debug, Clone)]
pub struct RemoteCompletionSink {
    client: CoordinatorServiceClient<Channel>,
    worker: String,
}

impl RemoteCompletionSink {
    /// The channel connects on first use, so a worker can start before the orchestrator.
    pub fn connect_lazy(addr: &str, worker: impl Into<String>, timeout: Duration) -> Result<Self> {
        let channel = endpoint(addr, timeout)?.connect_lazy();
        Ok(Self {
            client: CoordinatorServiceClient::new(channel),
            worker: worker.into(),
        })
    }
}

#[async_trait]
impl CompletionSink for RemoteCompletionSink {
    async fn complete(&self, id: Uuid, result: f64) -> Result<()> {
        let mut client = self.client.clone();
        client
            .complete_job(CompleteJobRequest {
                job_id: id.to_string(),
                result,
                worker: self.worker.clone(),
            })
            .await
            .map_err(|status| match FleetError::from(status) {
                FleetError::InvalidTransition { from, to, .. } => FleetError::InvalidTransition {
                    job_id: id.to_string(),
                    from,
                    to,
                },
                other => other,
            })?;
        Ok(())
    }
}
