use std::sync::Arc;

use tonic::{Request, Response, Status};
use uuid::Uuid;

use crate::error::FleetError;
use crate::proto::coordinator_service_server::CoordinatorService;
use crate::proto::{CompleteJobRequest, CompleteJobResponse};
use crate::store::JobStore;

/// Orchestrator endpoint that records results reported by workers.
pub struct CoordinatorServiceImpl {
    store: Arc<dyn JobStore>,
}

impl CoordinatorServiceImpl {
    pub fn new(store: Arc<dyn JobStore>) -> Self {
        Self { store }
    }
}

#[tonic::async_trait]
impl CoordinatorService for CoordinatorServiceImpl {
    async fn complete_job(
        &self,
        request: Request<CompleteJobRequest>,
    ) -> Result<Response<CompleteJobResponse>, Status> {
        let req = request.into_inner();
        let job_id =
            Uuid::parse_str(&req.job_id).map_err(|_| Status::invalid_argument("Invalid job ID"))?;

        match self.store.complete(job_id, req.result).await {
            Ok(()) => {
                tracing::info!(job_id = %job_id, worker = %req.worker, result = req.result, "Job result recorded");
                Ok(Response::new(CompleteJobResponse {}))
            }
            Err(e) => {
                if matches!(e, FleetError::InvalidTransition { .. }) {
                    // A slow worker finishing a job the watchdog already requeued.
                    tracing::warn!(job_id = %job_id, worker = %req.worker, error = %e, "Late completion rejected");
                }
                Err(e.into())
            }
        }
    }
}
