use std::sync::Arc;

use tonic::{Request, Response, Status};
use uuid::Uuid;

use crate::error::FleetError;
use crate::proto::worker_service_server::WorkerService;
use crate::proto::{StartJobRequest, StartJobResponse};
use crate::scheduler::job::{validate_operation, CostTable};
use crate::worker::{AdmissionController, JobAssignment, JobExecutor};

/// Admission endpoint of a worker.
pub struct WorkerServiceImpl {
    name: String,
    admission: Arc<AdmissionController>,
    executor: JobExecutor,
}

impl WorkerServiceImpl {
    pub fn new(
        name: impl Into<String>,
        admission: Arc<AdmissionController>,
        executor: JobExecutor,
    ) -> Self {
        Self {
            name: name.into(),
            admission,
            executor,
        }
    }
}

#[tonic::async_trait]
impl WorkerService for WorkerServiceImpl {
    async fn start_job(
        &self,
        request: Request<StartJobRequest>,
    ) -> Result<Response<StartJobResponse>, Status> {
        let req = request.into_inner();

        // Validate before taking a slot so a bad request never holds capacity.
        let job_id =
            Uuid::parse_str(&req.job_id).map_err(|_| Status::invalid_argument("Invalid job ID"))?;
        validate_operation(&req.operation)?;
        let cost_table = CostTable::from_wire(req.cost_ms)?;

        let permit = self.admission.try_acquire().map_err(|e| {
            tracing::debug!(job_id = %job_id, worker = %self.name, reason = ?e, "Job rejected");
            Status::from(FleetError::from(e))
        })?;

        tracing::info!(job_id = %job_id, worker = %self.name, "Job admitted");

        // Detached: the supervisor task owns the permit and logs its own outcome.
        let _supervisor = self.executor.spawn(
            JobAssignment {
                job_id,
                operation: req.operation,
                cost_table,
            },
            permit,
        );

        Ok(Response::new(StartJobResponse {
            job_id: job_id.to_string(),
        }))
    }
}
