use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{
        rejection::{JsonRejection, QueryRejection},
        Path, Query, State,
    },
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::cors::{Any, CorsLayer};
use uuid::Uuid;

use crate::error::FleetError;
use crate::scheduler::job::{validate_operation, CostTable, Job, JobStatus, NewJob};
use crate::scheduler::{HealthAggregator, WorkerHealth};
use crate::store::JobStore;

#[derive(Clone)]
pub struct ApiState {
    pub store: Arc<dyn JobStore>,
    pub health: HealthAggregator,
}

/// A [`FleetError`] rendered as `{"error": "..."}` with a matching status code.
#[derive(Debug)]
pub struct ApiError(pub FleetError);

impl From<FleetError> for ApiError {
    fn from(err: FleetError) -> Self {
        Self(err)
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        Self(FleetError::MalformedInput(rejection.body_text()))
    }
}

impl From<QueryRejection> for ApiError {
    fn from(rejection: QueryRejection) -> Self {
        Self(FleetError::MalformedInput(rejection.body_text()))
    }
}

#[derive(Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            FleetError::NotFound(_) => StatusCode::NOT_FOUND,
            FleetError::MalformedInput(_) => StatusCode::BAD_REQUEST,
            FleetError::InvalidTransition { .. } => StatusCode::CONFLICT,
            FleetError::CapacityExceeded { .. } => StatusCode::TOO_MANY_REQUESTS,
            FleetError::Unavailable(_) | FleetError::TransportFailure(_) => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            FleetError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (
            status,
            Json(ErrorBody {
                error: self.0.to_string(),
            }),
        )
            .into_response()
    }
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitJobRequest {
    pub user_id: i64,
    pub operation: String,
    #[serde(default)]
    pub cost_table: CostTable,
    /// Seconds; 0 or absent means "use the orchestrator's grace period"
    #[serde(default)]
    pub inactive_server_time: u64,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitJobResponse {
    pub id: Uuid,
    pub user_id: i64,
    pub status: JobStatus,
    pub operation: String,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobView {
    pub id: Uuid,
    pub operation: String,
    pub user_id: i64,
    pub status: JobStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<f64>,
    pub attempts: u32,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

impl From<Job> for JobView {
    fn from(job: Job) -> Self {
        Self {
            id: job.id,
            operation: job.operation,
            user_id: job.user_id,
            status: job.status,
            result: job.result,
            attempts: job.attempts,
            created_at: job.created_at,
            started_at: job.started_at,
            completed_at: job.completed_at,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListJobsParams {
    pub user_id: Option<i64>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ClearJobsResponse {
    pub cleared: usize,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct OrchestratorStatus {
    pub running: bool,
    pub message: String,
}

pub fn router(state: ApiState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/api/status", get(status_handler))
        .route("/api/workers", get(workers_handler))
        .route(
            "/api/jobs",
            get(list_jobs_handler)
                .post(submit_job_handler)
                .delete(clear_jobs_handler),
        )
        .route("/api/jobs/:id", get(get_job_handler))
        .layer(cors)
        .with_state(state)
}

/// Serve the client API on `listener` until `stop` is cancelled.
pub async fn run_api(listener: TcpListener, state: ApiState, stop: CancellationToken) {
    tracing::info!(addr = ?listener.local_addr().ok(), "Starting API server");

    if let Err(e) = axum::serve(listener, router(state))
        .with_graceful_shutdown(async move { stop.cancelled().await })
        .await
    {
        tracing::error!(error = %e, "API server failed");
    }
}

async fn status_handler() -> Json<OrchestratorStatus> {
    Json(OrchestratorStatus {
        running: true,
        message: "Orchestrator is running".to_string(),
    })
}

async fn workers_handler(State(state): State<ApiState>) -> Json<Vec<WorkerHealth>> {
    Json(state.health.poll().await)
}

async fn submit_job_handler(
    State(state): State<ApiState>,
    payload: Result<Json<SubmitJobRequest>, JsonRejection>,
) -> Result<Json<SubmitJobResponse>, ApiError> {
    let Json(req) = payload?;
    validate_operation(&req.operation)?;

    let job = state
        .store
        .insert(NewJob {
            user_id: req.user_id,
            operation: req.operation,
            cost_table: req.cost_table,
            inactive_server_time: (req.inactive_server_time > 0)
                .then(|| Duration::from_secs(req.inactive_server_time)),
        })
        .await?;

    tracing::info!(job_id = %job.id, user_id = job.user_id, operation = %job.operation, "Job submitted");

    Ok(Json(SubmitJobResponse {
        id: job.id,
        user_id: job.user_id,
        status: job.status,
        operation: job.operation,
    }))
}

async fn get_job_handler(
    State(state): State<ApiState>,
    Path(id): Path<String>,
) -> Result<Json<JobView>, ApiError> {
    let id = Uuid::parse_str(&id)
        .map_err(|_| FleetError::MalformedInput(format!("invalid job id '{}'", id)))?;
    Ok(Json(state.store.get(id).await?.into()))
}

async fn list_jobs_handler(
    State(state): State<ApiState>,
    params: Result<Query<ListJobsParams>, QueryRejection>,
) -> Result<Json<Vec<JobView>>, ApiError> {
    let Query(params) = params?;
    let jobs = state.store.list(params.user_id).await?;
    Ok(Json(jobs.into_iter().map(JobView::from).collect()))
}

async fn clear_jobs_handler(
    State(state): State<ApiState>,
) -> Result<Json<ClearJobsResponse>, ApiError> {
    let cleared = state.store.clear().await?;
    tracing::warn!(cleared, "All jobs cleared");
    Ok(Json(ClearJobsResponse { cleared }))
}
