use thiserror::Error;
use tonic::{Code, Status};

#[derive(Error, Debug, Clone, PartialEq)]
pub enum FleetError {
    #[error("Worker at capacity ({current}/{max})")]
    CapacityExceeded { current: usize, max: usize },

    #[error("Worker unavailable: {0}")]
    Unavailable(String),

    #[error("Transport error: {0}")]
    TransportFailure(String),

    #[error("Job not found: {0}")]
    NotFound(String),

    #[error("Invalid transition for job {job_id}: {from} -> {to}")]
    InvalidTransition {
        job_id: String,
        from: String,
        to: String,
    },

    #[error("Malformed input: {0}")]
    MalformedInput(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl FleetError {
    /// Delivery failures that the dispatcher answers by trying the next worker.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            FleetError::CapacityExceeded { .. }
                | FleetError::Unavailable(_)
                | FleetError::TransportFailure(_)
        )
    }
}

impl From<FleetError> for Status {
    fn from(err: FleetError) -> Self {
        let message = err.to_string();
        match err {
            FleetError::CapacityExceeded { .. } => Status::resource_exhausted(message),
            FleetError::Unavailable(_) => Status::unavailable(message),
            FleetError::TransportFailure(_) => Status::unavailable(message),
            FleetError::NotFound(_) => Status::not_found(message),
            FleetError::InvalidTransition { .. } => Status::failed_precondition(message),
            FleetError::MalformedInput(_) => Status::invalid_argument(message),
            FleetError::Internal(_) => Status::internal(message),
        }
    }
}

impl From<Status> for FleetError {
    fn from(status: Status) -> Self {
        let message = status.message().to_string();
        match status.code() {
            // The worker does not report its counters in the status, only the fact.
            Code::ResourceExhausted => FleetError::CapacityExceeded { current: 0, max: 0 },
            Code::Unavailable => FleetError::Unavailable(message),
            Code::NotFound => FleetError::NotFound(message),
            Code::FailedPrecondition => FleetError::InvalidTransition {
                job_id: String::new(),
                from: "unknown".to_string(),
                to: message,
            },
            Code::InvalidArgument => FleetError::MalformedInput(message),
            code => FleetError::TransportFailure(format!("{:?}: {}", code, message)),
        }
    }
}

pub type Result<T> = std::result::Result<T, FleetError>;
