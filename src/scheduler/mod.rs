//! Orchestrator side of the fleet: the job model plus the three loops that
//! act on it.
//!
//! - [`Dispatcher`]: claims pending jobs and delivers them with failover
//! - [`Watchdog`]: requeues running jobs that outlived their deadline
//! - [`HealthAggregator`]: polls worker load on demand

pub mod dispatcher;
pub mod health;
pub mod job;
pub mod watchdog;

pub use dispatcher::{DispatchReport, Dispatcher, WorkerClient};
pub use health::{HealthAggregator, WorkerHealth};
pub use job::{CostTable, Job, JobStatus, NewJob};
pub use watchdog::Watchdog;
