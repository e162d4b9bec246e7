//! Worker side of the fleet.
//!
//! A worker runs arithmetic jobs delivered by the orchestrator's dispatcher:
//! - **Admission**: a bounded-concurrency gate that accepts or rejects each
//!   delivery before any work starts
//! - **Execution**: admitted jobs run as supervised background tasks and
//!   report their result through a [`CompletionSink`](crate::store::CompletionSink)
//! - **Control**: an HTTP surface for load reporting and graceful drain
//!
//! # Components
//!
//! - [`AdmissionController`]: counts in-flight jobs, hands out permits
//! - [`JobExecutor`]: evaluates a job, reports it, releases its permit
//! - [`control`]: `/ping`, `/load`, `/shutdown`
//!
//! # Drain
//!
//! Draining flips the gate to reject new jobs with `Unavailable`. Jobs
//! already admitted run to completion; the process exits once the
//! in-flight count reaches zero. Nothing is cancelled.

pub mod admission;
pub mod control;
pub mod executor;

pub use admission::{AdmissionController, AdmissionError, AdmissionPermit, AdmissionSnapshot};
pub use executor::{ExecutionOutcome, JobAssignment, JobExecutor};
