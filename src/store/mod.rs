//! Job storage seam.
//!
//! The orchestrator treats the store as the single source of truth for job
//! state: the dispatcher and the watchdog share nothing else. Every
//! operation is atomic per job, and `claim_pending` is atomic across the
//! whole batch so two concurrent claimers never receive the same job.
//!
//! Workers only need to report completions, so they depend on the narrow
//! [`CompletionSink`] rather than the full [`JobStore`].

pub mod memory;
pub mod remote;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::Result;
use crate::scheduler::job::{Job, NewJob};

pub use memory::MemoryJobStore;
pub use remote::RemoteCompletionSink;

/// Computes the instant after which a running job counts as stuck.
pub type DeadlineFn<'a> = &'a (dyn Fn(&Job) -> DateTime<Utc> + Send + Sync);

#[async_trait]
pub trait CompletionSink: Send + Sync {
    /// Running -> Completed with `result`.
    ///
    /// Fails with `NotFound` if the job is gone and `InvalidTransition` if it
    /// is not running (reverted by the watchdog, or already completed).
    async fn complete(&self, id: Uuid, result: f64) -> Result<()>;
}

#[async_trait]
pub trait JobStore: CompletionSink {
    /// Persist a new Pending job.
    async fn insert(&self, new: NewJob) -> Result<Job>;

    async fn get(&self, id: Uuid) -> Result<Job>;

    /// All jobs, or only `user_id`'s, oldest first.
    async fn list(&self, user_id: Option<i64>) -> Result<Vec<Job>>;

    /// Delete every job. Returns how many were removed.
    async fn clear(&self) -> Result<usize>;

    /// Atomically move up to `limit` Pending jobs to Running, oldest first.
    async fn claim_pending(&self, limit: usize) -> Result<Vec<Job>>;

    /// Running -> Pending, clearing `started_at`.
    async fn revert_to_pending(&self, id: Uuid) -> Result<()>;

    /// Running jobs whose `deadline` is strictly before `now`.
    async fn list_running_older_than(
        &self,
        now: DateTime<Utc>,
        deadline: DeadlineFn<'_>,
    ) -> Result<Vec<Job>>;
}
