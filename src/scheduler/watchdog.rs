use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::config::OrchestratorConfig;
use crate::error::FleetError;
use crate::scheduler::job::Job;
use crate::store::JobStore;

/// Requeues Running jobs that outlived `started_at + expected duration + grace`.
///
/// This is the only recovery path for crashed workers and lost responses.
/// There is no lease: a worker that is merely slow can have its job
/// redispatched and run twice.
pub struct Watchdog {
    store: Arc<dyn JobStore>,
    grace: Duration,
    interval: Duration,
}

impl Watchdog {
    pub fn new(store: Arc<dyn JobStore>, config: &OrchestratorConfig) -> Self {
        Self {
            store,
            grace: config.grace_period,
            interval: config.watchdog_interval,
        }
    }

    pub async fn run(&self, stop: CancellationToken) {
        let mut interval = tokio::time::interval(self.interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        tracing::info!(
            interval_ms = self.interval.as_millis() as u64,
            grace_secs = self.grace.as_secs(),
            "Watchdog started"
        );

        loop {
            tokio::select! {
                _ = stop.cancelled() => {
                    tracing::info!("Watchdog stopped");
                    break;
                }
                _ = interval.tick() => {
                    let reverted = self.run_cycle(Utc::now()).await;
                    if !reverted.is_empty() {
                        tracing::info!(count = reverted.len(), "Requeued stuck jobs");
                    }
                }
            }
        }
    }

    /// Revert every job whose deadline is before `now`. Returns the reverted ids.
    pub async fn run_cycle(&self, now: DateTime<Utc>) -> Vec<Uuid> {
        let grace = self.grace;
        let deadline = move |job: &Job| job.deadline(grace);

        let stuck = match self.store.list_running_older_than(now, &deadline).await {
            Ok(stuck) => stuck,
            Err(e) => {
                tracing::error!(error = %e, "Failed to list running jobs");
                return Vec::new();
            }
        };

        let mut reverted = Vec::with_capacity(stuck.len());
        for job in stuck {
            let elapsed_secs = job
                .started_at
                .map(|started| (now - started).num_seconds())
                .unwrap_or_default();

            match self.store.revert_to_pending(job.id).await {
                Ok(()) => {
                    tracing::warn!(
                        job_id = %job.id,
                        elapsed_secs,
                        expected_secs = job.expected_duration().as_secs(),
                        attempts = job.attempts,
                        "Job exceeded its deadline, reverted to pending"
                    );
                    reverted.push(job.id);
                }
                Err(FleetError::InvalidTransition { .. }) => {
                    // Completed between the listing and the revert.
                    tracing::debug!(job_id = %job.id, "Job finished before it could be reverted");
                }
                Err(e) => {
                    tracing::error!(job_id = %job.id, error = %e, "Failed to revert stuck job");
                }
            }
        }
        reverted
    }
}
