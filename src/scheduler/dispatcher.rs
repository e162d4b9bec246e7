use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::config::OrchestratorConfig;
use crate::error::{FleetError, Result};
use crate::scheduler::job::Job;
use crate::store::JobStore;

/// Delivery channel to one worker.
#[async_trait]
pub trait WorkerClient: Send + Sync {
    fn name(&self) -> &str;

    /// Ask the worker to admit and start `job`.
    ///
    /// `CapacityExceeded`, `Unavailable` and `TransportFailure` mean "try the
    /// next worker".
    async fn start_job(&self, job: &Job) -> Result<()>;
}

/// What one dispatch cycle did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DispatchReport {
    pub claimed: usize,
    /// (job, worker that admitted it)
    pub delivered: Vec<(Uuid, String)>,
    /// Claimed but rejected by every worker; left Running for the watchdog
    pub undelivered: Vec<Uuid>,
}

/// Periodically claims pending jobs and hands each to the first worker that admits it.
pub struct Dispatcher {
    store: Arc<dyn JobStore>,
    /// Failover priority order
    workers: Vec<Arc<dyn WorkerClient>>,
    claim_batch: usize,
    interval: Duration,
    rpc_timeout: Duration,
}

impl Dispatcher {
    pub fn new(
        store: Arc<dyn JobStore>,
        workers: Vec<Arc<dyn WorkerClient>>,
        config: &OrchestratorConfig,
    ) -> Self {
        Self {
            store,
            workers,
            claim_batch: config.claim_batch,
            interval: config.dispatch_interval,
            rpc_timeout: config.rpc_timeout,
        }
    }

    /// Run cycles on a fixed interval until `stop` is cancelled.
    ///
    /// A cycle runs to completion before the next tick is awaited, and late
    /// ticks are delayed rather than bursted, so cycles never overlap.
    pub async fn run(&self, stop: CancellationToken) {
        let mut interval = tokio::time::interval(self.interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        tracing::info!(
            interval_ms = self.interval.as_millis() as u64,
            batch = self.claim_batch,
            workers = self.workers.len(),
            "Dispatcher started"
        );

        loop {
            tokio::select! {
                _ = stop.cancelled() => {
                    tracing::info!("Dispatcher stopped");
                    break;
                }
                _ = interval.tick() => {
                    let report = self.run_cycle().await;
                    if report.claimed > 0 {
                        tracing::info!(
                            claimed = report.claimed,
                            delivered = report.delivered.len(),
                            undelivered = report.undelivered.len(),
                            "Dispatch cycle finished"
                        );
                    }
                }
            }
        }
    }

    pub async fn run_cycle(&self) -> DispatchReport {
        let jobs = match self.store.claim_pending(self.claim_batch).await {
            Ok(jobs) => jobs,
            Err(e) => {
                tracing::error!(error = %e, "Failed to claim pending jobs");
                return DispatchReport::default();
            }
        };

        let mut report = DispatchReport {
            claimed: jobs.len(),
            ..Default::default()
        };

        for job in &jobs {
            match self.deliver(job).await {
                Some(worker) => report.delivered.push((job.id, worker.to_string())),
                None => {
                    // Stays Running; the watchdog requeues it once its deadline passes.
                    tracing::warn!(job_id = %job.id, "No worker accepted job");
                    report.undelivered.push(job.id);
                }
            }
        }

        report
    }

    /// Try each worker in pool order. Returns the name of the worker that admitted `job`.
    pub async fn deliver(&self, job: &Job) -> Option<&str> {
        for worker in &self.workers {
            let outcome = match tokio::time::timeout(self.rpc_timeout, worker.start_job(job)).await
            {
                Ok(outcome) => outcome,
                Err(_) => Err(FleetError::TransportFailure(format!(
                    "no response within {:?}",
                    self.rpc_timeout
                ))),
            };

            match outcome {
                Ok(()) => {
                    tracing::info!(job_id = %job.id, worker = %worker.name(), "Job delivered");
                    return Some(worker.name());
                }
                Err(e) if e.is_retryable() => {
                    tracing::debug!(job_id = %job.id, worker = %worker.name(), error = %e, "Worker declined, trying next");
                }
                Err(e) => {
                    // Not a capacity or reachability problem; still move on so one
                    // misbehaving worker cannot block the job.
                    tracing::warn!(job_id = %job.id, worker = %worker.name(), error = %e, "Worker rejected job");
                }
            }
        }
        None
    }
}
