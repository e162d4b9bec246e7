use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::error::{FleetError, Result};
use crate::scheduler::job::{Job, JobStatus, NewJob};
use crate::store::{CompletionSink, DeadlineFn, JobStore};

const DEFAULT_MAX_JOBS: usize = 10_000;

/// In-process job store.
///
/// Every mutation runs under one write lock, which is what makes
/// `claim_pending` a single atomic select-and-update.
#[derive(Debug)]
pub struct MemoryJobStore {
    jobs: RwLock<HashMap<Uuid, Job>>,
    max_jobs: usize,
}

impl Default for MemoryJobStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryJobStore {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_MAX_JOBS)
    }

    pub fn with_capacity(max_jobs: usize) -> Self {
        Self {
            jobs: RwLock::new(HashMap::new()),
            max_jobs,
        }
    }

    /// Insert a fully-formed job, e.g. one restored from elsewhere or built by a test.
    pub async fn put(&self, job: Job) -> Result<()> {
        let mut jobs = self.jobs.write().await;
        if jobs.len() >= self.max_jobs && !jobs.contains_key(&job.id) {
            return Err(FleetError::CapacityExceeded {
                current: jobs.len(),
                max: self.max_jobs,
            });
        }
        jobs.insert(job.id, job);
        Ok(())
    }

    pub async fn len(&self) -> usize {
        self.jobs.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.jobs.read().await.is_empty()
    }
}

fn transition(job: &mut Job, next: JobStatus) -> Result<()> {
    if !job.status.can_transition_to(next) {
        tracing::error!(
            job_id = %job.id,
            from = %job.status,
            to = %next,
            "Rejected invalid job transition"
        );
        return Err(FleetError::InvalidTransition {
            job_id: job.id.to_string(),
            from: job.status.to_string(),
            to: next.to_string(),
        });
    }
    job.status = next;
    Ok(())
}

#[async_trait]
impl CompletionSink for MemoryJobStore {
    async fn complete(&self, id: Uuid, result: f64) -> Result<()> {
        let mut jobs = self.jobs.write().await;
        let job = jobs
            .get_mut(&id)
            .ok_or_else(|| FleetError::NotFound(id.to_string()))?;
        transition(job, JobStatus::Completed)?;
        job.result = Some(result);
        job.completed_at = Some(Utc::now());
        tracing::debug!(job_id = %id, result, "Job completed");
        Ok(())
    }
}

#[async_trait]
impl JobStore for MemoryJobStore {
    async fn insert(&self, new: NewJob) -> Result<Job> {
        let job = Job::new(new);
        self.put(job.clone()).await?;
        tracing::debug!(job_id = %job.id, user_id = job.user_id, "Job stored");
        Ok(job)
    }

    async fn get(&self, id: Uuid) -> Result<Job> {
        self.jobs
            .read()
            .await
            .get(&id)
            .cloned()
            .ok_or_else(|| FleetError::NotFound(id.to_string()))
    }

    async fn list(&self, user_id: Option<i64>) -> Result<Vec<Job>> {
        let jobs = self.jobs.read().await;
        let mut listed: Vec<Job> = jobs
            .values()
            .filter(|j| user_id.map_or(true, |uid| j.user_id == uid))
            .cloned()
            .collect();
        listed.sort_by_key(|j| j.created_at);
        Ok(listed)
    }

    async fn clear(&self) -> Result<usize> {
        let mut jobs = self.jobs.write().await;
        let removed = jobs.len();
        jobs.clear();
        Ok(removed)
    }

    async fn claim_pending(&self, limit: usize) -> Result<Vec<Job>> {
        let mut jobs = self.jobs.write().await;

        let mut pending: Vec<(DateTime<Utc>, Uuid)> = jobs
            .values()
            .filter(|j| j.status == JobStatus::Pending)
            .map(|j| (j.created_at, j.id))
            .collect();
        pending.sort();

        let now = Utc::now();
        let mut claimed = Vec::with_capacity(limit.min(pending.len()));
        for (_, id) in pending.into_iter().take(limit) {
            if let Some(job) = jobs.get_mut(&id) {
                transition(job, JobStatus::Running)?;
                job.started_at = Some(now);
                job.attempts += 1;
                claimed.push(job.clone());
            }
        }
        Ok(claimed)
    }

    async fn revert_to_pending(&self, id: Uuid) -> Result<()> {
        let mut jobs = self.jobs.write().await;
        let job = jobs
            .get_mut(&id)
            .ok_or_else(|| FleetError::NotFound(id.to_string()))?;
        transition(job, JobStatus::Pending)?;
        job.started_at = None;
        Ok(())
    }

    async fn list_running_older_than(
        &self,
        now: DateTime<Utc>,
        deadline: DeadlineFn<'_>,
    ) -> Result<Vec<Job>> {
        let jobs = self.jobs.read().await;
        Ok(jobs
            .values()
            .filter(|j| j.status == JobStatus::Running && deadline(j) < now)
            .cloned()
            .collect())
    }
}
