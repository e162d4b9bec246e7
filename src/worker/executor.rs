use std::future::Future;
use std::sync::Arc;

use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::error::FleetError;
use crate::evaluator::{self, Evaluation};
use crate::scheduler::job::CostTable;
use crate::store::CompletionSink;
use crate::worker::admission::AdmissionPermit;

/// A job as delivered to a worker.
#[derive(Debug, Clone)]
pub struct JobAssignment {
    pub job_id: Uuid,
    pub operation: String,
    pub cost_table: CostTable,
}

/// How one execution ended.
#[derive(Debug, Clone, PartialEq)]
pub enum ExecutionOutcome {
    Completed(f64),
    /// Evaluated, but the result could not be recorded
    ReportFailed(FleetError),
    /// The evaluation task panicked or was cancelled
    Aborted(String),
}

/// Runs admitted jobs in the background and reports their results.
#[derive(Clone)]
pub struct JobExecutor {
    sink: Arc<dyn CompletionSink>,
    worker: String,
}

impl JobExecutor {
    pub fn new(sink: Arc<dyn CompletionSink>, worker: impl Into<String>) -> Self {
        Self {
            sink,
            worker: worker.into(),
        }
    }

    /// Start `assignment` and return immediately.
    ///
    /// The returned supervisor task owns `permit`, so the admission slot is
    /// released however the job ends.
    pub fn spawn(
        &self,
        assignment: JobAssignment,
        permit: AdmissionPermit,
    ) -> JoinHandle<ExecutionOutcome> {
        let job_id = assignment.job_id;
        tracing::info!(
            job_id = %job_id,
            worker = %self.worker,
            operation = %assignment.operation,
            "Executing job"
        );

        self.spawn_with(job_id, permit, async move {
            evaluator::evaluate(&assignment.operation, &assignment.cost_table).await
        })
    }

    fn spawn_with<F>(
        &self,
        job_id: Uuid,
        permit: AdmissionPermit,
        evaluation: F,
    ) -> JoinHandle<ExecutionOutcome>
    where
        F: Future<Output = Evaluation> + Send + 'static,
    {
        let executor = self.clone();
        tokio::spawn(async move {
            let _permit = permit;
            executor.supervise(job_id, evaluation).await
        })
    }

    /// Run `evaluation` on its own task so a panic surfaces as a `JoinError`.
    async fn supervise<F>(&self, job_id: Uuid, evaluation: F) -> ExecutionOutcome
    where
        F: Future<Output = Evaluation> + Send + 'static,
    {
        let evaluation = tokio::spawn(evaluation).await;

        let Evaluation { steps, result } = match evaluation {
            Ok(evaluation) => evaluation,
            Err(e) => {
                tracing::error!(job_id = %job_id, error = %e, "Job evaluation aborted");
                return ExecutionOutcome::Aborted(e.to_string());
            }
        };

        for step in &steps {
            tracing::debug!(job_id = %job_id, step = %step, "Evaluated");
        }

        // Store failures are left for the watchdog to reconcile; no retry here.
        match self.sink.complete(job_id, result).await {
            Ok(()) => {
                tracing::info!(job_id = %job_id, result, "Job completed");
                ExecutionOutcome::Completed(result)
            }
            Err(e) => {
                tracing::error!(job_id = %job_id, result, error = %e, "Failed to record job result");
                ExecutionOutcome::ReportFailed(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Result;
    use crate::worker::admission::AdmissionController;
    use async_trait::async_trait;
    use parking_lot::Mutex;

    #[derive(Default)]
    struct RecordingSink {
        completed: Mutex<Vec<(Uuid, f64)>>,
        fail: bool,
    }

    #[async_trait]
    impl CompletionSink for RecordingSink {
        async fn complete(&self, id: Uuid, result: f64) -> Result<()> {
            if self.fail {
                return Err(FleetError::TransportFailure("store down".into()));
            }
            self.completed.lock().push((id, result));
            Ok(())
        }
    }

    fn assignment(op: &str) -> JobAssignment {
        JobAssignment {
            job_id: Uuid::new_v4(),
            operation: op.to_string(),
            cost_table: CostTable::new(),
        }
    }

    #[tokio::test]
    async fn reports_result_and_releases_slot() {
        let sink = Arc::new(RecordingSink::default());
        let executor = JobExecutor::new(sink.clone(), "calc-test");
        let gate = AdmissionController::new(1);

        let job = assignment("2+3*4");
        let job_id = job.job_id;
        let outcome = executor
            .spawn(job, gate.try_acquire().unwrap())
            .await
            .unwrap();

        assert_eq!(outcome, ExecutionOutcome::Completed(14.0));
        assert_eq!(sink.completed.lock().as_slice(), &[(job_id, 14.0)]);
        assert_eq!(gate.snapshot().current, 0);
    }

    #[tokio::test]
    async fn sink_failure_still_releases_slot() {
        let sink = Arc::new(RecordingSink {
            fail: true,
            ..Default::default()
        });
        let executor = JobExecutor::new(sink, "calc-test");
        let gate = AdmissionController::new(1);

        let outcome = executor
            .spawn(assignment("1+1"), gate.try_acquire().unwrap())
            .await
            .unwrap();

        assert!(matches!(outcome, ExecutionOutcome::ReportFailed(_)));
        assert_eq!(gate.snapshot().current, 0);
    }

    async fn exploding() -> Evaluation {
        panic!("evaluation blew up")
    }

    #[tokio::test]
    async fn panicking_evaluation_is_aborted_and_releases_slot() {
        let sink = Arc::new(RecordingSink::default());
        let executor = JobExecutor::new(sink.clone(), "calc-test");
        let gate = AdmissionController::new(1);

        let outcome = executor
            .spawn_with(Uuid::new_v4(), gate.try_acquire().unwrap(), exploding())
            .await
            .unwrap();

        assert!(matches!(outcome, ExecutionOutcome::Aborted(_)));
        assert_eq!(gate.snapshot().current, 0);
        assert!(sink.completed.lock().is_empty());
    }
}
