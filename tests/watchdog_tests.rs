use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use uuid::Uuid;

use calc_fleet::config::OrchestratorConfig;
use calc_fleet::scheduler::job::{CostTable, Job, JobStatus, NewJob};
use calc_fleet::scheduler::Watchdog;
use calc_fleet::store::{CompletionSink, JobStore, MemoryJobStore};

fn config(grace: Duration) -> OrchestratorConfig {
    OrchestratorConfig {
        grace_period: grace,
        watchdog_interval: Duration::from_millis(20),
        ..Default::default()
    }
}

/// Put a Running job that started `minutes_ago` directly into the store.
async fn running_job(store: &MemoryJobStore, new: NewJob, minutes_ago: i64) -> Uuid {
    let now = Utc::now();
    let mut job = Job::with_id(Uuid::new_v4(), new, now - chrono::Duration::minutes(minutes_ago));
    job.status = JobStatus::Running;
    job.started_at = Some(now - chrono::Duration::minutes(minutes_ago));
    job.attempts = 1;
    let id = job.id;
    store.put(job).await.unwrap();
    id
}

fn slow_plus() -> CostTable {
    CostTable::new().with_cost('+', Duration::from_secs(60))
}

/// "++" at 60s per "+" expects 120s; with a 3 minute grace the deadline is
/// start + 5 minutes, so a job started 10 minutes ago is reverted.
#[tokio::test]
async fn test_stuck_job_past_deadline_is_reverted() {
    let store = Arc::new(MemoryJobStore::new());
    let id = running_job(&store, NewJob::new(1, "++", slow_plus()), 10).await;

    let job = store.get(id).await.unwrap();
    assert_eq!(job.expected_duration(), Duration::from_secs(120));
    let started = job.started_at.unwrap();
    assert_eq!(
        job.deadline(Duration::from_secs(180)),
        started + chrono::Duration::minutes(5)
    );

    let watchdog = Watchdog::new(store.clone(), &config(Duration::from_secs(180)));
    let reverted = watchdog.run_cycle(Utc::now()).await;

    assert_eq!(reverted, vec![id]);
    let job = store.get(id).await.unwrap();
    assert_eq!(job.status, JobStatus::Pending);
    assert!(job.started_at.is_none());
    assert!(job.result.is_none());
}

#[tokio::test]
async fn test_job_within_deadline_is_left_alone() {
    let store = Arc::new(MemoryJobStore::new());
    // Started 4 minutes ago, deadline is 5 minutes after start.
    let id = running_job(&store, NewJob::new(1, "++", slow_plus()), 4).await;

    let watchdog = Watchdog::new(store.clone(), &config(Duration::from_secs(180)));
    assert!(watchdog.run_cycle(Utc::now()).await.is_empty());
    assert_eq!(store.get(id).await.unwrap().status, JobStatus::Running);
}

#[tokio::test]
async fn test_per_job_grace_overrides_default() {
    let store = Arc::new(MemoryJobStore::new());

    let mut patient = NewJob::new(1, "1+1", CostTable::new());
    patient.inactive_server_time = Some(Duration::from_secs(30 * 60));
    let patient_id = running_job(&store, patient, 10).await;

    let mut impatient = NewJob::new(2, "1+1", CostTable::new());
    impatient.inactive_server_time = Some(Duration::from_secs(60));
    let impatient_id = running_job(&store, impatient, 2).await;

    let watchdog = Watchdog::new(store.clone(), &config(Duration::from_secs(180)));
    let reverted = watchdog.run_cycle(Utc::now()).await;

    assert_eq!(reverted, vec![impatient_id]);
    assert_eq!(store.get(patient_id).await.unwrap().status, JobStatus::Running);
}

#[tokio::test]
async fn test_completed_and_pending_jobs_are_ignored() {
    let store = Arc::new(MemoryJobStore::new());
    let done = running_job(&store, NewJob::new(1, "1+1", CostTable::new()), 60).await;
    store.complete(done, 2.0).await.unwrap();
    let pending = store
        .insert(NewJob::new(1, "2+2", CostTable::new()))
        .await
        .unwrap()
        .id;

    let watchdog = Watchdog::new(store.clone(), &config(Duration::from_secs(1)));
    let later = Utc::now() + chrono::Duration::hours(1);
    assert!(watchdog.run_cycle(later).await.is_empty());

    let done = store.get(done).await.unwrap();
    assert_eq!(done.status, JobStatus::Completed);
    assert_eq!(done.result, Some(2.0));
    assert_eq!(store.get(pending).await.unwrap().status, JobStatus::Pending);
}

#[tokio::test]
async fn test_reverted_job_can_be_reclaimed_and_completed() {
    let store = Arc::new(MemoryJobStore::new());
    let id = running_job(&store, NewJob::new(1, "2+3*4", CostTable::new()), 10).await;

    let watchdog = Watchdog::new(store.clone(), &config(Duration::from_secs(180)));
    assert_eq!(watchdog.run_cycle(Utc::now()).await, vec![id]);

    let claimed = store.claim_pending(10).await.unwrap();
    assert_eq!(claimed.len(), 1);
    assert_eq!(claimed[0].attempts, 2);

    store.complete(id, 14.0).await.unwrap();
    assert_eq!(store.get(id).await.unwrap().result, Some(14.0));
}

#[tokio::test]
async fn test_run_loop_reverts_and_stops() {
    let store = Arc::new(MemoryJobStore::new());
    let id = running_job(&store, NewJob::new(1, "1", CostTable::new()), 10).await;

    let watchdog = Watchdog::new(store.clone(), &config(Duration::from_secs(180)));
    let stop = tokio_util::sync::CancellationToken::new();
    let handle = {
        let stop = stop.clone();
        tokio::spawn(async move { watchdog.run(stop).await })
    };

    let mut reverted = false;
    for _ in 0..50 {
        if store.get(id).await.unwrap().status == JobStatus::Pending {
            reverted = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert!(reverted, "watchdog loop should revert the stuck job");

    stop.cancel();
    tokio::time::timeout(Duration::from_secs(2), handle)
        .await
        .expect("watchdog loop should exit")
        .unwrap();
}

/// A cost table whose total overflows `Duration` leaves the job Running
/// forever instead of taking the watchdog down.
#[tokio::test]
async fn test_overflowing_cost_table_is_left_running() {
    let store = Arc::new(MemoryJobStore::new());
    let costs = CostTable::new().with_cost('+', Duration::from_millis(u64::MAX));
    let operation = vec!["1"; 1202].join("+");
    let huge = running_job(&store, NewJob::new(1, operation, costs), 60).await;
    let stuck = running_job(&store, NewJob::new(2, "1+1", CostTable::new()), 60).await;

    let watchdog = Watchdog::new(store.clone(), &config(Duration::from_secs(180)));
    let reverted = watchdog.run_cycle(Utc::now()).await;

    assert_eq!(reverted, vec![stuck]);
    assert_eq!(store.get(huge).await.unwrap().status, JobStatus::Running);
    assert!(watchdog.run_cycle(Utc::now()).await.is_empty());
}
