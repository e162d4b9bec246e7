
use std::time::Duration;

use serde_json::{json, Value};
use uuid::Uuid;

use calc_fleet::api::{JobView, SubmitJobResponse};
use calc_fleet::config::WorkerDescriptor;
use calc_fleet::scheduler::job::JobStatus;
use calc_fleet::scheduler::WorkerHealth;
use calc_fleet::store::JobStore;
use test_harness::{dead_addr, wait_for, TestFleet};

async fn submit(api_url: &str, body: Value) -> SubmitJobResponse {
    let response = reqwest::Client::new()
        .post(format!("{}/api/jobs", api_url))
        .json(&body)
        .send()
        .await
        .unwrap();
    assert!(response.status().is_success(), "submit failed: {}", response.status());
    response.json().await.unwrap()
}

async fn fetch(api_url: &str, id: Uuid) -> JobView {
    reqwest::Client::new()
        .get(format!("{}/api/jobs/{}", api_url, id))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap()
}

async fn wait_completed(api_url: &str, id: Uuid, timeout: Duration) -> Option<JobView> {
    let done = wait_for(timeout, move || async move {
        fetch(api_url, id).await.status == JobStatus::Completed
    })
    .await;
    if done {
        Some(fetch(api_url, id).await)
    } else {
        None
    }
}

/// Submit over HTTP, dispatch over gRPC, evaluate on a worker, report back
/// over gRPC, read the result over HTTP.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_job_flows_through_the_fleet() {
    let fleet = TestFleet::start(&[("calc1", 2)]).await;
    let api = fleet.orchestrator.api_url.clone();

    let submitted = submit(&api, json!({"userId": 1, "operation": "2+3*4"})).await;
    assert_eq!(submitted.status, JobStatus::Pending);

    let job = wait_completed(&api, submitted.id, Duration::from_secs(10))
        .await
        .expect("job should complete");
    assert_eq!(job.result, Some(14.0));
    assert_eq!(job.attempts, 1);
    assert!(job.completed_at.is_some());

    fleet.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_many_jobs_spread_over_the_pool() {
    let fleet = TestFleet::start(&[("calc1", 2), ("calc2", 2)]).await;
    let api = fleet.orchestrator.api_url.clone();

    let mut ids = Vec::new();
    for i in 0..6 {
        let op = format!("{}*2", i);
        let submitted = submit(
            &api,
            json!({"userId": 1, "operation": op, "costTable": {"*": 200}}),
        )
        .await;
        ids.push((submitted.id, (i * 2) as f64));
    }

    for (id, expected) in ids {
        let job = wait_completed(&api, id, Duration::from_secs(15))
            .await
            .expect("job should complete");
        assert_eq!(job.result, Some(expected));
    }

    fleet.shutdown().await;
}

/// The first worker in the pool is unreachable; delivery fails over to the next.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_unreachable_worker_fails_over() {
    let down = dead_addr().await;
    let unreachable = WorkerDescriptor::new("calc1", down.to_string(), down.to_string());
    let fleet = TestFleet::start_with(&[("calc2", 2)], Vec::new(), move |mut config| {
        config.workers.insert(0, unreachable);
        config
    })
    .await;
    let api = fleet.orchestrator.api_url.clone();

    let submitted = submit(&api, json!({"userId": 1, "operation": "10/4"})).await;
    let job = wait_completed(&api, submitted.id, Duration::from_secs(10))
        .await
        .expect("job should complete on the healthy worker");
    assert_eq!(job.result, Some(2.5));

    let workers: Vec<WorkerHealth> = reqwest::Client::new()
        .get(format!("{}/api/workers", api))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(workers.len(), 2);
    assert_eq!(workers[0].name, "calc1");
    assert!(!workers[0].running);
    assert_eq!(workers[1].name, "calc2");
    assert!(workers[1].running);

    fleet.shutdown().await;
}

/// A job claimed while no worker can take it is requeued by the watchdog and
/// completes once capacity shows up.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_undeliverable_job_is_requeued_and_retried() {
    let fleet = TestFleet::start_with(&[("calc1", 1)], Vec::new(), |mut config| {
        config.grace_period = Duration::from_millis(500);
        config
    })
    .await;
    let api = fleet.orchestrator.api_url.clone();

    // Occupy the only slot.
    let hog = submit(
        &api,
        json!({"userId": 1, "operation": "1+1", "costTable": {"+": 1500}}),
    )
    .await;
    let store = fleet.orchestrator.store.clone();
    assert!(
        wait_for(Duration::from_secs(5), || {
            let store = store.clone();
            async move { store.get(hog.id).await.unwrap().status == JobStatus::Running }
        })
        .await
    );

    let queued = submit(&api, json!({"userId": 2, "operation": "3*3"})).await;

    let job = wait_completed(&api, queued.id, Duration::from_secs(15))
        .await
        .expect("queued job should eventually complete");
    assert_eq!(job.result, Some(9.0));
    assert!(job.attempts >= 2, "expected a retry, got {} attempts", job.attempts);

    fleet.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_drained_worker_is_skipped_by_dispatch() {
    let fleet = TestFleet::start(&[("calc1", 2), ("calc2", 2)]).await;
    let api = fleet.orchestrator.api_url.clone();

    let drain: Value = reqwest::Client::new()
        .post(format!("{}/shutdown", fleet.workers[0].http_url()))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(drain["draining"], true);

    let submitted = submit(&api, json!({"userId": 1, "operation": "7-2"})).await;
    let job = wait_completed(&api, submitted.id, Duration::from_secs(10))
        .await
        .expect("job should complete on the remaining worker");
    assert_eq!(job.result, Some(5.0));

    fleet.shutdown().await;
}
