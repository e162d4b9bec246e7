use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::task::JoinSet;

use crate::config::WorkerDescriptor;
use crate::worker::control::{PingResponse, STATUS_RUNNING};

/// Load and liveness of one worker as seen by the orchestrator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkerHealth {
    pub name: String,
    pub url: String,
    pub running: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_concurrency: Option<usize>,
    pub current_load: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl WorkerHealth {
    fn down(worker: &WorkerDescriptor, url: String, error: String) -> Self {
        Self {
            name: worker.name.clone(),
            url,
            running: false,
            max_concurrency: None,
            current_load: 0,
            error: Some(error),
        }
    }
}

/// Polls every worker's `/ping` and assembles the fleet view.
///
/// Read-only: it shares nothing with the dispatcher.
#[derive(Debug, Clone)]
pub struct HealthAggregator {
    workers: Vec<WorkerDescriptor>,
    client: reqwest::Client,
}

impl HealthAggregator {
    pub fn new(workers: Vec<WorkerDescriptor>, timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout)
            .build()
            .unwrap_or_else(|e| {
                tracing::warn!(error = %e, "Falling back to default HTTP client for health checks");
                reqwest::Client::new()
            });
        Self { workers, client }
    }

    /// Probe all workers concurrently. Results are in pool order.
    pub async fn poll(&self) -> Vec<WorkerHealth> {
        let mut probes = JoinSet::new();
        for (index, worker) in self.workers.iter().cloned().enumerate() {
            let client = self.client.clone();
            probes.spawn(async move { (index, probe(&client, &worker).await) });
        }

        let mut results = Vec::with_capacity(self.workers.len());
        while let Some(joined) = probes.join_next().await {
            match joined {
                Ok(result) => results.push(result),
                Err(e) => tracing::error!(error = %e, "Health probe task failed"),
            }
        }
        results.sort_by_key(|(index, _)| *index);
        results.into_iter().map(|(_, health)| health).collect()
    }
}

async fn probe(client: &reqwest::Client, worker: &WorkerDescriptor) -> WorkerHealth {
    let url = if worker.http_addr.starts_with("http://") || worker.http_addr.starts_with("https://")
    {
        worker.http_addr.clone()
    } else {
        format!("http://{}", worker.http_addr)
    };

    let response = match client.get(format!("{}/ping", url)).send().await {
        Ok(response) => response,
        Err(e) => {
            tracing::debug!(worker = %worker.name, error = %e, "Worker unreachable");
            return WorkerHealth::down(worker, url, e.to_string());
        }
    };

    let status = response.status();
    if !status.is_success() {
        return WorkerHealth::down(worker, url, format!("Unexpected status code: {}", status.as_u16()));
    }

    match response.json::<PingResponse>().await {
        Ok(ping) => WorkerHealth {
            name: worker.name.clone(),
            url,
            running: ping.status == STATUS_RUNNING,
            max_concurrency: Some(ping.max_concurrency),
            current_load: ping.current_load,
            error: None,
        },
        Err(e) => WorkerHealth::down(worker, url, format!("Failed to decode response: {}", e)),
    }
}
