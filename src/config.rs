use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;

use crate::error::FleetError;

/// One entry of the static worker pool.
///
/// A worker exposes two endpoints: the HTTP control surface (health, load,
/// drain) and the gRPC admission endpoint the dispatcher delivers jobs to.
/// Both are kept on the same record so they can never drift apart.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerDescriptor {
    pub name: String,
    /// host:port of the worker's HTTP control surface
    pub http_addr: String,
    /// host:port of the worker's gRPC service
    pub rpc_addr: String,
}

impl WorkerDescriptor {
    pub fn new(
        name: impl Into<String>,
        http_addr: impl Into<String>,
        rpc_addr: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            http_addr: http_addr.into(),
            rpc_addr: rpc_addr.into(),
        }
    }

    /// Parse a comma-separated pool, e.g.
    /// `"calc1@127.0.0.1:8081@127.0.0.1:50061,calc2@127.0.0.1:8082@127.0.0.1:50062"`.
    ///
    /// Order is preserved: it is the failover priority.
    pub fn parse_list(list: &str) -> Result<Vec<Self>, FleetError> {
        list.split(',')
            .map(str::trim)
            .filter(|entry| !entry.is_empty())
            .map(str::parse)
            .collect()
    }
}

impl FromStr for WorkerDescriptor {
    type Err = FleetError;

    /// Format: `name@http_host:port@rpc_host:port`
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = s.trim().split('@').collect();
        match parts.as_slice() {
            [name, http, rpc] if !name.is_empty() && !http.is_empty() && !rpc.is_empty() => {
                Ok(Self::new(*name, *http, *rpc))
            }
            _ => Err(FleetError::MalformedInput(format!(
                "invalid worker '{}', expected name@http_host:port@rpc_host:port",
                s
            ))),
        }
    }
}

#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Client-facing HTTP API
    pub api_addr: SocketAddr,
    /// gRPC endpoint workers report completions to
    pub rpc_addr: SocketAddr,
    pub workers: Vec<WorkerDescriptor>,
    pub dispatch_interval: Duration,
    /// Maximum number of jobs claimed per dispatch cycle
    pub claim_batch: usize,
    pub watchdog_interval: Duration,
    /// Buffer added to a job's expected duration before it counts as stuck
    pub grace_period: Duration,
    /// Bound on a single StartJob call, including connection setup
    pub rpc_timeout: Duration,
    /// Bound on a single worker health probe
    pub health_timeout: Duration,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            api_addr: SocketAddr::from(([127, 0, 0, 1], 8080)),
            rpc_addr: SocketAddr::from(([127, 0, 0, 1], 50050)),
            workers: Vec::new(),
            dispatch_interval: Duration::from_secs(30),
            claim_batch: 5,
            watchdog_interval: Duration::from_secs(60),
            grace_period: Duration::from_secs(180),
            rpc_timeout: Duration::from_secs(5),
            health_timeout: Duration::from_secs(2),
        }
    }
}

impl OrchestratorConfig {
    pub fn new(api_addr: SocketAddr, rpc_addr: SocketAddr) -> Self {
        Self {
            api_addr,
            rpc_addr,
            ..Default::default()
        }
    }

    pub fn with_worker(mut self, worker: WorkerDescriptor) -> Self {
        self.workers.push(worker);
        self
    }
}

#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub name: String,
    /// gRPC admission endpoint
    pub rpc_addr: SocketAddr,
    /// HTTP control surface (ping, load, shutdown)
    pub http_addr: SocketAddr,
    /// host:port of the orchestrator's CoordinatorService
    pub coordinator_addr: String,
    pub max_concurrency: usize,
    /// How often a draining worker re-checks its in-flight count
    pub drain_poll_interval: Duration,
    /// Bound on a single CompleteJob report
    pub report_timeout: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            name: "calc1".to_string(),
            rpc_addr: SocketAddr::from(([127, 0, 0, 1], 50061)),
            http_addr: SocketAddr::from(([127, 0, 0, 1], 8081)),
            coordinator_addr: "127.0.0.1:50050".to_string(),
            max_concurrency: 5,
            drain_poll_interval: Duration::from_secs(1),
            report_timeout: Duration::from_secs(5),
        }
    }
}

impl WorkerConfig {
    pub fn new(name: impl Into<String>, rpc_addr: SocketAddr, http_addr: SocketAddr) -> Self {
        Self {
            name: name.into(),
            rpc_addr,
            http_addr,
            ..Default::default()
        }
    }

    pub fn with_max_concurrency(mut self, max: usize) -> Self {
        self.max_concurrency = max;
        self
    }

    pub fn with_coordinator(mut self, addr: impl Into<String>) -> Self {
        self.coordinator_addr = addr.into();
        self
    }
}
