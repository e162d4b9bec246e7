use std::sync::Arc;

use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::api::{run_api, ApiState};
use crate::config::{OrchestratorConfig, WorkerConfig};
use crate::error::Result as FleetResult;
use crate::grpc::{
    serve_coordinator, serve_worker, CoordinatorServiceImpl, GrpcWorkerClient, WorkerServiceImpl,
};
use crate::scheduler::{Dispatcher, HealthAggregator, Watchdog, WorkerClient};
use crate::store::{CompletionSink, JobStore, MemoryJobStore, RemoteCompletionSink};
use crate::worker::control::{run_control, ControlState};
use crate::worker::{AdmissionController, JobExecutor};

pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// The orchestrator process: job store, dispatcher, watchdog, client API and
/// the completion endpoint workers report to.
pub struct OrchestratorNode {
    pub config: OrchestratorConfig,
    pub store: Arc<dyn JobStore>,
}

impl OrchestratorNode {
    pub fn new(config: OrchestratorConfig) -> Self {
        Self::with_store(config, Arc::new(MemoryJobStore::new()))
    }

    pub fn with_store(config: OrchestratorConfig, store: Arc<dyn JobStore>) -> Self {
        Self { config, store }
    }

    /// One gRPC client per configured worker, in pool order.
    pub fn worker_clients(&self) -> FleetResult<Vec<Arc<dyn WorkerClient>>> {
        self.config
            .workers
            .iter()
            .map(|w| {
                GrpcWorkerClient::connect_lazy(w, self.config.rpc_timeout)
                    .map(|c| Arc::new(c) as Arc<dyn WorkerClient>)
            })
            .collect()
    }

    /// Bind the configured addresses and run until `shutdown` is cancelled.
    pub async fn run(self, shutdown: CancellationToken) -> Result<(), BoxError> {
        let api_listener = TcpListener::bind(self.config.api_addr).await?;
        let rpc_listener = TcpListener::bind(self.config.rpc_addr).await?;
        self.run_with_listeners(api_listener, rpc_listener, shutdown)
            .await
    }

    /// Run all orchestrator subsystems on pre-bound listeners:
    /// 1. Dispatcher loop (claims and delivers pending jobs)
    /// 2. Watchdog loop (requeues stuck jobs)
    /// 3. HTTP API (submission, lookup, listing, fleet health)
    /// 4. Coordinator gRPC server (blocks until shutdown)
    ///
    /// # Errors
    ///
    /// Fails if a worker endpoint is malformed or the gRPC server fails.
    pub async fn run_with_listeners(
        self,
        api_listener: TcpListener,
        rpc_listener: TcpListener,
        shutdown: CancellationToken,
    ) -> Result<(), BoxError> {
        let workers = self.worker_clients()?;

        let dispatcher = Dispatcher::new(self.store.clone(), workers, &self.config);
        let dispatcher_stop = shutdown.clone();
        let dispatcher_handle = tokio::spawn(async move {
            dispatcher.run(dispatcher_stop).await;
        });

        let watchdog = Watchdog::new(self.store.clone(), &self.config);
        let watchdog_stop = shutdown.clone();
        let watchdog_handle = tokio::spawn(async move {
            watchdog.run(watchdog_stop).await;
        });

        let api_state = ApiState {
            store: self.store.clone(),
            health: HealthAggregator::new(self.config.workers.clone(), self.config.health_timeout),
        };
        let api_handle = tokio::spawn(run_api(api_listener, api_state, shutdown.clone()));

        let served = serve_coordinator(
            rpc_listener,
            CoordinatorServiceImpl::new(self.store.clone()),
            shutdown.clone(),
        )
        .await;

        stop_tasks(
            served,
            &shutdown,
            vec![dispatcher_handle, watchdog_handle, api_handle],
        )
        .await?;
        tracing::info!("Orchestrator shut down");
        Ok(())
    }
}

/// Cancel `shutdown`, wait for `tasks`, then hand back the server's result.
async fn stop_tasks<E: std::fmt::Display>(
    served: Result<(), E>,
    shutdown: &CancellationToken,
    tasks: Vec<JoinHandle<()>>,
) -> Result<(), E> {
    if let Err(e) = &served {
        tracing::error!(error = %e, "Coordinator gRPC server failed");
    }
    shutdown.cancel();

    for handle in tasks {
        if let Err(e) = handle.await {
            tracing::error!(error = %e, "Orchestrator task ended abnormally");
        }
    }
    served
}

/// A worker process: admission endpoint, executor and control surface.
pub struct WorkerNode {
    pub config: WorkerConfig,
    admission: Arc<AdmissionController>,
    sink: Arc<dyn CompletionSink>,
}

impl WorkerNode {
    /// Results are reported to the orchestrator at `config.coordinator_addr`.
    pub fn new(config: WorkerConfig) -> FleetResult<Self> {
        let sink = RemoteCompletionSink::connect_lazy(
            &config.coordinator_addr,
            config.name.clone(),
            config.report_timeout,
        )?;
        Ok(Self::with_sink(config, Arc::new(sink)))
    }

    pub fn with_sink(config: WorkerConfig, sink: Arc<dyn CompletionSink>) -> Self {
        Self {
            admission: AdmissionController::new(config.max_concurrency),
            config,
            sink,
        }
    }

    pub fn admission(&self) -> Arc<AdmissionController> {
        self.admission.clone()
    }

    pub async fn run(self, drain: CancellationToken) -> Result<(), BoxError> {
        let rpc_listener = TcpListener::bind(self.config.rpc_addr).await?;
        let http_listener = TcpListener::bind(self.config.http_addr).await?;
        self.run_with_listeners(rpc_listener, http_listener, drain)
            .await
    }

    /// Serve until `drain` is cancelled (signal or `POST /shutdown`), then stop
    /// admitting, wait for in-flight jobs, and shut the servers down.
    pub async fn run_with_listeners(
        self,
        rpc_listener: TcpListener,
        http_listener: TcpListener,
        drain: CancellationToken,
    ) -> Result<(), BoxError> {
        let stop = CancellationToken::new();
        let name = self.config.name.clone();

        let executor = JobExecutor::new(self.sink.clone(), name.clone());
        let service = WorkerServiceImpl::new(name.clone(), self.admission.clone(), executor);
        let rpc_handle = tokio::spawn(serve_worker(rpc_listener, service, stop.clone()));

        let control_state = ControlState {
            admission: self.admission.clone(),
            drain: drain.clone(),
        };
        let control_handle = tokio::spawn(run_control(http_listener, control_state, stop.clone()));

        tracing::info!(
            worker = %name,
            max_concurrency = self.config.max_concurrency,
            "Worker ready"
        );

        drain.cancelled().await;
        self.admission.begin_draining();
        tracing::info!(worker = %name, "Stopped accepting new jobs, waiting for in-flight jobs");
        self.admission
            .wait_idle(self.config.drain_poll_interval)
            .await;

        stop.cancel();
        rpc_handle.await??;
        control_handle.await?;
        tracing::info!(worker = %name, "Worker shut down gracefully");
        Ok(())
    }
}
