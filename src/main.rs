use clap::{Parser, ValueEnum};
use std::net::SocketAddr;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

use calc_fleet::api::{
    ClearJobsResponse, ErrorBody, JobView, SubmitJobRequest, SubmitJobResponse,
};
use calc_fleet::config::{OrchestratorConfig, WorkerConfig, WorkerDescriptor};
use calc_fleet::node::{BoxError, OrchestratorNode, WorkerNode};
use calc_fleet::scheduler::job::CostTable;
use calc_fleet::scheduler::WorkerHealth;
use calc_fleet::shutdown::install_shutdown_handler;
use calc_fleet::worker::control::DrainResponse;

#[derive(Parser, Debug)]
#[command(name = "calc-fleet")]
#[command(version)]
#[command(about = "A distributed arithmetic job fleet: one orchestrator, many workers")]
#[command(propagate_version = true)]
struct Args {
    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Subcommand, Debug)]
enum Commands {
    /// Start the orchestrator (job store, dispatcher, watchdog, API)
    Orchestrator(OrchestratorArgs),

    /// Start a worker
    Worker(WorkerArgs),

    /// Job management commands
    Job {
        #[command(flatten)]
        client: ClientArgs,

        #[command(subcommand)]
        command: JobCommands,
    },

    /// Worker fleet commands
    Fleet {
        #[command(flatten)]
        client: ClientArgs,

        #[command(subcommand)]
        command: FleetCommands,
    },
}

// =============================================================================
// Server Arguments
// =============================================================================

#[derive(Parser, Debug)]
struct OrchestratorArgs {
    /// Address for the client HTTP API
    #[arg(long, default_value = "0.0.0.0:8080")]
    api_addr: SocketAddr,

    /// Address for the gRPC endpoint workers report completions to
    #[arg(long, default_value = "0.0.0.0:50050")]
    rpc_addr: SocketAddr,

    /// Worker pool in failover priority order (comma-separated,
    /// format: "name@http_host:port@rpc_host:port")
    /// Example: "calc1@127.0.0.1:8081@127.0.0.1:50061"
    #[arg(long, default_value = "")]
    workers: String,

    /// Seconds between dispatch cycles
    #[arg(long, default_value = "30")]
    dispatch_interval: u64,

    /// Maximum jobs claimed per dispatch cycle
    #[arg(long, default_value = "5")]
    claim_batch: usize,

    /// Seconds between watchdog cycles
    #[arg(long, default_value = "60")]
    watchdog_interval: u64,

    /// Seconds added to a job's expected duration before it is requeued
    #[arg(long, default_value = "180")]
    grace_period: u64,

    /// Timeout in seconds for a single StartJob call
    #[arg(long, default_value = "5")]
    rpc_timeout: u64,
}

#[derive(Parser, Debug)]
struct WorkerArgs {
    /// Worker name, reported with every completion
    #[arg(long, default_value = "calc1")]
    name: String,

    /// Address for the gRPC admission endpoint
    #[arg(long, default_value = "0.0.0.0:50061")]
    rpc_addr: SocketAddr,

    /// Address for the HTTP control surface
    #[arg(long, default_value = "0.0.0.0:8081")]
    http_addr: SocketAddr,

    /// Orchestrator gRPC address
    #[arg(long, default_value = "127.0.0.1:50050")]
    coordinator: String,

    /// Maximum number of jobs running at once
    #[arg(long, default_value = "5")]
    max_concurrency: usize,
}

// =============================================================================
// Client Arguments (shared by job and fleet commands)
// =============================================================================

#[derive(Parser, Debug)]
struct ClientArgs {
    /// Orchestrator API address
    #[arg(long, short = 'a', default_value = "http://127.0.0.1:8080")]
    addr: String,

    /// Output format
    #[arg(long, short = 'o', default_value = "table")]
    output: OutputFormat,
}

#[derive(Debug, Clone, ValueEnum)]
enum OutputFormat {
    Table,
    Json,
}

// =============================================================================
// Job Commands
// =============================================================================

#[derive(clap::Subcommand, Debug)]
enum JobCommands {
    /// Submit a new job
    Submit {
        /// The arithmetic expression (e.g., "2+3*4")
        operation: String,

        /// Submitting user
        #[arg(long, default_value = "0")]
        user_id: i64,

        /// Operator cost as "op:millis", repeatable (e.g., --cost +:1000 --cost *:250)
        #[arg(long = "cost")]
        costs: Vec<String>,

        /// Per-job grace period override in seconds
        #[arg(long, default_value = "0")]
        inactive_server_time: u64,
    },
    /// Get status of a specific job
    Status {
        /// The job ID (UUID)
        job_id: String,
    },
    /// List jobs
    List {
        /// Only jobs submitted by this user
        #[arg(long)]
        user_id: Option<i64>,
    },
    /// Remove every job from the store
    Clear,
}

// =============================================================================
// Fleet Commands
// =============================================================================

#[derive(clap::Subcommand, Debug)]
enum FleetCommands {
    /// Show health and load of every worker
    Status,
    /// Ask a worker to stop accepting jobs and exit once idle
    Drain {
        /// Worker HTTP control address (host:port)
        worker: String,
    },
}

// =============================================================================
// Helper Functions
// =============================================================================

fn base_url(addr: &str) -> String {
    let addr = addr.trim_end_matches('/');
    if addr.starts_with("http://") || addr.starts_with("https://") {
        addr.to_string()
    } else {
        format!("http://{}", addr)
    }
}

fn parse_costs(costs: &[String]) -> Result<CostTable, BoxError> {
    let mut table = CostTable::new();
    for entry in costs {
        let (op, ms) = entry
            .rsplit_once(':')
            .ok_or_else(|| format!("invalid cost '{}', expected op:millis", entry))?;
        let mut chars = op.chars();
        let op = match (chars.next(), chars.next()) {
            (Some(c), None) => c,
            _ => return Err(format!("invalid operator '{}' in cost '{}'", op, entry).into()),
        };
        table = table.with_cost(op, Duration::from_millis(ms.trim().parse()?));
    }
    Ok(table)
}

/// Decode a JSON response, turning `{"error": ...}` bodies into errors.
async fn decode<T: serde::de::DeserializeOwned>(
    response: reqwest::Response,
) -> Result<T, BoxError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response.json::<T>().await?);
    }
    match response.json::<ErrorBody>().await {
        Ok(body) => Err(format!("{} ({})", body.error, status.as_u16()).into()),
        Err(_) => Err(format!("Unexpected status code: {}", status.as_u16()).into()),
    }
}

fn client() -> Result<reqwest::Client, reqwest::Error> {
    reqwest::Client::builder()
        .timeout(Duration::from_secs(10))
        .build()
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();
}

// =============================================================================
// Server Implementation
// =============================================================================

async fn run_orchestrator(args: OrchestratorArgs) -> Result<(), BoxError> {
    init_tracing();

    let mut config = OrchestratorConfig::new(args.api_addr, args.rpc_addr);
    config.workers = WorkerDescriptor::parse_list(&args.workers)?;
    config.dispatch_interval = Duration::from_secs(args.dispatch_interval);
    config.claim_batch = args.claim_batch;
    config.watchdog_interval = Duration::from_secs(args.watchdog_interval);
    config.grace_period = Duration::from_secs(args.grace_period);
    config.rpc_timeout = Duration::from_secs(args.rpc_timeout);

    if config.workers.is_empty() {
        tracing::warn!("No workers configured, jobs will stay pending");
    }

    tracing::info!(
        api_addr = %config.api_addr,
        rpc_addr = %config.rpc_addr,
        workers = ?config.workers.iter().map(|w| w.name.as_str()).collect::<Vec<_>>(),
        "Starting calc-fleet orchestrator"
    );

    let shutdown = install_shutdown_handler()?;
    OrchestratorNode::new(config).run(shutdown).await?;
    Ok(())
}

async fn run_worker(args: WorkerArgs) -> Result<(), BoxError> {
    init_tracing();

    let config = WorkerConfig::new(args.name, args.rpc_addr, args.http_addr)
        .with_max_concurrency(args.max_concurrency)
        .with_coordinator(args.coordinator);

    tracing::info!(
        worker = %config.name,
        rpc_addr = %config.rpc_addr,
        http_addr = %config.http_addr,
        coordinator = %config.coordinator_addr,
        "Starting calc-fleet worker"
    );

    let drain = install_shutdown_handler()?;
    WorkerNode::new(config)?.run(drain).await?;
    Ok(())
}

// =============================================================================
// Client Command Handlers
// =============================================================================

async fn handle_job_submit(
    args: &ClientArgs,
    request: SubmitJobRequest,
) -> Result<(), BoxError> {
    let response = client()?
        .post(format!("{}/api/jobs", base_url(&args.addr)))
        .json(&request)
        .send()
        .await?;
    let job: SubmitJobResponse = decode(response).await?;

    match args.output {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&job)?),
        OutputFormat::Table => {
            println!("Job submitted successfully!");
            println!("Job ID: {}", job.id);
        }
    }
    Ok(())
}

async fn handle_job_status(
    args: &ClientArgs,
    job_id: String,
) -> Result<(), BoxError> {
    let response = client()?
        .get(format!("{}/api/jobs/{}", base_url(&args.addr), job_id))
        .send()
        .await?;
    let job: JobView = decode(response).await?;

    match args.output {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&job)?),
        OutputFormat::Table => {
            println!("Job ID:     {}", job.id);
            println!("User:       {}", job.user_id);
            println!("Operation:  {}", job.operation);
            println!("Status:     {}", job.status);
            println!("Attempts:   {}", job.attempts);
            if let Some(result) = job.result {
                println!("Result:     {}", result);
            }
            if let Some(completed_at) = job.completed_at {
                println!("Completed:  {}", completed_at.to_rfc3339());
            }
        }
    }
    Ok(())
}

async fn handle_job_list(
    args: &ClientArgs,
    user_id: Option<i64>,
) -> Result<(), BoxError> {
    let mut request = client()?.get(format!("{}/api/jobs", base_url(&args.addr)));
    if let Some(user_id) = user_id {
        request = request.query(&[("userId", user_id)]);
    }
    let jobs: Vec<JobView> = decode(request.send().await?).await?;

    match args.output {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&jobs)?),
        OutputFormat::Table => {
            if jobs.is_empty() {
                println!("No jobs found.");
                return Ok(());
            }
            println!(
                "{:<38} {:<10} {:<8} {:<14} OPERATION",
                "JOB ID", "STATUS", "USER", "RESULT"
            );
            println!("{}", "-".repeat(90));
            for job in &jobs {
                let result = job
                    .result
                    .map(|r| r.to_string())
                    .unwrap_or_else(|| "-".to_string());
                let op_display = if job.operation.chars().count() > 20 {
                    format!("{}...", job.operation.chars().take(17).collect::<String>())
                } else {
                    job.operation.clone()
                };
                println!(
                    "{:<38} {:<10} {:<8} {:<14} {}",
                    job.id,
                    job.status.to_string(),
                    job.user_id,
                    result,
                    op_display
                );
            }
            println!();
            println!("{} jobs", jobs.len());
        }
    }
    Ok(())
}

async fn handle_job_clear(args: &ClientArgs) -> Result<(), BoxError> {
    let response = client()?
        .delete(format!("{}/api/jobs", base_url(&args.addr)))
        .send()
        .await?;
    let cleared: ClearJobsResponse = decode(response).await?;

    match args.output {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&cleared)?),
        OutputFormat::Table => println!("Cleared {} jobs.", cleared.cleared),
    }
    Ok(())
}

async fn handle_fleet_status(args: &ClientArgs) -> Result<(), BoxError> {
    let response = client()?
        .get(format!("{}/api/workers", base_url(&args.addr)))
        .send()
        .await?;
    let workers: Vec<WorkerHealth> = decode(response).await?;

    match args.output {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&workers)?),
        OutputFormat::Table => {
            println!("Fleet Status");
            println!("{}", "=".repeat(40));
            println!("{:<12} {:<25} {:<10} LOAD", "NAME", "URL", "STATUS");
            println!("{}", "-".repeat(60));
            for worker in workers {
                let status_icon = if worker.running { "[+]" } else { "[-]" };
                let load = match worker.max_concurrency {
                    Some(max) => format!("{}/{}", worker.current_load, max),
                    None => "-".to_string(),
                };
                println!(
                    "{:<12} {:<25} {} {:<6} {}",
                    worker.name,
                    worker.url,
                    status_icon,
                    if worker.running { "up" } else { "down" },
                    load
                );
                if let Some(error) = worker.error {
                    println!("    error: {}", error);
                }
            }
        }
    }
    Ok(())
}

async fn handle_fleet_drain(
    args: &ClientArgs,
    worker: String,
) -> Result<(), BoxError> {
    let response = client()?
        .post(format!("{}/shutdown", base_url(&worker)))
        .send()
        .await?;
    let drain: DrainResponse = decode(response).await?;

    match args.output {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&drain)?),
        OutputFormat::Table => {
            println!("Worker {} is draining.", worker);
            println!("In-flight jobs: {}", drain.in_flight);
        }
    }
    Ok(())
}

// =============================================================================
// Main Entry Point
// =============================================================================

#[tokio::main]
async fn main() -> Result<(), BoxError> {
    let args = Args::parse();

    match args.command {
        Commands::Orchestrator(orchestrator_args) => {
            run_orchestrator(orchestrator_args).await?;
        }
        Commands::Worker(worker_args) => {
            run_worker(worker_args).await?;
        }
        Commands::Job { client, command } => match command {
            JobCommands::Submit {
                operation,
                user_id,
                costs,
                inactive_server_time,
            } => {
                let request = SubmitJobRequest {
                    user_id,
                    operation,
                    cost_table: parse_costs(&costs)?,
                    inactive_server_time,
                };
                handle_job_submit(&client, request).await?;
            }
            JobCommands::Status { job_id } => {
                handle_job_status(&client, job_id).await?;
            }
            JobCommands::List { user_id } => {
                handle_job_list(&client, user_id).await?;
            }
            JobCommands::Clear => {
                handle_job_clear(&client).await?;
            }
        },
        Commands::Fleet { client, command } => match command {
            FleetCommands::Status => {
                handle_fleet_status(&client).await?;
            }
            FleetCommands::Drain { worker } => {
                handle_fleet_drain(&client, worker).await?;
            }
        },
    }

    Ok(())
}
