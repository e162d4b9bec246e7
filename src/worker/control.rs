//! HTTP control surface of a worker: load reporting and graceful drain.

use std::sync::Arc;

use axum::{extract::State, routing::get, routing::post, Json, Router};
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use crate::worker::admission::AdmissionController;

pub const STATUS_RUNNING: &str = "running";
pub const STATUS_DRAINING: &str = "draining";

#[derive(Clone)]
pub struct ControlState {
    pub admission: Arc<AdmissionController>,
    /// Cancelled to start the drain-then-exit sequence
    pub drain: CancellationToken,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PingResponse {
    pub status: String,
    pub max_concurrency: usize,
    pub current_load: usize,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoadResponse {
    pub current_load: usize,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DrainResponse {
    pub draining: bool,
    pub in_flight: usize,
}

pub fn control_router(state: ControlState) -> Router {
    Router::new()
        .route("/ping", get(ping_handler))
        .route("/load", get(load_handler))
        .route("/shutdown", post(shutdown_handler))
        .with_state(state)
}

/// Serve the control surface until `stop` is cancelled.
pub async fn run_control(listener: TcpListener, state: ControlState, stop: CancellationToken) {
    let addr = listener.local_addr().ok();
    tracing::info!(addr = ?addr, "Starting worker control server");

    if let Err(e) = axum::serve(listener, control_router(state))
        .with_graceful_shutdown(async move { stop.cancelled().await })
        .await
    {
        tracing::error!(error = %e, "Worker control server failed");
    }
}

async fn ping_handler(State(state): State<ControlState>) -> Json<PingResponse> {
    let snapshot = state.admission.snapshot();
    Json(PingResponse {
        status: if snapshot.accepting {
            STATUS_RUNNING
        } else {
            STATUS_DRAINING
        }
        .to_string(),
        max_concurrency: snapshot.max,
        current_load: snapshot.current,
    })
}

async fn load_handler(State(state): State<ControlState>) -> Json<LoadResponse> {
    Json(LoadResponse {
        current_load: state.admission.snapshot().current,
    })
}

async fn shutdown_handler(State(state): State<ControlState>) -> Json<DrainResponse> {
    if state.admission.begin_draining() {
        tracing::info!("Drain requested, no longer accepting jobs");
    }
    state.drain.cancel();
    Json(DrainResponse {
        draining: true,
        in_flight: state.admission.snapshot().current,
    })
}
