//! Local HTTP relay for parallel runs.
//!
//! Provides:
//! - `POST /` - log-attach requests from worker processes
//! - `POST /events` - runner events forwarded by worker processes
//! - `GET /health` - liveness check with the launch counter

use std::net::SocketAddr;

use axum::{
    Json, Router,
    extract::State,
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
};
use rprt_common::RunnerEvent;
use rprt_common::config::RelayConfig;
use rprt_common::protocol::RelayRequest;
use serde_json::json;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::agent::ParallelAgent;
use crate::errors::RelayError;

#[derive(Clone)]
struct RelayState {
    agent: ParallelAgent,
    events: mpsc::UnboundedSender<RunnerEvent>,
}

/// Create the relay router.
///
/// Spawns the task that applies posted runner events to the agent in
/// arrival order, so it must be called inside a Tokio runtime. The task
/// ends once the router is dropped.
pub fn create_router(agent: ParallelAgent) -> Router {
    let (events, mut queue) = mpsc::unbounded_channel::<RunnerEvent>();
    let applier = agent.clone();
    tokio::spawn(async move {
        while let Some(event) = queue.recv().await {
            applier.handle(event);
        }
        debug!("Relay event queue closed");
    });

    Router::new()
        .route("/", post(log_handler))
        .route("/events", post(events_handler))
        .route("/health", get(health_handler))
        .with_state(RelayState { agent, events })
}

/// Handler for `POST /`.
///
/// Always answers `200 {}` before any work happens; the log itself is
/// resolved and sent in the background.
async fn log_handler(State(state): State<RelayState>, body: String) -> impl IntoResponse {
    match serde_json::from_str::<RelayRequest>(&body) {
        Ok(request) if request.is_add_log() => state.agent.dispatch_log(request),
        Ok(request) => debug!("Ignoring relay event {:?}", request.event),
        Err(err) => warn!("Malformed relay request: {err}"),
    }
    Json(json!({}))
}

/// Handler for `POST /events`.
///
/// A well-formed event is queued and acknowledged with `200 {}` before the
/// agent applies it. Malformed bodies get `400` with the parse error.
async fn events_handler(State(state): State<RelayState>, body: String) -> impl IntoResponse {
    match serde_json::from_str::<RunnerEvent>(&body) {
        Ok(event) => {
            if state.events.send(event).is_err() {
                warn!("Relay event queue closed, dropping runner event");
            }
            (StatusCode::OK, Json(json!({})))
        }
        Err(err) => {
            warn!("Malformed runner event: {err}");
            (
                StatusCode::BAD_REQUEST,
                Json(json!({ "error": err.to_string() })),
            )
        }
    }
}

/// Handler for `GET /health`.
async fn health_handler(State(state): State<RelayState>) -> impl IntoResponse {
    let launch = state.agent.launch_data();
    Json(json!({
        "status": "healthy",
        "version": crate::agent::AGENT_VERSION,
        "launch": launch.launch().map(|id| id.to_string()),
        "runners": launch.runners(),
    }))
}

/// A running relay.
pub struct RelayHandle {
    pub addr: SocketAddr,
    pub task: JoinHandle<Result<(), RelayError>>,
}

/// Bind the relay and serve it until the agent finishes its launch.
pub async fn start_server(
    config: &RelayConfig,
    agent: ParallelAgent,
) -> Result<RelayHandle, RelayError> {
    let addr = config.addr();
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .map_err(|source| RelayError::Bind {
            addr: addr.clone(),
            source,
        })?;
    let local = listener.local_addr().map_err(RelayError::Serve)?;
    info!("Relay listening on {local}");

    let mut shutdown = agent.shutdown_signal();
    let router = create_router(agent);
    let task = tokio::spawn(async move {
        axum::serve(listener, router)
            .with_graceful_shutdown(async move {
                let _ = shutdown.wait_for(|finished| *finished).await;
                debug!("Launch finished, stopping relay");
            })
            .await
            .map_err(RelayError::Serve)
    });
    Ok(RelayHandle { addr: local, task })
}
