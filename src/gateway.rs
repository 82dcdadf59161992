//! HTTP health surface
//!
//! Runs on its own task and treats the event loop as a foreign scheduler:
//! reads are served from the latest published snapshot, and the one mutating
//! endpoint posts a command onto the event-loop queue and awaits the reply
//! instead of touching core state directly.

use crate::daemon::LoopCommand;
use crate::error::Result;
use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{json, Value};
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::{mpsc, oneshot, watch};
use tracing::info;

/// Point-in-time view of the daemon, published by the event loop after each
/// iteration. Readers get eventual consistency, never a lock on the loop.
#[derive(Debug, Clone, Serialize)]
pub struct StatusSnapshot {
    pub service: &'static str,
    pub running: bool,
    pub bot_connected: bool,
    pub relay_active: bool,
    pub relay_live: usize,
    pub relay_total: usize,
    pub reactivation_count: u64,
    pub auto_reactivation: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_reactivation: Option<DateTime<Utc>>,
    pub users_total: usize,
    pub users_active: usize,
    pub timestamp: DateTime<Utc>,
}

impl StatusSnapshot {
    pub fn starting() -> Self {
        Self {
            service: "tipbot",
            running: false,
            bot_connected: false,
            relay_active: false,
            relay_live: 0,
            relay_total: 0,
            reactivation_count: 0,
            auto_reactivation: true,
            last_reactivation: None,
            users_total: 0,
            users_active: 0,
            timestamp: Utc::now(),
        }
    }
}

#[derive(Clone)]
pub struct AppState {
    pub commands: mpsc::Sender<LoopCommand>,
    pub snapshot: watch::Receiver<StatusSnapshot>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(liveness))
        .route("/status", get(status))
        .route("/reactivate", post(reactivate))
        .route("/health-monitor", get(health_monitor))
        .with_state(state)
}

pub async fn serve(listener: TcpListener, state: AppState) -> Result<()> {
    info!("Health surface listening on {:?}", listener.local_addr());
    axum::serve(listener, router(state)).await?;
    Ok(())
}

async fn liveness(State(state): State<AppState>) -> Json<Value> {
    let snapshot = state.snapshot.borrow().clone();
    Json(json!({
        "service": snapshot.service,
        "status": if snapshot.running { "running" } else { "starting" },
        "bot_connected": snapshot.bot_connected,
        "relay_active": snapshot.relay_active,
        "timestamp": Utc::now(),
    }))
}

async fn status(State(state): State<AppState>) -> Json<Value> {
    let snapshot = state.snapshot.borrow().clone();
    Json(json!({
        "snapshot": snapshot,
        "components": {
            "licenses": true,
            "sessions": true,
            "watchdog": true,
            "gateway": true,
        },
    }))
}

async fn reactivate(State(state): State<AppState>) -> (StatusCode, Json<Value>) {
    let (reply, report) = oneshot::channel();
    if state
        .commands
        .send(LoopCommand::Reactivate { reply })
        .await
        .is_err()
    {
        return (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({"error": "event loop unavailable"})),
        );
    }

    match tokio::time::timeout(Duration::from_secs(30), report).await {
        Ok(Ok(report)) => (
            StatusCode::OK,
            Json(json!({
                "message": "reactivation complete",
                "report": report,
                "timestamp": Utc::now(),
            })),
        ),
        Ok(Err(_)) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({"error": "event loop dropped the request"})),
        ),
        Err(_) => (
            StatusCode::GATEWAY_TIMEOUT,
            Json(json!({"error": "reactivation timed out"})),
        ),
    }
}

async fn health_monitor(State(state): State<AppState>) -> (StatusCode, Json<Value>) {
    let snapshot = state.snapshot.borrow().clone();

    if snapshot.bot_connected {
        return (
            StatusCode::OK,
            Json(json!({
                "status": "healthy",
                "bot_connected": true,
                "relay_active": snapshot.relay_active,
                "timestamp": Utc::now(),
            })),
        );
    }

    // Primary is down: fire the same repair path as POST /reactivate but
    // do not hold the caller; it is expected to retry.
    let (reply, _discard) = oneshot::channel();
    let _ = state
        .commands
        .try_send(LoopCommand::Reactivate { reply });

    (
        StatusCode::SERVICE_UNAVAILABLE,
        Json(json!({
            "status": "bot_disconnected",
            "action": "reactivation_triggered",
            "reactivation_count": snapshot.reactivation_count,
        })),
    )
}
