//! JSON HTTP API over a running [`Cluster`].
//!
//! | Method | Path | |
//! |---|---|---|
//! | GET | `/api/status` | leader, node roles, connectivity |
//! | GET | `/api/events` | recent cluster events, oldest first |
//! | POST | `/api/nodes/:id/kill` | kill one node |
//! | POST | `/api/kill/leader` | kill the current leader |
//! | POST | `/api/kill/random` | kill a random node |
//! | POST | `/api/restore` | rebuild the configured cluster |

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tower_http::cors::{Any, CorsLayer};

use crate::cluster::Cluster;
use crate::error::{Result, SwarmError};
use crate::identity::NodeId;

#[derive(Clone)]
pub struct DashboardState {
    pub cluster: Arc<Cluster>,
}

#[derive(Serialize)]
struct ControlResponse {
    success: bool,
    node_id: Option<NodeId>,
    error: Option<String>,
}

pub fn router(state: DashboardState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/api/status", get(status_handler))
        .route("/api/events", get(events_handler))
        .route("/api/nodes/:id/kill", post(kill_node_handler))
        .route("/api/kill/leader", post(kill_leader_handler))
        .route("/api/kill/random", post(kill_random_handler))
        .route("/api/restore", post(restore_handler))
        .layer(cors)
        .with_state(state)
}

pub async fn run_dashboard(addr: SocketAddr, state: DashboardState, shutdown: CancellationToken) {
    tracing::info!(addr = %addr, "Starting dashboard server");

    let listener = match tokio::net::TcpListener::bind(addr).await {
        Ok(listener) => listener,
        Err(e) => {
            tracing::error!(addr = %addr, error = %e, "Failed to bind dashboard server");
            return;
        }
    };

    if let Err(e) = axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown.cancelled_owned())
        .await
    {
        tracing::error!(error = %e, "Dashboard server failed");
    }
}

async fn status_handler(State(state): State<DashboardState>) -> impl IntoResponse {
    Json(state.cluster.status().await)
}

async fn events_handler(State(state): State<DashboardState>) -> impl IntoResponse {
    Json(state.cluster.recent_events().await)
}

async fn kill_node_handler(
    State(state): State<DashboardState>,
    Path(id): Path<NodeId>,
) -> impl IntoResponse {
    control_response(state.cluster.kill_node(id).await.map(|()| Some(id)))
}

async fn kill_leader_handler(State(state): State<DashboardState>) -> impl IntoResponse {
    control_response(state.cluster.kill_leader().await.map(Some))
}

async fn kill_random_handler(State(state): State<DashboardState>) -> impl IntoResponse {
    control_response(state.cluster.kill_random().await.map(Some))
}

async fn restore_handler(State(state): State<DashboardState>) -> impl IntoResponse {
    control_response(state.cluster.restore().await.map(|()| None))
}

fn control_response(result: Result<Option<NodeId>>) -> (StatusCode, Json<ControlResponse>) {
    match result {
        Ok(node_id) => (
            StatusCode::OK,
            Json(ControlResponse {
                success: true,
                node_id,
                error: None,
            }),
        ),
        Err(e) => {
            let status = match e {
                SwarmError::NodeNotFound(_) | SwarmError::NoLiveNodes => StatusCode::NOT_FOUND,
                _ => StatusCode::INTERNAL_SERVER_ERROR,
            };
            (
                status,
                Json(ControlResponse {
                    success: false,
                    node_id: None,
                    error: Some(e.to_string()),
                }),
            )
        }
    }
}
