//! Administrative HTTP endpoints: cluster join, node status, forced
//! snapshots. Unauthenticated by design; deployments are expected to
//! front this with network-level isolation.

use std::sync::Arc;

use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;
use tracing::info;

use crate::engine::ReplicatedStore;

/// Body of `POST /join`.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct JoinRequest {
    pub node_id: String,
    pub addr: String,
}

/// Body of `GET /status`. `leading` carries the leader's address and is
/// omitted on the leader itself (and while no leader is known).
#[derive(Serialize, Deserialize, Debug)]
pub struct StatusResponse {
    pub node_id: String,
    pub addr: String,
    pub leader: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub leading: Option<String>,
}

#[derive(Clone)]
pub struct ApiState {
    pub engine: Arc<ReplicatedStore>,
    /// Operator-facing node identifier.
    pub node_id: String,
    /// This node's raft transport address, reported in `/status`.
    pub addr: String,
}

pub fn router(state: ApiState) -> Router {
    Router::new()
        .route("/join", post(handle_join))
        .route("/status", get(handle_status))
        .route("/snapshot", post(handle_snapshot))
        .with_state(state)
}

/// Serve the admin API until the task is aborted.
pub async fn serve(listener: TcpListener, state: ApiState) -> std::io::Result<()> {
    info!(addr = %listener.local_addr()?, "admin API listening");
    axum::serve(listener, router(state)).await
}

async fn handle_join(
    State(state): State<ApiState>,
    payload: Result<Json<JoinRequest>, JsonRejection>,
) -> (StatusCode, String) {
    let Ok(Json(req)) = payload else {
        return (StatusCode::BAD_REQUEST, "Invalid request".to_string());
    };

    match state.engine.join(&req.node_id, &req.addr).await {
        Ok(()) => (StatusCode::OK, String::new()),
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
    }
}

async fn handle_status(State(state): State<ApiState>) -> Json<StatusResponse> {
    let leader = state.engine.is_leader();
    let leading = if leader {
        None
    } else {
        Some(state.engine.leader_addr().await).filter(|addr| !addr.is_empty())
    };

    Json(StatusResponse {
        node_id: state.node_id.clone(),
        addr: state.addr.clone(),
        leader,
        leading,
    })
}

async fn handle_snapshot(State(state): State<ApiState>) -> (StatusCode, String) {
    if !state.engine.is_leader() {
        let leader_addr = state.engine.leader_addr().await;
        return (
            StatusCode::BAD_REQUEST,
            format!("Not the leader, try: {}", leader_addr),
        );
    }

    match state.engine.take_snapshot().await {
        Ok(()) => (
            StatusCode::OK,
            "Snapshot created successfully".to_string(),
        ),
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
    }
}
