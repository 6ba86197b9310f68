//! HTTP API Server
//!
//! Client SQL endpoint plus the node-to-node endpoints for forwarding,
//! joining and replication.

use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::{
    body::Bytes,
    extract::{Json, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Router,
};
use serde::Serialize;
use tower_http::trace::TraceLayer;

use super::forward::WriteRouter;
use crate::replication::protocol::{AppendRequest, APPEND_PATH, FORWARD_PATH, JOIN_PATH};
use crate::replication::{Consensus, NodeRole, ReplicatedLog, WriteCommand, WriteRecord};
use crate::state::Member;
use crate::error::{Error, Result};

/// Shared application state
pub struct AppState {
    /// Node name
    pub node_id: String,
    /// Base URL peers use for this node
    pub connection_string: String,
    /// Replicated log
    pub consensus: Arc<ReplicatedLog>,
    /// Write routing
    pub writes: WriteRouter,
    /// Process start, for uptime
    pub started_at: Instant,
    /// Silence after which a member is reported unreachable
    pub contact_timeout: Duration,
}

/// HTTP API server
pub struct HttpServer {
    bind_address: String,
    state: Arc<AppState>,
}

impl HttpServer {
    /// Create a new HTTP server
    pub fn new(bind_address: String, state: AppState) -> Self {
        Self {
            bind_address,
            state: Arc::new(state),
        }
    }

    /// Get the state for sharing with other components
    pub fn state(&self) -> Arc<AppState> {
        Arc::clone(&self.state)
    }

    /// Build the router
    pub fn router(&self) -> Router {
        Router::new()
            // Client
            .route("/sql", post(handle_sql))
            // Cluster
            .route(FORWARD_PATH, post(handle_forward))
            .route(JOIN_PATH, post(handle_join))
            .route(APPEND_PATH, post(handle_append))
            // Status
            .route("/status", get(handle_status))
            .route("/health", get(handle_health))
            .layer(TraceLayer::new_for_http())
            .with_state(Arc::clone(&self.state))
    }

    /// Serve until `shutdown` resolves
    pub async fn start<F>(&self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let listener = tokio::net::TcpListener::bind(&self.bind_address).await?;
        tracing::info!("HTTP API listening on {}", self.bind_address);

        axum::serve(listener, self.router())
            .with_graceful_shutdown(shutdown)
            .await
            .map_err(|e| Error::Network(format!("HTTP server error: {}", e)))?;

        Ok(())
    }
}

// ============ Response Types ============

/// Status response
#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub node_id: String,
    pub connection_string: String,
    pub role: NodeRole,
    pub leader: Option<String>,
    pub commit_index: u64,
    pub last_applied: u64,
    pub log_length: u64,
    pub uptime_seconds: u64,
    pub members: Vec<MemberStatus>,
}

/// One cluster member as seen from this node
#[derive(Debug, Serialize)]
pub struct MemberStatus {
    pub name: String,
    pub connection_string: String,
    pub joined_at: chrono::DateTime<chrono::Utc>,
    /// Exchanged messages with this node recently
    pub reachable: bool,
}

impl MemberStatus {
    fn new(member: Member, reachable: bool) -> Self {
        Self {
            name: member.name,
            connection_string: member.connection_string,
            joined_at: member.joined_at,
            reachable,
        }
    }
}

/// Health response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub healthy: bool,
    pub node_id: String,
    pub role: NodeRole,
}

// ============ Handlers ============

async fn handle_sql(State(state): State<Arc<AppState>>, query: String) -> Response {
    tracing::debug!("[{}] Received query: {:?}", state.node_id, query);

    match state.writes.execute(&query).await {
        Ok(record) => record_response(&query, &record),
        Err(e) => {
            tracing::warn!("[{}] Query failed: {}", state.node_id, e);
            error_response(e)
        }
    }
}

async fn handle_forward(State(state): State<Arc<AppState>>, body: Bytes) -> Response {
    let command: WriteCommand = match serde_json::from_slice(&body) {
        Ok(command) => command,
        Err(e) => {
            return (StatusCode::BAD_REQUEST, format!("Invalid write command: {}\n", e))
                .into_response()
        }
    };
    let query = command.query.clone();

    match state.writes.accept_forwarded(command).await {
        // The forwarding node reads the result from its own replica, so a
        // committed write is a success even if its SQL failed
        Ok(record) => (StatusCode::OK, format_exec(&query, &record)).into_response(),
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, format!("{}\n", e)).into_response(),
    }
}

async fn handle_join(State(state): State<Arc<AppState>>, body: Bytes) -> Response {
    match state.consensus.handle_join(&body).await {
        Ok(()) => (StatusCode::OK, "OK\n").into_response(),
        Err(e @ Error::Serialization(_)) => {
            (StatusCode::BAD_REQUEST, format!("{}\n", e)).into_response()
        }
        Err(e) => {
            tracing::warn!("[{}] Join failed: {}", state.node_id, e);
            error_response(e)
        }
    }
}

async fn handle_append(
    State(state): State<Arc<AppState>>,
    Json(request): Json<AppendRequest>,
) -> Response {
    match state.consensus.handle_append(request).await {
        Ok(response) => Json(response).into_response(),
        Err(e) => {
            tracing::error!("[{}] Append failed: {}", state.node_id, e);
            (StatusCode::INTERNAL_SERVER_ERROR, format!("{}\n", e)).into_response()
        }
    }
}

async fn handle_status(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let status = state.consensus.status().await;
    let members = state
        .consensus
        .membership()
        .members()
        .await
        .into_iter()
        .map(|member| {
            let reachable =
                member.name == state.node_id || member.is_reachable(state.contact_timeout);
            MemberStatus::new(member, reachable)
        })
        .collect();

    Json(StatusResponse {
        node_id: state.node_id.clone(),
        connection_string: state.connection_string.clone(),
        role: status.role,
        leader: status.leader,
        commit_index: status.commit_index,
        last_applied: status.last_applied,
        log_length: status.log_length,
        uptime_seconds: state.started_at.elapsed().as_secs(),
        members,
    })
}

async fn handle_health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(HealthResponse {
        healthy: true,
        node_id: state.node_id.clone(),
        role: state.consensus.role().await,
    })
}

// ============ Helpers ============

/// Render an applied write the way clients expect it
pub fn format_exec(query: &str, record: &WriteRecord) -> String {
    match record.error {
        Some(ref error) => format!(
            "Error executing {:?} ({})\n\nSQLite error: {}",
            query, error, record.output.stderr
        ),
        None => format!(
            "SequenceNumber: {}\n{}",
            record.output.sequence_number, record.output.stdout
        ),
    }
}

fn record_response(query: &str, record: &WriteRecord) -> Response {
    let status = if record.is_error() {
        StatusCode::BAD_REQUEST
    } else {
        StatusCode::OK
    };
    (status, format_exec(query, record)).into_response()
}

/// Map a service error to a plain-text response
fn error_response(error: Error) -> Response {
    let status = match error {
        ref e if e.is_role_mismatch() => StatusCode::BAD_REQUEST,
        Error::UpstreamUnavailable(_) | Error::RecordNotFound(_) => StatusCode::BAD_GATEWAY,
        Error::ShuttingDown => StatusCode::SERVICE_UNAVAILABLE,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (status, format!("{}\n", error)).into_response()
}
