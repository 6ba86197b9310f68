//! Local Transport
//!
//! Delivers requests straight to in-process routers. Lets several nodes run
//! in one process, and lets tests cut links between them.

use std::collections::{HashMap, HashSet};

use axum::body::Body;
use axum::http::{header, Method, Request};
use axum::Router;
use bytes::Bytes;
use tokio::sync::RwLock;
use tower::ServiceExt;

use super::Transport;
use crate::error::{Error, Result};

/// Largest response body accepted from a local router
const MAX_BODY_BYTES: usize = 64 * 1024 * 1024;

/// In-process transport keyed by connection string
#[derive(Default)]
pub struct LocalTransport {
    routes: RwLock<HashMap<String, Router>>,
    disconnected: RwLock<HashSet<String>>,
    stalled: RwLock<HashSet<String>>,
}

impl LocalTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make `router` reachable at `connection_string`
    pub async fn register(&self, connection_string: &str, router: Router) {
        self.routes
            .write()
            .await
            .insert(connection_string.to_string(), router);
    }

    /// Fail every request to `connection_string` as if the node were down
    pub async fn disconnect(&self, connection_string: &str) {
        tracing::debug!("LocalTransport: disconnecting {}", connection_string);
        self.disconnected
            .write()
            .await
            .insert(connection_string.to_string());
    }

    /// Never answer requests to `connection_string`, as if the node hung
    pub async fn stall(&self, connection_string: &str) {
        tracing::debug!("LocalTransport: stalling {}", connection_string);
        self.stalled
            .write()
            .await
            .insert(connection_string.to_string());
    }

    /// Undo [`disconnect`](Self::disconnect) and [`stall`](Self::stall)
    pub async fn reconnect(&self, connection_string: &str) {
        self.disconnected.write().await.remove(connection_string);
        self.stalled.write().await.remove(connection_string);
    }
}

#[async_trait::async_trait]
impl Transport for LocalTransport {
    async fn post(&self, connection_string: &str, path: &str, body: Bytes) -> Result<Bytes> {
        let unreachable = || Error::ConnectionFailed {
            address: connection_string.to_string(),
            reason: "node unreachable".into(),
        };

        if self.disconnected.read().await.contains(connection_string) {
            return Err(unreachable());
        }
        if self.stalled.read().await.contains(connection_string) {
            return std::future::pending().await;
        }
        let router = self
            .routes
            .read()
            .await
            .get(connection_string)
            .cloned()
            .ok_or_else(unreachable)?;

        let request = Request::builder()
            .method(Method::POST)
            .uri(path)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body))
            .map_err(|e| Error::Internal(e.to_string()))?;

        let response = router
            .oneshot(request)
            .await
            .map_err(|e| Error::Internal(e.to_string()))?;

        let status = response.status();
        let body = axum::body::to_bytes(response.into_body(), MAX_BODY_BYTES)
            .await
            .map_err(|e| Error::Network(e.to_string()))?;

        if !status.is_success() {
            return Err(Error::Rejected {
                address: format!("{}{}", connection_string, path),
                status: status.as_u16(),
                message: String::from_utf8_lossy(&body).trim().to_string(),
            });
        }

        Ok(body)
    }
}
