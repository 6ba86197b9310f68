//! Network Module
//!
//! Node-to-node requests. Every inter-node exchange is a POST of a body to
//! a path on a peer identified by its connection string.

mod client;
mod local;

pub use client::HttpTransport;
pub use local::LocalTransport;

use bytes::Bytes;

use crate::error::Result;

/// Sends requests to other nodes
#[async_trait::async_trait]
pub trait Transport: Send + Sync {
    /// POST `body` to `path` on the node at `connection_string` and return
    /// the response body. Non-2xx responses are errors.
    async fn post(&self, connection_string: &str, path: &str, body: Bytes) -> Result<Bytes>;
}
