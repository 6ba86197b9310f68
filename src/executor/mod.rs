//! Database Executor Module
//!
//! Executes replicated SQL against the node's local database replica.

mod sqlite;

pub use sqlite::SqliteExecutor;

use serde::{Deserialize, Serialize};

use crate::state::NodeRole;

/// Result of executing one query on one replica
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Output {
    /// Rendered result rows
    pub stdout: String,
    /// Engine error text, empty on success
    pub stderr: String,
    /// Position of this execution in the replica's applied history
    pub sequence_number: u64,
}

/// The engine rejected a query. Carries the output produced so far.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message}")]
pub struct QueryError {
    pub message: String,
    pub output: Output,
}

/// A local database replica.
///
/// Implementations must be deterministic: the same query against the same
/// prior state yields the same output and sequence number on every node.
#[async_trait::async_trait]
pub trait Database: Send + Sync {
    /// Execute `query`. `role` is only used for diagnostics.
    async fn execute(
        &self,
        key: &str,
        role: NodeRole,
        query: &str,
    ) -> std::result::Result<Output, QueryError>;
}
