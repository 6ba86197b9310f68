//! Replication Module
//!
//! Orders writes through a leader-based replicated log and applies them
//! to every replica in the same order.

pub mod command;
pub mod protocol;
mod machine;
mod node;
mod leader;
mod follower;
mod bootstrap;

use std::time::Duration;

pub use command::{Applied, Command, JoinCommand, WriteCommand, WriteRecord};
pub use machine::{StateMachine, WriteStateMachine};
pub use node::{ReplicaStatus, ReplicatedLog};
pub use bootstrap::bootstrap;
pub use crate::state::NodeRole;

use crate::error::Result;

/// Configuration for replication
#[derive(Debug, Clone)]
pub struct ReplicationConfig {
    /// Maximum entries per append request
    pub max_batch_entries: usize,
    /// Heartbeat interval in milliseconds
    pub heartbeat_interval_ms: u64,
    /// Leader silence after which a follower reports candidate
    pub election_timeout_ms: u64,
    /// How long a submission may wait for commit
    pub replication_timeout_ms: u64,
}

impl ReplicationConfig {
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }

    pub fn election_timeout(&self) -> Duration {
        Duration::from_millis(self.election_timeout_ms)
    }

    /// How long the leader waits for one append to be answered.
    ///
    /// A few heartbeats, and always well inside the follower's silence
    /// threshold.
    pub fn append_timeout(&self) -> Duration {
        (self.heartbeat_interval() * 4).min(self.election_timeout() / 2)
    }

    pub fn replication_timeout(&self) -> Duration {
        Duration::from_millis(self.replication_timeout_ms)
    }
}

impl Default for ReplicationConfig {
    fn default() -> Self {
        Self {
            max_batch_entries: 500,
            heartbeat_interval_ms: 50,
            election_timeout_ms: 1000,
            replication_timeout_ms: 5000,
        }
    }
}

/// What the rest of the node needs from the consensus log
#[async_trait::async_trait]
pub trait Consensus: Send + Sync {
    /// This node's name
    fn name(&self) -> &str;

    /// Base URL other nodes use to reach this node
    fn connection_string(&self) -> &str;

    /// Submit a command and wait until it is committed and applied locally.
    /// Fails on a node that is not the leader.
    async fn submit(&self, command: Command) -> Result<Applied>;

    /// Current role
    async fn role(&self) -> NodeRole;

    /// Connection string of the current leader
    async fn leader_connection_string(&self) -> Result<String>;

    /// Check if nothing was ever logged on this node
    async fn is_log_empty(&self) -> bool;

    /// Ask the leader at `leader` to add this node to the cluster
    async fn join(&self, leader: &str) -> Result<()>;

    /// Handle a raw join request from a peer
    async fn handle_join(&self, payload: &[u8]) -> Result<()>;
}
