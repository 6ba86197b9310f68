//! Replication Protocol
//!
//! Messages exchanged between the leader and followers over HTTP as JSON.

use serde::{Deserialize, Serialize};

use super::command::Command;

/// Path followers expose for log replication
pub const APPEND_PATH: &str = "/raft/append";
/// Path the leader exposes for membership requests
pub const JOIN_PATH: &str = "/join";
/// Path the leader exposes for forwarded writes
pub const FORWARD_PATH: &str = "/fwd";

/// A log entry with its 1-based position
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntry {
    pub index: u64,
    pub command: Command,
}

/// Leader to follower: append entries (empty for a heartbeat)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppendRequest {
    /// Sending leader's name
    pub leader_name: String,
    /// Sending leader's connection string
    pub leader_connection_string: String,
    /// Index of the entry immediately preceding `entries`
    pub prev_index: u64,
    /// Entries to store, in order
    pub entries: Vec<LogEntry>,
    /// Leader's commit index
    pub leader_commit: u64,
}

impl AppendRequest {
    /// Check if this is a heartbeat (no entries)
    pub fn is_heartbeat(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Follower to leader: append outcome
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppendResponse {
    /// Whether the entries were stored
    pub success: bool,
    /// Follower's last log index after handling the request
    pub last_index: u64,
}
