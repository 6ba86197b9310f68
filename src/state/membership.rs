//! Cluster Membership Management
//!
//! Tracks the members that joined through the replicated log and when
//! this node last heard from each of them.

use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::replication::command::JoinCommand;

/// Role of a node in the cluster
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeRole {
    /// Node is the cluster leader
    Leader,
    /// Node is a follower of a live leader
    Follower,
    /// Node has lost contact with the leader
    Candidate,
}

impl std::fmt::Display for NodeRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NodeRole::Leader => write!(f, "leader"),
            NodeRole::Follower => write!(f, "follower"),
            NodeRole::Candidate => write!(f, "candidate"),
        }
    }
}

/// A cluster member, as recorded by an applied join
#[derive(Debug, Clone)]
pub struct Member {
    /// Unique node name
    pub name: String,
    /// Base URL other nodes use to reach this member
    pub connection_string: String,
    /// When this node applied the member's join
    pub joined_at: chrono::DateTime<chrono::Utc>,
    /// Last successful exchange
    pub last_contact: Option<Instant>,
}

impl Member {
    fn new(name: String, connection_string: String) -> Self {
        Self {
            name,
            connection_string,
            joined_at: chrono::Utc::now(),
            last_contact: None,
        }
    }

    /// Check if the member answered within `timeout`
    pub fn is_reachable(&self, timeout: Duration) -> bool {
        match self.last_contact {
            Some(last) => last.elapsed() < timeout,
            None => false,
        }
    }

    fn touch(&mut self) {
        self.last_contact = Some(Instant::now());
    }
}

/// Cluster membership tracker
pub struct ClusterMembership {
    /// This node's name
    node_id: String,
    /// All members, including self, ordered by name
    members: RwLock<BTreeMap<String, Member>>,
}

impl ClusterMembership {
    /// Create a tracker that already counts this node as a member
    pub fn new(node_id: String, connection_string: String) -> Self {
        let mut members = BTreeMap::new();
        let mut self_member = Member::new(node_id.clone(), connection_string);
        self_member.touch();
        members.insert(node_id.clone(), self_member);

        Self {
            node_id,
            members: RwLock::new(members),
        }
    }

    /// Add the member described by an applied join.
    ///
    /// Returns true when the member is new or its address changed.
    pub async fn add_member(&self, join: &JoinCommand) -> bool {
        let mut members = self.members.write().await;
        match members.get_mut(&join.name) {
            Some(existing) if existing.connection_string == join.connection_string => false,
            Some(existing) => {
                existing.connection_string = join.connection_string.clone();
                true
            }
            None => {
                members.insert(
                    join.name.clone(),
                    Member::new(join.name.clone(), join.connection_string.clone()),
                );
                true
            }
        }
    }

    /// All members, including self
    pub async fn members(&self) -> Vec<Member> {
        self.members.read().await.values().cloned().collect()
    }

    /// All members except self
    pub async fn peers(&self) -> Vec<Member> {
        self.members
            .read()
            .await
            .values()
            .filter(|m| m.name != self.node_id)
            .cloned()
            .collect()
    }

    /// Number of voting members
    pub async fn size(&self) -> usize {
        self.members.read().await.len()
    }

    /// Majority of the voting members
    pub async fn quorum_size(&self) -> usize {
        (self.size().await / 2) + 1
    }

    /// Record a successful exchange with a member
    pub async fn record_contact(&self, name: &str) {
        let mut members = self.members.write().await;
        match members.get_mut(name) {
            Some(member) => member.touch(),
            None => tracing::trace!("record_contact: '{}' is not a member (yet)", name),
        }
    }
}
