//! Follower Implementation
//!
//! Stores entries sent by the leader and applies them once committed.

use std::time::Instant;

use super::node::{LeaderInfo, ReplicatedLog};
use super::protocol::{AppendRequest, AppendResponse};
use crate::state::NodeRole;
use crate::error::{Error, Result};

impl ReplicatedLog {
    /// Handle an append (or heartbeat) from the leader
    pub async fn handle_append(&self, request: AppendRequest) -> Result<AppendResponse> {
        let mut state = self.state.lock().await;
        state.last_contact = Instant::now();

        match state.role {
            NodeRole::Leader => tracing::warn!(
                "Stepping down: {} is replicating to this node",
                request.leader_name
            ),
            NodeRole::Candidate => tracing::info!("Leader {} is back", request.leader_name),
            NodeRole::Follower => {}
        }
        state.role = NodeRole::Follower;

        let leader_changed = state
            .leader
            .as_ref()
            .map(|l| l.name != request.leader_name)
            .unwrap_or(true);
        if leader_changed {
            tracing::info!(
                "Leader changed to {} ({})",
                request.leader_name,
                request.leader_connection_string
            );
            state.leader = Some(LeaderInfo {
                name: request.leader_name.clone(),
                connection_string: request.leader_connection_string.clone(),
            });
        }
        self.membership.record_contact(&request.leader_name).await;

        if request.prev_index > state.last_index {
            return Ok(AppendResponse {
                success: false,
                last_index: state.last_index,
            });
        }

        for entry in request.entries {
            // Stored entries never change
            if entry.index <= state.last_index {
                continue;
            }
            if entry.index != state.last_index + 1 {
                return Err(Error::LogCorrupted {
                    index: entry.index,
                    reason: format!("gap after index {}", state.last_index),
                });
            }
            self.store.append(entry.index, &entry.command).await?;
            state.last_index = entry.index;
        }

        let commit_index = request.leader_commit.min(state.last_index);
        if commit_index > state.commit_index {
            state.commit_index = commit_index;
            self.store.set_commit_index(commit_index).await?;
            self.apply_committed(&mut state).await?;
        }

        Ok(AppendResponse {
            success: true,
            last_index: state.last_index,
        })
    }

    /// Report candidate once the leader has been silent too long
    pub(super) async fn check_leader_contact(&self) {
        let mut state = self.state.lock().await;
        let silence = state.last_contact.elapsed();

        if state.role == NodeRole::Follower && silence > self.config.election_timeout() {
            match state.leader.take() {
                Some(leader) => tracing::warn!(
                    "No contact from leader {} for {:?}, becoming candidate",
                    leader.name,
                    silence
                ),
                None => tracing::warn!("No leader contact for {:?}, becoming candidate", silence),
            }
            state.role = NodeRole::Candidate;
        }
    }
}
