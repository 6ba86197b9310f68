//! Leader Implementation
//!
//! Replicates the log to every member and advances the commit index once a
//! majority stores an entry.
//!
//! Each peer has at most one append in flight. Responses are handled as
//! they arrive, so a slow or silent peer never holds back the commit
//! index or the heartbeats of the others.

use std::sync::Arc;

use bytes::Bytes;

use super::node::{PeerProgress, ReplicaState, ReplicatedLog};
use super::protocol::{AppendRequest, AppendResponse, APPEND_PATH};
use crate::state::{Member, NodeRole};
use crate::error::{Error, Result};

impl ReplicatedLog {
    /// Send appends (or heartbeats) to every peer without one in flight
    pub(super) async fn replicate_once(self: &Arc<Self>) -> Result<()> {
        let mut state = self.state.lock().await;
        if state.role != NodeRole::Leader {
            return Ok(());
        }

        let last_index = state.last_index;
        let commit_index = state.commit_index;

        for peer in self.membership.peers().await {
            if state.in_flight.contains(&peer.name) {
                continue;
            }

            let next_index = state
                .progress
                .entry(peer.name.clone())
                .or_insert(PeerProgress {
                    next_index: last_index + 1,
                    match_index: 0,
                })
                .next_index;

            let entries = self
                .store
                .entries(next_index, self.config.max_batch_entries)
                .await?;

            let request = AppendRequest {
                leader_name: self.name.clone(),
                leader_connection_string: self.connection_string.clone(),
                prev_index: next_index - 1,
                entries,
                leader_commit: commit_index,
            };

            state.in_flight.insert(peer.name.clone());
            let log = Arc::clone(self);
            tokio::spawn(async move {
                let result = log.send_append(&peer, &request).await;
                log.handle_append_response(&peer, &request, result).await;
            });
        }

        Ok(())
    }

    async fn send_append(&self, peer: &Member, request: &AppendRequest) -> Result<AppendResponse> {
        let body = Bytes::from(serde_json::to_vec(request)?);
        let timeout = self.config.append_timeout();

        let response = tokio::time::timeout(
            timeout,
            self.transport.post(&peer.connection_string, APPEND_PATH, body),
        )
        .await
        .map_err(|_| Error::ConnectionTimeout(peer.connection_string.clone()))??;

        Ok(serde_json::from_slice(&response)?)
    }

    async fn handle_append_response(
        &self,
        peer: &Member,
        request: &AppendRequest,
        result: Result<AppendResponse>,
    ) {
        let mut state = self.state.lock().await;
        state.in_flight.remove(&peer.name);

        let response = match result {
            Ok(response) => response,
            Err(e) => {
                tracing::debug!("Append to {} failed: {}", peer.name, e);
                return;
            }
        };
        if state.role != NodeRole::Leader {
            return;
        }

        self.membership.record_contact(&peer.name).await;

        let last_index = state.last_index;
        let Some(progress) = state.progress.get_mut(&peer.name) else {
            return;
        };

        if response.success {
            let stored = request.prev_index + request.entries.len() as u64;
            progress.match_index = progress.match_index.max(stored);
            progress.next_index = progress.match_index + 1;
            if !request.is_heartbeat() {
                tracing::debug!("{} stored entries up to {}", peer.name, stored);
            }
        } else {
            // Follower is missing entries; back up to what it has
            progress.next_index = (response.last_index + 1).min(request.prev_index).max(1);
            tracing::debug!(
                "{} is behind (last index {}), retrying from {}",
                peer.name,
                response.last_index,
                progress.next_index
            );
        }
        let behind = progress.next_index <= last_index;

        if let Err(e) = self.advance_leader_commit(&mut state).await {
            tracing::warn!("Failed to advance commit index: {}", e);
        }

        // Entries were logged while this append was out, or the peer lags
        if behind {
            self.replicate.notify_one();
        }
    }

    /// Commit the highest index stored on a majority, then apply it
    pub(super) async fn advance_leader_commit(&self, state: &mut ReplicaState) -> Result<()> {
        let peers = self.membership.peers().await;
        let quorum = self.membership.quorum_size().await;

        let mut matched: Vec<u64> = peers
            .iter()
            .map(|peer| {
                state
                    .progress
                    .get(&peer.name)
                    .map(|p| p.match_index)
                    .unwrap_or(0)
            })
            .collect();
        matched.push(state.last_index);
        matched.sort_unstable_by(|a, b| b.cmp(a));

        let majority_index = matched.get(quorum - 1).copied().unwrap_or(0);

        if majority_index > state.commit_index {
            tracing::debug!(
                "Commit index {} -> {} ({} of {} members)",
                state.commit_index,
                majority_index,
                quorum,
                matched.len()
            );
            state.commit_index = majority_index;
            self.store.set_commit_index(majority_index).await?;
            self.apply_committed(state).await?;
        }

        Ok(())
    }
}
