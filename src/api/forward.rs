//! Write Forwarding
//!
//! Lets any node accept a write. The leader submits it to the log itself.
//! A follower hands it to the leader and then waits for the write to reach
//! its own replica through normal replication, so the caller gets the same
//! answer it would have gotten from the leader, even if the leader changes
//! mid-request.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;

use crate::network::Transport;
use crate::recorder::Recorder;
use crate::replication::command::correlation_key;
use crate::replication::protocol::FORWARD_PATH;
use crate::replication::{Applied, Command, Consensus, NodeRole, WriteCommand, WriteRecord};
use crate::error::{Error, Result};

/// Routes writes to the leader
pub struct WriteRouter {
    name: String,
    consensus: Arc<dyn Consensus>,
    recorder: Recorder<WriteRecord>,
    transport: Arc<dyn Transport>,
    /// Records a forwarded write may wait through before giving up
    forward_wait_records: usize,
    /// Wall-clock wait after a failed forward
    forward_grace: Duration,
}

impl WriteRouter {
    /// Create a new router
    pub fn new(
        name: String,
        consensus: Arc<dyn Consensus>,
        recorder: Recorder<WriteRecord>,
        transport: Arc<dyn Transport>,
        forward_wait_records: usize,
        forward_grace: Duration,
    ) -> Self {
        Self {
            name,
            consensus,
            recorder,
            transport,
            forward_wait_records,
            forward_grace,
        }
    }

    /// Execute a write on the cluster and return this node's record of it
    pub async fn execute(&self, query: &str) -> Result<Arc<WriteRecord>> {
        let command = WriteCommand::new(correlation_key(&self.name), query);

        match self.consensus.role().await {
            NodeRole::Leader => self.submit(command).await,
            NodeRole::Follower => self.forward(command).await,
            role => Err(Error::InvalidState(role.to_string())),
        }
    }

    /// Accept a write forwarded by a follower
    pub async fn accept_forwarded(&self, command: WriteCommand) -> Result<Arc<WriteRecord>> {
        let role = self.consensus.role().await;
        if role != NodeRole::Leader {
            tracing::debug!("[{}] Refusing forwarded write {}", role, command.key);
            return Err(Error::InvalidState(format!("{} is not the leader", role)));
        }

        tracing::debug!("[leader] Accepting forwarded write {}", command.key);
        self.submit(command).await
    }

    async fn submit(&self, command: WriteCommand) -> Result<Arc<WriteRecord>> {
        match self.consensus.submit(Command::Write(command)).await? {
            Applied::Write(record) => Ok(Arc::new(record)),
            Applied::Join(join) => Err(Error::Internal(format!(
                "write resolved to join of {}",
                join.name
            ))),
        }
    }

    async fn forward(&self, command: WriteCommand) -> Result<Arc<WriteRecord>> {
        let leader = self.consensus.leader_connection_string().await?;
        let body = Bytes::from(serde_json::to_vec(&command)?);
        tracing::debug!("[follower] Forwarding {} to {}", command.key, leader);

        // Registered before the send starts, so a fast commit is still seen
        let wait = self.recorder.listen(&command.key, self.forward_wait_records);
        tokio::pin!(wait);
        let send = self.transport.post(&leader, FORWARD_PATH, body);

        let sent = tokio::select! {
            biased;
            record = &mut wait => return record.map_err(|e| upstream(&leader, e)),
            sent = send => sent,
        };

        match sent {
            Ok(_) => wait.await.map_err(|e| upstream(&leader, e)),
            Err(send_error) => {
                tracing::warn!(
                    "[follower] Forwarding {} to {} failed: {}",
                    command.key,
                    leader,
                    send_error
                );
                // The leader may have logged it anyway
                match tokio::time::timeout(self.forward_grace, &mut wait).await {
                    Ok(Ok(record)) => Ok(record),
                    Ok(Err(e)) => Err(upstream(&leader, e)),
                    Err(_) => Err(upstream(&leader, send_error)),
                }
            }
        }
    }
}

fn upstream(leader: &str, cause: Error) -> Error {
    match cause {
        Error::ShuttingDown => Error::ShuttingDown,
        cause => Error::UpstreamUnavailable(format!("leader {}: {}", leader, cause)),
    }
}
