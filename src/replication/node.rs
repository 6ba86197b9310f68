//! Replicated Log Node
//!
//! The replica's view of the command log: role, known leader, commit
//! progress, and the in-order apply loop shared by leader and follower.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use bytes::Bytes;
use serde::Serialize;
use tokio::sync::{oneshot, Mutex, Notify};
use tokio::time::{interval, MissedTickBehavior};

use super::command::{Applied, Command, JoinCommand};
use super::protocol::JOIN_PATH;
use super::{Consensus, ReplicationConfig, StateMachine};
use crate::network::Transport;
use crate::state::{ClusterMembership, LogStore, NodeRole};
use crate::error::{Error, Result};

/// Name and address of the known leader
#[derive(Debug, Clone)]
pub(super) struct LeaderInfo {
    pub name: String,
    pub connection_string: String,
}

/// Replication progress of one follower, as seen by the leader
#[derive(Debug, Clone, Copy)]
pub(super) struct PeerProgress {
    /// Next index to send
    pub next_index: u64,
    /// Highest index known to be stored on the follower
    pub match_index: u64,
}

/// Mutable replica state, guarded by a single lock.
///
/// Committed entries are applied while this lock is held, so application
/// is strictly sequential.
pub(super) struct ReplicaState {
    pub role: NodeRole,
    pub leader: Option<LeaderInfo>,
    pub last_index: u64,
    pub commit_index: u64,
    pub last_applied: u64,
    /// Last append received from the leader
    pub last_contact: Instant,
    /// Submissions waiting for their entry to be applied, by log index
    pub pending: HashMap<u64, oneshot::Sender<Applied>>,
    /// Follower progress (leader only)
    pub progress: HashMap<String, PeerProgress>,
    /// Peers with an append in flight (leader only)
    pub in_flight: HashSet<String>,
}

/// Snapshot of the replica for status reporting
#[derive(Debug, Clone, Serialize)]
pub struct ReplicaStatus {
    pub role: NodeRole,
    pub leader: Option<String>,
    pub commit_index: u64,
    pub last_applied: u64,
    pub log_length: u64,
}

/// Leader-based replicated command log
pub struct ReplicatedLog {
    pub(super) name: String,
    pub(super) connection_string: String,
    pub(super) config: ReplicationConfig,
    pub(super) store: LogStore,
    pub(super) machine: Arc<dyn StateMachine>,
    pub(super) membership: Arc<ClusterMembership>,
    pub(super) transport: Arc<dyn Transport>,
    pub(super) state: Mutex<ReplicaState>,
    /// Wakes the replication loop when new entries are appended
    pub(super) replicate: Notify,
    pub(super) shutdown: AtomicBool,
}

impl ReplicatedLog {
    /// Open the log and replay every committed entry into the state machine.
    ///
    /// A node whose own join is the first entry founded the cluster and
    /// resumes as leader. Any other node waits for the leader to contact it.
    #[allow(clippy::too_many_arguments)]
    pub async fn open(
        name: String,
        connection_string: String,
        config: ReplicationConfig,
        store: LogStore,
        machine: Arc<dyn StateMachine>,
        membership: Arc<ClusterMembership>,
        transport: Arc<dyn Transport>,
    ) -> Result<Arc<Self>> {
        let last_index = store.last_index().await?;
        let commit_index = store.commit_index().await?.min(last_index);

        let founder = matches!(
            store.entry(1).await?,
            Some(Command::Join(ref join)) if join.name == name
        );
        let (role, leader) = if founder {
            (
                NodeRole::Leader,
                Some(LeaderInfo {
                    name: name.clone(),
                    connection_string: connection_string.clone(),
                }),
            )
        } else {
            (NodeRole::Follower, None)
        };

        let log = Arc::new(Self {
            name,
            connection_string,
            config,
            store,
            machine,
            membership,
            transport,
            state: Mutex::new(ReplicaState {
                role,
                leader,
                last_index,
                commit_index,
                last_applied: 0,
                last_contact: Instant::now(),
                pending: HashMap::new(),
                progress: HashMap::new(),
                in_flight: HashSet::new(),
            }),
            replicate: Notify::new(),
            shutdown: AtomicBool::new(false),
        });

        if last_index > 0 {
            let mut state = log.state.lock().await;
            log.apply_committed(&mut state).await?;
            tracing::info!(
                "Recovered log: {} entries, {} replayed, role {}",
                last_index,
                state.last_applied,
                state.role
            );
        }

        Ok(log)
    }

    /// Run replication until [`stop`](Self::stop) is called.
    ///
    /// As leader, sends appends to every peer on each heartbeat and whenever
    /// new entries are logged. Otherwise watches for leader silence.
    pub async fn run(self: Arc<Self>) {
        let mut ticker = interval(self.config.heartbeat_interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                _ = self.replicate.notified() => {}
            }

            if self.shutdown.load(Ordering::SeqCst) {
                break;
            }

            let role = self.state.lock().await.role;
            if role == NodeRole::Leader {
                if let Err(e) = self.replicate_once().await {
                    tracing::warn!("Replication error: {}", e);
                }
            } else {
                self.check_leader_contact().await;
            }
        }

        tracing::info!("Replication loop stopped");
    }

    /// Stop the replication loop
    pub fn stop(&self) {
        self.shutdown.store(true, Ordering::SeqCst);
        self.replicate.notify_one();
    }

    /// Current replica status
    pub async fn status(&self) -> ReplicaStatus {
        let state = self.state.lock().await;
        ReplicaStatus {
            role: state.role,
            leader: state.leader.as_ref().map(|l| l.name.clone()),
            commit_index: state.commit_index,
            last_applied: state.last_applied,
            log_length: state.last_index,
        }
    }

    /// Cluster membership as built from applied joins
    pub fn membership(&self) -> &Arc<ClusterMembership> {
        &self.membership
    }

    /// Apply every committed but unapplied entry, in log order
    pub(super) async fn apply_committed(&self, state: &mut ReplicaState) -> Result<()> {
        while state.last_applied < state.commit_index {
            let remaining = (state.commit_index - state.last_applied) as usize;
            let batch = self
                .store
                .entries(state.last_applied + 1, remaining.min(self.config.max_batch_entries))
                .await?;

            if batch.is_empty() {
                return Err(Error::LogCorrupted {
                    index: state.last_applied + 1,
                    reason: "committed entry missing from log".into(),
                });
            }

            for entry in batch {
                if entry.index != state.last_applied + 1 {
                    return Err(Error::LogCorrupted {
                        index: state.last_applied + 1,
                        reason: format!("found entry {} instead", entry.index),
                    });
                }

                let applied = match entry.command {
                    Command::Write(write) => {
                        Applied::Write(self.machine.apply_write(&write, state.role).await)
                    }
                    Command::Join(join) => {
                        if self.membership.add_member(&join).await {
                            tracing::info!(
                                "[{}] Peer joined: {} ({})",
                                state.role,
                                join.name,
                                join.connection_string
                            );
                        }
                        Applied::Join(join)
                    }
                };

                state.last_applied = entry.index;
                if let Some(waiter) = state.pending.remove(&entry.index) {
                    let _ = waiter.send(applied);
                }
            }
        }

        Ok(())
    }

    fn leader_error(state: &ReplicaState) -> Error {
        match state.leader {
            Some(ref leader) => Error::NotLeader(leader.name.clone()),
            None => Error::NoLeader,
        }
    }
}

#[async_trait::async_trait]
impl Consensus for ReplicatedLog {
    fn name(&self) -> &str {
        &self.name
    }

    fn connection_string(&self) -> &str {
        &self.connection_string
    }

    async fn submit(&self, command: Command) -> Result<Applied> {
        let (index, rx) = {
            let mut state = self.state.lock().await;

            if state.last_index == 0 {
                if let Command::Join(ref join) = command {
                    if join.name == self.name {
                        tracing::info!("Initializing new cluster as {}", self.name);
                        state.role = NodeRole::Leader;
                        state.leader = Some(LeaderInfo {
                            name: self.name.clone(),
                            connection_string: self.connection_string.clone(),
                        });
                    }
                }
            }

            if state.role != NodeRole::Leader {
                return Err(Self::leader_error(&state));
            }

            let index = state.last_index + 1;
            self.store.append(index, &command).await?;
            state.last_index = index;
            tracing::debug!("Logged {} command at index {}", command.name(), index);

            let (tx, rx) = oneshot::channel();
            state.pending.insert(index, tx);

            // A single-node cluster commits right away
            self.advance_leader_commit(&mut state).await?;
            (index, rx)
        };

        self.replicate.notify_one();

        match tokio::time::timeout(self.config.replication_timeout(), rx).await {
            Ok(Ok(applied)) => Ok(applied),
            Ok(Err(_)) => Err(Error::ShuttingDown),
            Err(_) => {
                self.state.lock().await.pending.remove(&index);
                Err(Error::Replication(format!(
                    "entry {} not committed within {:?}",
                    index,
                    self.config.replication_timeout()
                )))
            }
        }
    }

    async fn role(&self) -> NodeRole {
        self.state.lock().await.role
    }

    async fn leader_connection_string(&self) -> Result<String> {
        let state = self.state.lock().await;
        state
            .leader
            .as_ref()
            .map(|l| l.connection_string.clone())
            .ok_or(Error::NoLeader)
    }

    async fn is_log_empty(&self) -> bool {
        self.state.lock().await.last_index == 0
    }

    async fn join(&self, leader: &str) -> Result<()> {
        let request = JoinCommand {
            name: self.name.clone(),
            connection_string: self.connection_string.clone(),
        };
        let body = Bytes::from(serde_json::to_vec(&request)?);

        self.transport
            .post(leader, JOIN_PATH, body)
            .await
            .map_err(|e| Error::Join(format!("{}: {}", leader, e)))?;

        tracing::info!("Joined cluster via {}", leader);
        Ok(())
    }

    async fn handle_join(&self, payload: &[u8]) -> Result<()> {
        let join: JoinCommand = serde_json::from_slice(payload)?;
        tracing::info!("Join request from {} ({})", join.name, join.connection_string);
        self.submit(Command::Join(join)).await?;
        Ok(())
    }
}
