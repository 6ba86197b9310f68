//! Node
//!
//! One WolfSQL node: the replicated log, its database replica, the event
//! recorder and the HTTP API, built once per process and torn down at
//! shutdown.

use std::future::Future;
use std::sync::Arc;
use std::time::Instant;

use axum::Router;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

use crate::api::{AppState, HttpServer, WriteRouter};
use crate::config::WolfSqlConfig;
use crate::executor::SqliteExecutor;
use crate::network::Transport;
use crate::recorder::Recorder;
use crate::replication::{bootstrap, Consensus, ReplicatedLog, WriteRecord, WriteStateMachine};
use crate::state::{ClusterMembership, LogStore};
use crate::error::Result;

/// A running WolfSQL node
pub struct Node {
    config: WolfSqlConfig,
    consensus: Arc<ReplicatedLog>,
    recorder: Recorder<WriteRecord>,
    server: HttpServer,
    replication: Mutex<Option<JoinHandle<()>>>,
}

impl Node {
    /// Build the node from its configuration.
    ///
    /// Recreates the database replica and replays the persisted log into it.
    pub async fn new(config: WolfSqlConfig, transport: Arc<dyn Transport>) -> Result<Self> {
        let node_id = config.node.id.clone();
        let connection_string = config.connection_string();
        tracing::info!("Starting node {} at {}", node_id, connection_string);

        let recorder = Recorder::new(config.recorder.recent_capacity);
        let database = Arc::new(SqliteExecutor::new(&config.database_path())?);
        let machine = Arc::new(WriteStateMachine::new(database, recorder.clone()));
        let store = LogStore::open(config.raft_dir())?;
        let membership = Arc::new(ClusterMembership::new(
            node_id.clone(),
            connection_string.clone(),
        ));

        let consensus = ReplicatedLog::open(
            node_id.clone(),
            connection_string.clone(),
            config.replication(),
            store,
            machine,
            membership,
            Arc::clone(&transport),
        )
        .await?;

        let writes = WriteRouter::new(
            node_id.clone(),
            Arc::clone(&consensus) as Arc<dyn Consensus>,
            recorder.clone(),
            transport,
            config.recorder.forward_wait_records,
            config.forward_grace(),
        );

        let server = HttpServer::new(
            config.node.bind_address.clone(),
            AppState {
                node_id,
                connection_string,
                consensus: Arc::clone(&consensus),
                writes,
                started_at: Instant::now(),
                contact_timeout: config.replication().election_timeout(),
            },
        );

        Ok(Self {
            config,
            consensus,
            recorder,
            server,
            replication: Mutex::new(None),
        })
    }

    /// Node name
    pub fn id(&self) -> &str {
        &self.config.node.id
    }

    /// Base URL other nodes use to reach this node
    pub fn connection_string(&self) -> &str {
        self.consensus.connection_string()
    }

    /// The node's replicated log
    pub fn consensus(&self) -> Arc<ReplicatedLog> {
        Arc::clone(&self.consensus)
    }

    /// Records of the writes applied to this node's replica
    pub fn recorder(&self) -> Recorder<WriteRecord> {
        self.recorder.clone()
    }

    /// HTTP routes, for serving or for in-process transports
    pub fn router(&self) -> Router {
        self.server.router()
    }

    /// Start the replication loop
    pub async fn start(&self) {
        let mut replication = self.replication.lock().await;
        if replication.is_none() {
            *replication = Some(tokio::spawn(Arc::clone(&self.consensus).run()));
        }
    }

    /// Recover, join or found a cluster
    pub async fn init(&self) -> Result<()> {
        bootstrap(self.consensus.as_ref(), self.config.cluster.join.as_deref()).await
    }

    /// Serve HTTP until `shutdown` resolves
    pub async fn serve<F>(&self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.server.start(shutdown).await
    }

    /// Stop replication and wait for the loop to exit
    pub async fn shutdown(&self) {
        tracing::info!("Shutting down node {}", self.id());
        self.consensus.stop();
        if let Some(handle) = self.replication.lock().await.take() {
            if let Err(e) = handle.await {
                tracing::warn!("Replication task ended abnormally: {}", e);
            }
        }
    }
}
