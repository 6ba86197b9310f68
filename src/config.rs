//! WolfSQL Configuration
//!
//! This module provides configuration structures for a WolfSQL node.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::replication::ReplicationConfig;

/// Main WolfSQL configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WolfSqlConfig {
    /// Node-specific configuration
    pub node: NodeConfig,

    /// Cluster configuration
    #[serde(default)]
    pub cluster: ClusterConfig,

    /// Event recorder configuration
    #[serde(default)]
    pub recorder: RecorderConfig,

    /// API configuration
    #[serde(default)]
    pub api: ApiConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Node-specific configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeConfig {
    /// Unique node name
    pub id: String,

    /// Address the HTTP server binds
    pub bind_address: String,

    /// Address other nodes use to reach this one
    #[serde(default)]
    pub advertise_address: Option<String>,

    /// Data directory for the log and the database replica
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
}

/// Cluster configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterConfig {
    /// Connection string of a node to join through (None founds a cluster)
    #[serde(default)]
    pub join: Option<String>,

    /// Heartbeat interval in milliseconds
    #[serde(default = "default_heartbeat_interval_ms")]
    pub heartbeat_interval_ms: u64,

    /// Leader silence before a follower reports candidate, in milliseconds
    #[serde(default = "default_election_timeout_ms")]
    pub election_timeout_ms: u64,

    /// How long a submitted write may wait for commit, in milliseconds
    #[serde(default = "default_replication_timeout_ms")]
    pub replication_timeout_ms: u64,

    /// Maximum entries per replication batch
    #[serde(default = "default_max_batch_entries")]
    pub max_batch_entries: usize,
}

/// Event recorder configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecorderConfig {
    /// Records remembered for late listeners
    #[serde(default = "default_recent_capacity")]
    pub recent_capacity: usize,

    /// Records a forwarded write waits through before failing
    #[serde(default = "default_forward_wait_records")]
    pub forward_wait_records: usize,

    /// Wait after a failed forward, in milliseconds
    #[serde(default = "default_forward_grace_ms")]
    pub forward_grace_ms: u64,
}

/// API configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    /// Timeout for requests to other nodes, in milliseconds
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
}

// Default value functions

fn default_data_dir() -> PathBuf {
    PathBuf::from("/var/lib/wolfsql")
}

fn default_heartbeat_interval_ms() -> u64 {
    50
}

fn default_election_timeout_ms() -> u64 {
    1000
}

fn default_replication_timeout_ms() -> u64 {
    5000
}

fn default_max_batch_entries() -> usize {
    500
}

fn default_recent_capacity() -> usize {
    16
}

fn default_forward_wait_records() -> usize {
    8
}

fn default_forward_grace_ms() -> u64 {
    1000
}

fn default_request_timeout_ms() -> u64 {
    10_000
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            join: None,
            heartbeat_interval_ms: default_heartbeat_interval_ms(),
            election_timeout_ms: default_election_timeout_ms(),
            replication_timeout_ms: default_replication_timeout_ms(),
            max_batch_entries: default_max_batch_entries(),
        }
    }
}

impl Default for RecorderConfig {
    fn default() -> Self {
        Self {
            recent_capacity: default_recent_capacity(),
            forward_wait_records: default_forward_wait_records(),
            forward_grace_ms: default_forward_grace_ms(),
        }
    }
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            request_timeout_ms: default_request_timeout_ms(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl WolfSqlConfig {
    /// Configuration for `id` serving on `bind_address`, everything else default
    pub fn for_node(
        id: impl Into<String>,
        bind_address: impl Into<String>,
        data_dir: PathBuf,
    ) -> Self {
        Self {
            node: NodeConfig {
                id: id.into(),
                bind_address: bind_address.into(),
                advertise_address: None,
                data_dir,
            },
            cluster: ClusterConfig::default(),
            recorder: RecorderConfig::default(),
            api: ApiConfig::default(),
            logging: LoggingConfig::default(),
        }
    }

    /// Load configuration from a TOML file
    pub fn from_file(path: &std::path::Path) -> crate::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: WolfSqlConfig = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a TOML string
    pub fn from_str(content: &str) -> crate::Result<Self> {
        let config: WolfSqlConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> crate::Result<()> {
        if self.node.id.is_empty() {
            return Err(crate::Error::Config("node.id cannot be empty".into()));
        }

        if self.node.bind_address.is_empty() {
            return Err(crate::Error::Config("node.bind_address cannot be empty".into()));
        }

        if self.cluster.heartbeat_interval_ms == 0 {
            return Err(crate::Error::Config(
                "cluster.heartbeat_interval_ms must be positive".into(),
            ));
        }

        if self.cluster.election_timeout_ms <= self.cluster.heartbeat_interval_ms {
            return Err(crate::Error::Config(
                "cluster.election_timeout_ms must exceed cluster.heartbeat_interval_ms".into(),
            ));
        }

        if self.cluster.max_batch_entries == 0 {
            return Err(crate::Error::Config(
                "cluster.max_batch_entries must be positive".into(),
            ));
        }

        if self.recorder.forward_wait_records == 0 {
            return Err(crate::Error::Config(
                "recorder.forward_wait_records must be positive".into(),
            ));
        }

        Ok(())
    }

    /// Get the advertised address (or bind address if not set)
    pub fn advertise_address(&self) -> &str {
        self.node
            .advertise_address
            .as_deref()
            .unwrap_or(&self.node.bind_address)
    }

    /// Base URL other nodes use to reach this node
    pub fn connection_string(&self) -> String {
        let address = self.advertise_address();
        if address.starts_with("http://") || address.starts_with("https://") {
            address.to_string()
        } else {
            format!("http://{}", address)
        }
    }

    /// Get the database replica path
    pub fn database_path(&self) -> PathBuf {
        self.node.data_dir.join("storage.sql")
    }

    /// Get the replicated log directory
    pub fn raft_dir(&self) -> PathBuf {
        self.node.data_dir.join("raft")
    }

    /// Replication settings
    pub fn replication(&self) -> ReplicationConfig {
        ReplicationConfig {
            max_batch_entries: self.cluster.max_batch_entries,
            heartbeat_interval_ms: self.cluster.heartbeat_interval_ms,
            election_timeout_ms: self.cluster.election_timeout_ms,
            replication_timeout_ms: self.cluster.replication_timeout_ms,
        }
    }

    /// Get forward grace period as Duration
    pub fn forward_grace(&self) -> Duration {
        Duration::from_millis(self.recorder.forward_grace_ms)
    }

    /// Get outbound request timeout as Duration
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.api.request_timeout_ms)
    }
}
