//! Replicated Commands
//!
//! Commands stored in the replicated log and the results of applying them.

use serde::{Deserialize, Serialize};

use crate::executor::{Output, QueryError};
use crate::recorder::Keyed;

/// A command carried by the replicated log
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Command {
    /// Execute SQL on every replica
    Write(WriteCommand),
    /// Add a member to the cluster
    Join(JoinCommand),
}

impl Command {
    /// Short name used in logs and the log store
    pub fn name(&self) -> &'static str {
        match self {
            Command::Write(_) => "write",
            Command::Join(_) => "join",
        }
    }
}

/// SQL to execute, tagged with the key used to find its result
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WriteCommand {
    /// Correlation key, unique per request
    pub key: String,
    /// SQL text
    pub query: String,
}

impl WriteCommand {
    pub fn new(key: impl Into<String>, query: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            query: query.into(),
        }
    }
}

/// Request to add a node to the cluster
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinCommand {
    /// Unique node name
    pub name: String,
    /// Base URL for reaching the node
    pub connection_string: String,
}

/// Outcome of applying one write on one replica
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WriteRecord {
    pub key: String,
    pub output: Output,
    /// Engine error message if the SQL failed
    pub error: Option<String>,
}

impl WriteRecord {
    /// Build the record for `key` from an execution result
    pub fn from_result(key: impl Into<String>, result: Result<Output, QueryError>) -> Self {
        match result {
            Ok(output) => Self {
                key: key.into(),
                output,
                error: None,
            },
            Err(e) => Self {
                key: key.into(),
                output: e.output,
                error: Some(e.message),
            },
        }
    }

    /// Check whether the SQL failed
    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }
}

impl Keyed for WriteRecord {
    fn key(&self) -> &str {
        &self.key
    }
}

/// Result of applying a committed command locally
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Applied {
    Write(WriteRecord),
    Join(JoinCommand),
}

/// Generate a correlation key that is unique across the cluster
pub fn correlation_key(node: &str) -> String {
    format!("{}-{}", node, uuid::Uuid::new_v4().simple())
}
