//! Write State Machine
//!
//! Applies committed write commands to the local replica and publishes
//! the outcome to the node's recorder.
//!
//! Application must be deterministic. The database sees only the query
//! text and its own prior state, so every replica produces the same
//! output and sequence number for the same log position. The role passed
//! along is for logging only.

use std::sync::Arc;

use super::command::{WriteCommand, WriteRecord};
use crate::executor::Database;
use crate::recorder::Recorder;
use crate::state::NodeRole;

/// Applies committed writes
#[async_trait::async_trait]
pub trait StateMachine: Send + Sync {
    /// Apply one committed write. Called exactly once per log position.
    async fn apply_write(&self, command: &WriteCommand, role: NodeRole) -> WriteRecord;
}

/// State machine executing writes against a [`Database`]
pub struct WriteStateMachine {
    database: Arc<dyn Database>,
    recorder: Recorder<WriteRecord>,
}

impl WriteStateMachine {
    /// Create a new state machine
    pub fn new(database: Arc<dyn Database>, recorder: Recorder<WriteRecord>) -> Self {
        Self { database, recorder }
    }
}

#[async_trait::async_trait]
impl StateMachine for WriteStateMachine {
    async fn apply_write(&self, command: &WriteCommand, role: NodeRole) -> WriteRecord {
        tracing::debug!("[{}] Applying write command {}: {:?}", role, command.key, command.query);

        let result = self.database.execute(&command.key, role, &command.query).await;
        let record = WriteRecord::from_result(command.key.clone(), result);

        if let Some(ref error) = record.error {
            tracing::debug!("[{}] Write {} failed: {}", role, command.key, error);
        }

        if let Err(e) = self.recorder.push(record.clone()).await {
            tracing::warn!("[{}] Failed to publish result of {}: {}", role, command.key, e);
        }

        record
    }
}
