//! Membership Bootstrap
//!
//! Decides at startup whether this node recovers, joins an existing
//! cluster, or founds a new one.

use super::command::{Command, JoinCommand};
use super::Consensus;
use crate::error::Result;

/// Bring this node into a cluster.
///
/// A node with a non-empty log rebuilt its state from that log and does
/// not join again. Otherwise it joins through `seed` when one is given,
/// or founds a new cluster by submitting its own join.
pub async fn bootstrap(consensus: &dyn Consensus, seed: Option<&str>) -> Result<()> {
    if !consensus.is_log_empty().await {
        tracing::info!("Recovered from log, skipping join");
        return Ok(());
    }

    match seed {
        Some(leader) => {
            tracing::info!("Attempting to join leader at {}", leader);
            consensus.join(leader).await
        }
        None => {
            tracing::info!("No seed given, founding a new cluster");
            let join = JoinCommand {
                name: consensus.name().to_string(),
                connection_string: consensus.connection_string().to_string(),
            };
            consensus.submit(Command::Join(join)).await?;
            Ok(())
        }
    }
}
