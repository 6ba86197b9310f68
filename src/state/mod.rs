//! State Management Module
//!
//! Durable log storage and cluster membership for the replicated log.

mod log_store;
mod membership;

pub use log_store::LogStore;
pub use membership::{ClusterMembership, Member, NodeRole};
