//! WolfSQL - Replicated SQL Service
//!
//! A cluster of nodes agrees on an ordered log of SQL writes through a
//! leader-based replicated log, applies them identically to a local SQLite
//! replica on every node, and answers the client that sent the write even
//! when that client talked to a follower.
//!
//! # Architecture
//!
//! - [`recorder`]: per-node publish/wait mechanism matching applied writes
//!   to the requests waiting for them
//! - [`replication`]: the replicated log, the write state machine and
//!   cluster bootstrap
//! - [`executor`]: deterministic SQL execution against the local replica
//! - [`api`]: HTTP surface and write forwarding to the leader
//! - [`node`]: one service object per process wiring it all together
//!
//! # Known quirk
//!
//! A follower waiting for a forwarded write counts other applied writes,
//! not time. On a quiet cluster such a wait does not expire on its own.

pub mod config;
pub mod error;
pub mod recorder;
pub mod state;
pub mod replication;
pub mod executor;
pub mod network;
pub mod api;
pub mod node;

pub use config::WolfSqlConfig;
pub use error::{Error, Result};

