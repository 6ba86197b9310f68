//! WolfSQL Error Types

use thiserror::Error;

/// Result type alias for WolfSQL operations
pub type Result<T> = std::result::Result<T, Error>;

/// WolfSQL error types
#[derive(Error, Debug)]
pub enum Error {
    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid configuration file: {0}")]
    ConfigParse(#[from] toml::de::Error),

    // Log storage errors
    #[error("State error: {0}")]
    State(String),

    #[error("Log entry {index} is corrupted: {reason}")]
    LogCorrupted { index: u64, reason: String },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    // Role errors
    #[error("Not leader: current leader is {0}")]
    NotLeader(String),

    #[error("No leader available")]
    NoLeader,

    #[error("Cannot accept requests in current state: {0}")]
    InvalidState(String),

    // Replication errors
    #[error("Replication error: {0}")]
    Replication(String),

    #[error("Join failed: {0}")]
    Join(String),

    // Network errors
    #[error("Network error: {0}")]
    Network(String),

    #[error("Connection failed to {address}: {reason}")]
    ConnectionFailed { address: String, reason: String },

    #[error("Connection timeout to {0}")]
    ConnectionTimeout(String),

    #[error("Request to {address} rejected ({status}): {message}")]
    Rejected {
        address: String,
        status: u16,
        message: String,
    },

    #[error("Upstream unavailable: {0}")]
    UpstreamUnavailable(String),

    // Recorder errors
    #[error("No record found after {0} records passed")]
    RecordNotFound(usize),

    // I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // Internal errors
    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Shutdown in progress")]
    ShuttingDown,
}

impl Error {
    /// Check if this error means the node's role does not allow the request
    pub fn is_role_mismatch(&self) -> bool {
        matches!(
            self,
            Error::NotLeader(_) | Error::NoLeader | Error::InvalidState(_)
        )
    }
}

impl From<rusqlite::Error> for Error {
    fn from(e: rusqlite::Error) -> Self {
        Error::State(format!("SQLite error: {}", e))
    }
}

impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            let url = e.url().map(|u| u.to_string()).unwrap_or_default();
            Error::ConnectionTimeout(url)
        } else if e.is_connect() {
            Error::ConnectionFailed {
                address: e.url().map(|u| u.to_string()).unwrap_or_default(),
                reason: e.to_string(),
            }
        } else {
            Error::Network(e.to_string())
        }
    }
}
