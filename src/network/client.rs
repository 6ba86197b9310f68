//! Network Client
//!
//! HTTP transport for talking to other nodes.

use std::time::Duration;

use bytes::Bytes;

use super::Transport;
use crate::error::{Error, Result};

/// Transport over real HTTP connections
pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    /// Create a transport whose requests time out after `request_timeout`
    pub fn new(request_timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()?;
        Ok(Self { client })
    }
}

#[async_trait::async_trait]
impl Transport for HttpTransport {
    async fn post(&self, connection_string: &str, path: &str, body: Bytes) -> Result<Bytes> {
        let url = format!("{}{}", connection_string.trim_end_matches('/'), path);
        let response = self.client.post(&url).body(body).send().await?;

        let status = response.status();
        let body = response.bytes().await?;
        if !status.is_success() {
            return Err(Error::Rejected {
                address: url,
                status: status.as_u16(),
                message: String::from_utf8_lossy(&body).trim().to_string(),
            });
        }

        Ok(body)
    }
}
