//! Generic "fetch bytes from URL" capability.

use reqwest::blocking::Client;
use std::time::Duration;

use crate::error::{Error, TransferError};

/// What came back from the remote end. Any status is carried as-is; judging
/// it is the caller's job.
#[derive(Debug, Clone)]
pub struct RemoteResponse {
    pub status: u16,
    pub body: Vec<u8>,
}

impl RemoteResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

pub trait Transport: Send + Sync {
    /// Only a missing or unreadable response is an `Err`; HTTP error
    /// statuses come back as `Ok` with the status set.
    fn get(&self, url: &str) -> Result<RemoteResponse, TransferError>;
}

/// Blocking HTTP transport.
#[derive(Clone)]
pub struct HttpTransport {
    client: Client,
}

impl HttpTransport {
    pub fn new(timeout: Duration) -> Result<Self, Error> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(concat!("pagecounts/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| Error::Other(format!("failed to build HTTP client: {}", e)))?;
        Ok(Self { client })
    }
}

impl Transport for HttpTransport {
    fn get(&self, url: &str) -> Result<RemoteResponse, TransferError> {
        let no_response = |err: reqwest::Error| TransferError::NoResponse {
            url: url.to_string(),
            reason: err.to_string(),
        };

        let response = self.client.get(url).send().map_err(no_response)?;
        let status = response.status().as_u16();
        let body = response.bytes().map_err(no_response)?.to_vec();
        Ok(RemoteResponse { status, body })
    }
}
