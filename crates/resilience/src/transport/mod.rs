//! The wire beneath a dependency call.
//!
//! [`Transport`] performs exactly one request with no retries and no breaker.
//! [`HttpTransport`] talks HTTP via reqwest; [`StubTransport`] replays a
//! script and is meant for tests.

mod http;
mod stub;

pub use http::HttpTransport;
pub use stub::StubTransport;

use std::time::Duration;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use thiserror::Error;

/// A response as received, before status classification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawResponse {
    pub status: u16,
    pub body: Vec<u8>,
}

impl RawResponse {
    pub fn new(status: u16, body: impl Into<Vec<u8>>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }

    /// Returns true for 2xx statuses.
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Deserializes the body as JSON.
    pub fn json<T: DeserializeOwned>(&self) -> serde_json::Result<T> {
        serde_json::from_slice(&self.body)
    }

    /// Returns the body as text, replacing invalid UTF-8.
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

/// A request failed before any response arrived.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("connection failed: {0}")]
    Connect(String),

    #[error("request timed out")]
    Timeout,

    #[error("name resolution failed: {0}")]
    Dns(String),

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("invalid request: {0}")]
    Invalid(String),
}

/// An outbound GET relative to a dependency's base URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    path: String,
}

impl Request {
    /// Builds a GET for `path`, which is appended to the base URL.
    pub fn get(path: impl Into<String>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    /// Joins the path onto `base` with exactly one slash between them.
    pub fn url(&self, base: &str) -> String {
        let base = base.trim_end_matches('/');
        let path = self.path.trim_start_matches('/');
        if path.is_empty() {
            base.to_string()
        } else {
            format!("{base}/{path}")
        }
    }
}

/// Performs a single request.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Sends `request` to `url`, giving up after `timeout`.
    async fn send(
        &self,
        url: &str,
        request: &Request,
        timeout: Duration,
    ) -> Result<RawResponse, TransportError>;
}
