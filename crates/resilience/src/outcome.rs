//! Tagged results of a single dependency call.

use std::time::Duration;

use serde::de::DeserializeOwned;
use thiserror::Error;

use crate::transport::RawResponse;

/// Why a dependency call did not produce a usable response.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CallFailure {
    /// The connection could not be established or was reset.
    #[error("connection to {target} failed: {reason}")]
    Connect { target: String, reason: String },

    /// No response arrived within the attempt deadline.
    #[error("{target} did not respond within {timeout:?}")]
    Timeout { target: String, timeout: Duration },

    /// The dependency host name could not be resolved.
    #[error("could not resolve {target}: {reason}")]
    Dns { target: String, reason: String },

    /// The exchange broke after the connection was made.
    #[error("transport error talking to {target}: {reason}")]
    Protocol { target: String, reason: String },

    /// A response was received with a non-success status.
    #[error("{target} responded with status {status}")]
    Status {
        target: String,
        status: u16,
        body: String,
    },

    /// The circuit breaker refused the call without contacting the dependency.
    #[error("circuit breaker for {target} is open")]
    BreakerOpen { target: String },

    /// The response could not be interpreted.
    #[error("invalid response from {target}: {reason}")]
    InvalidResponse { target: String, reason: String },

    /// The request could not be built.
    #[error("invalid request to {target}: {reason}")]
    InvalidRequest { target: String, reason: String },

    /// No dependency is registered under this name.
    #[error("unknown dependency: {0}")]
    UnknownDependency(String),
}

impl CallFailure {
    /// Returns true for transport-level failures, which are worth retrying.
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            CallFailure::Connect { .. }
                | CallFailure::Timeout { .. }
                | CallFailure::Dns { .. }
                | CallFailure::Protocol { .. }
        )
    }

    /// Returns true if the failure indicates the dependency itself is unhealthy.
    ///
    /// Only these count toward a breaker's failure threshold. A 4xx response
    /// means the dependency is up and answered a business question.
    pub fn is_outage(&self) -> bool {
        match self {
            CallFailure::Status { status, .. } => *status >= 500,
            other => other.is_transport(),
        }
    }

    /// Returns the received status code, if a response arrived.
    pub fn status(&self) -> Option<u16> {
        match self {
            CallFailure::Status { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Returns true if the dependency answered 404.
    pub fn is_not_found(&self) -> bool {
        self.status() == Some(404)
    }
}

/// Result of one call attempt, or of a whole call after retries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallOutcome<T> {
    /// A 2xx response.
    Success { payload: T, status: u16 },
    /// A transport failure that may succeed if attempted again.
    RetryableFailure(CallFailure),
    /// A failure that must reach the caller unchanged.
    TerminalFailure(CallFailure),
}

impl<T> CallOutcome<T> {
    /// Returns true for [`CallOutcome::Success`].
    pub fn is_success(&self) -> bool {
        matches!(self, CallOutcome::Success { .. })
    }

    /// Returns true for [`CallOutcome::RetryableFailure`].
    pub fn is_retryable(&self) -> bool {
        matches!(self, CallOutcome::RetryableFailure(_))
    }

    /// Returns the failure cause, if any.
    pub fn failure(&self) -> Option<&CallFailure> {
        match self {
            CallOutcome::Success { .. } => None,
            CallOutcome::RetryableFailure(f) | CallOutcome::TerminalFailure(f) => Some(f),
        }
    }

    /// Returns the response status, whether the call succeeded or not.
    pub fn status(&self) -> Option<u16> {
        match self {
            CallOutcome::Success { status, .. } => Some(*status),
            other => other.failure().and_then(CallFailure::status),
        }
    }

    /// Returns true if this outcome counts toward the breaker's threshold.
    pub fn counts_as_breaker_failure(&self) -> bool {
        match self {
            CallOutcome::Success { .. } => false,
            CallOutcome::RetryableFailure(_) => true,
            CallOutcome::TerminalFailure(f) => f.is_outage(),
        }
    }

    /// Converts the success payload, keeping failures as they are.
    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> CallOutcome<U> {
        match self {
            CallOutcome::Success { payload, status } => CallOutcome::Success {
                payload: f(payload),
                status,
            },
            CallOutcome::RetryableFailure(e) => CallOutcome::RetryableFailure(e),
            CallOutcome::TerminalFailure(e) => CallOutcome::TerminalFailure(e),
        }
    }

    /// Short label for logs and metrics.
    pub fn label(&self) -> &'static str {
        match self {
            CallOutcome::Success { .. } => "success",
            CallOutcome::RetryableFailure(_) => "retryable_failure",
            CallOutcome::TerminalFailure(CallFailure::BreakerOpen { .. }) => "breaker_open",
            CallOutcome::TerminalFailure(_) => "terminal_failure",
        }
    }
}

impl CallOutcome<RawResponse> {
    /// Deserializes a successful JSON body.
    ///
    /// A body that does not match `T` becomes a terminal
    /// [`CallFailure::InvalidResponse`].
    pub fn decode<T: DeserializeOwned>(self, target: &str) -> CallOutcome<T> {
        match self {
            CallOutcome::Success { payload, status } => match payload.json::<T>() {
                Ok(payload) => CallOutcome::Success { payload, status },
                Err(e) => CallOutcome::TerminalFailure(CallFailure::InvalidResponse {
                    target: target.to_string(),
                    reason: e.to_string(),
                }),
            },
            CallOutcome::RetryableFailure(e) => CallOutcome::RetryableFailure(e),
            CallOutcome::TerminalFailure(e) => CallOutcome::TerminalFailure(e),
        }
    }
}
