//! Resilient synchronous calls to downstream services.
//!
//! A [`ResilientClient`] sends each attempt through the target's
//! [`CircuitBreaker`], classifies what came back as a [`CallOutcome`], and
//! retries transport failures with exponential backoff.

pub mod backoff;
pub mod circuit_breaker;
pub mod client;
pub mod outcome;
pub mod transport;

pub use backoff::BackoffPolicy;
pub use circuit_breaker::{BreakerConfig, BreakerSnapshot, CircuitBreaker, CircuitState};
pub use client::{
    CallConfig, CallReport, Dependency, DependencyConfig, DependencyRegistry, ResilientClient,
};
pub use outcome::{CallFailure, CallOutcome};
pub use transport::{HttpTransport, RawResponse, Request, StubTransport, Transport, TransportError};
