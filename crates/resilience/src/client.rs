//! Retrying client for named downstream dependencies.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;

use crate::backoff::BackoffPolicy;
use crate::circuit_breaker::{BreakerConfig, CircuitBreaker};
use crate::outcome::{CallFailure, CallOutcome};
use crate::transport::{RawResponse, Request, Transport, TransportError};

/// Per-call limits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CallConfig {
    /// Deadline for one attempt.
    pub timeout: Duration,
    /// Total attempts including the first.
    pub max_attempts: u32,
    pub backoff: BackoffPolicy,
}

impl Default for CallConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(3),
            max_attempts: 3,
            backoff: BackoffPolicy::default(),
        }
    }
}

/// Everything needed to register a dependency.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DependencyConfig {
    pub base_url: String,
    pub call: CallConfig,
    pub breaker: BreakerConfig,
}

impl DependencyConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            call: CallConfig::default(),
            breaker: BreakerConfig::default(),
        }
    }
}

/// A registered dependency and its breaker.
#[derive(Debug)]
pub struct Dependency {
    pub name: String,
    pub base_url: String,
    pub call: CallConfig,
    pub breaker: Arc<CircuitBreaker>,
}

/// Named dependencies, each with a process-wide breaker.
#[derive(Debug, Default)]
pub struct DependencyRegistry {
    dependencies: HashMap<String, Arc<Dependency>>,
}

impl DependencyRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `name`, replacing any previous registration and its breaker.
    pub fn register(&mut self, name: impl Into<String>, config: DependencyConfig) {
        let name = name.into();
        let breaker = Arc::new(CircuitBreaker::new(name.clone(), config.breaker));
        self.dependencies.insert(
            name.clone(),
            Arc::new(Dependency {
                name,
                base_url: config.base_url,
                call: config.call,
                breaker,
            }),
        );
    }

    /// Builder form of [`DependencyRegistry::register`].
    pub fn with(mut self, name: impl Into<String>, config: DependencyConfig) -> Self {
        self.register(name, config);
        self
    }

    pub fn get(&self, name: &str) -> Option<Arc<Dependency>> {
        self.dependencies.get(name).cloned()
    }

    /// Returns the breaker guarding `name`.
    pub fn breaker(&self, name: &str) -> Option<Arc<CircuitBreaker>> {
        self.dependencies.get(name).map(|d| Arc::clone(&d.breaker))
    }

    /// Iterates over registered dependency names.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.dependencies.keys().map(String::as_str)
    }
}

/// What a whole call did, including retries.
#[derive(Debug, Clone)]
pub struct CallReport {
    pub outcome: CallOutcome<RawResponse>,
    /// Attempts that were made, including ones the breaker rejected.
    pub attempts: u32,
    pub elapsed: Duration,
}

/// Calls registered dependencies through their breakers with retry and backoff.
pub struct ResilientClient<T> {
    transport: Arc<T>,
    registry: Arc<DependencyRegistry>,
}

impl<T> Clone for ResilientClient<T> {
    fn clone(&self) -> Self {
        Self {
            transport: Arc::clone(&self.transport),
            registry: Arc::clone(&self.registry),
        }
    }
}

impl<T: Transport> ResilientClient<T> {
    pub fn new(transport: T, registry: DependencyRegistry) -> Self {
        Self {
            transport: Arc::new(transport),
            registry: Arc::new(registry),
        }
    }

    pub fn registry(&self) -> &DependencyRegistry {
        &self.registry
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Calls `target` with its registered timeout and attempt limit.
    pub async fn send(&self, target: &str, request: &Request) -> CallOutcome<RawResponse> {
        let Some(dependency) = self.registry.get(target) else {
            return unknown(target);
        };
        let call = dependency.call;
        self.call(target, request, call.timeout, call.max_attempts)
            .await
    }

    /// Calls `target`, retrying transport failures up to `max_attempts` in total.
    ///
    /// Every attempt passes through the dependency's breaker. Non-2xx
    /// responses are never retried.
    pub async fn call(
        &self,
        target: &str,
        request: &Request,
        timeout: Duration,
        max_attempts: u32,
    ) -> CallOutcome<RawResponse> {
        self.call_with_report(target, request, timeout, max_attempts)
            .await
            .outcome
    }

    #[tracing::instrument(skip(self, target, request), fields(dependency = target, path = request.path()))]
    pub async fn call_with_report(
        &self,
        target: &str,
        request: &Request,
        timeout: Duration,
        max_attempts: u32,
    ) -> CallReport {
        let started = Instant::now();
        let Some(dependency) = self.registry.get(target) else {
            tracing::warn!("call to unregistered dependency");
            return CallReport {
                outcome: unknown(target),
                attempts: 0,
                elapsed: started.elapsed(),
            };
        };

        let max_attempts = max_attempts.max(1);
        let url = request.url(&dependency.base_url);
        let url = url.as_str();
        let transport = self.transport.as_ref();

        let mut attempt = 0;
        let outcome = loop {
            attempt += 1;
            tracing::debug!(attempt, max_attempts, url, "calling dependency");

            let outcome = dependency
                .breaker
                .execute(|| attempt_once(transport, target, url, request, timeout))
                .await;

            metrics::counter!(
                "dependency_call_attempts_total",
                "dependency" => target.to_string(),
                "outcome" => outcome.label()
            )
            .increment(1);

            if outcome.is_retryable() && attempt < max_attempts {
                let delay = dependency.call.backoff.delay(attempt);
                tracing::warn!(
                    attempt,
                    max_attempts,
                    delay_ms = delay.as_millis() as u64,
                    error = ?outcome.failure(),
                    "dependency call failed, retrying"
                );
                tokio::time::sleep(delay).await;
                continue;
            }
            break outcome;
        };

        let elapsed = started.elapsed();
        metrics::histogram!(
            "dependency_call_duration_seconds",
            "dependency" => target.to_string(),
            "outcome" => outcome.label()
        )
        .record(elapsed.as_secs_f64());

        match outcome.failure() {
            None => tracing::debug!(attempts = attempt, "dependency call succeeded"),
            Some(failure) => tracing::warn!(
                attempts = attempt,
                outcome = outcome.label(),
                error = %failure,
                "dependency call failed"
            ),
        }

        CallReport {
            outcome,
            attempts: attempt,
            elapsed,
        }
    }
}

fn unknown<P>(target: &str) -> CallOutcome<P> {
    CallOutcome::TerminalFailure(CallFailure::UnknownDependency(target.to_string()))
}

async fn attempt_once<T: Transport + ?Sized>(
    transport: &T,
    target: &str,
    url: &str,
    request: &Request,
    timeout: Duration,
) -> CallOutcome<RawResponse> {
    let result = match tokio::time::timeout(timeout, transport.send(url, request, timeout)).await {
        Ok(result) => result,
        Err(_) => Err(TransportError::Timeout),
    };

    match result {
        Ok(response) if response.is_success() => CallOutcome::Success {
            status: response.status,
            payload: response,
        },
        Ok(response) => CallOutcome::TerminalFailure(CallFailure::Status {
            target: target.to_string(),
            status: response.status,
            body: response.text(),
        }),
        Err(error) => classify(target, timeout, error),
    }
}

fn classify(target: &str, timeout: Duration, error: TransportError) -> CallOutcome<RawResponse> {
    let target = target.to_string();
    match error {
        TransportError::Timeout => CallOutcome::RetryableFailure(CallFailure::Timeout { target, timeout }),
        TransportError::Connect(reason) => {
            CallOutcome::RetryableFailure(CallFailure::Connect { target, reason })
        }
        TransportError::Dns(reason) => CallOutcome::RetryableFailure(CallFailure::Dns { target, reason }),
        TransportError::Protocol(reason) => {
            CallOutcome::RetryableFailure(CallFailure::Protocol { target, reason })
        }
        TransportError::Invalid(reason) => {
            CallOutcome::TerminalFailure(CallFailure::InvalidRequest { target, reason })
        }
    }
}
