//! Circuit breaker guarding one downstream dependency.
//!
//! # States
//! - Closed: calls pass through, consecutive outages are counted
//! - Open: calls fail fast without reaching the dependency
//! - HalfOpen: the next call is let through as a probe
//!
//! # State Transitions
//! ```text
//! Closed   → Open:     failure_count reaches failure_threshold
//! Open     → HalfOpen: open_duration elapsed since the last failure (checked on each call)
//! HalfOpen → Closed:   probe succeeds, failure_count reset
//! HalfOpen → Open:     probe fails, or half_open_probe_duration elapses with
//!                      no probe in flight and failure_count still at or
//!                      above the threshold
//! ```
//!
//! State checks and mutations happen under the breaker's own lock. The guarded
//! operation runs outside it, so a slow dependency never blocks other callers
//! from reading the state. Transitions are applied only by calls; [`state`]
//! and [`snapshot`] report the state the next call would see without moving
//! the breaker.
//!
//! [`state`]: CircuitBreaker::state
//! [`snapshot`]: CircuitBreaker::snapshot

use std::future::Future;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::time::Instant;

use crate::outcome::{CallFailure, CallOutcome};

/// The state of a circuit breaker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CircuitState {
    /// Calls pass through.
    #[default]
    Closed,
    /// Calls are rejected immediately.
    Open,
    /// One probe call is allowed through.
    HalfOpen,
}

impl CircuitState {
    /// Returns the state name as a string.
    pub fn as_str(&self) -> &'static str {
        match self {
            CircuitState::Closed => "closed",
            CircuitState::Open => "open",
            CircuitState::HalfOpen => "half_open",
        }
    }
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Tuning for a circuit breaker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BreakerConfig {
    /// Consecutive outages that open the circuit. Must be greater than zero.
    pub failure_threshold: u32,
    /// How long the circuit stays open after the last failure.
    pub open_duration: Duration,
    /// How long a half-open circuit waits for its probe.
    pub half_open_probe_duration: Duration,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            open_duration: Duration::from_secs(60),
            half_open_probe_duration: Duration::from_secs(10),
        }
    }
}

/// Point-in-time view of a breaker, for diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BreakerSnapshot {
    pub state: CircuitState,
    pub failure_count: u32,
    pub last_failure_at: Option<Instant>,
    pub half_open_entered_at: Option<Instant>,
}

#[derive(Debug, Default)]
struct BreakerInner {
    state: CircuitState,
    failure_count: u32,
    last_failure_at: Option<Instant>,
    half_open_entered_at: Option<Instant>,
    probe_in_flight: bool,
}

/// Per-dependency circuit breaker.
///
/// One instance exists per downstream dependency and is shared by every
/// caller of that dependency for the life of the process.
#[derive(Debug)]
pub struct CircuitBreaker {
    name: String,
    config: BreakerConfig,
    inner: Mutex<BreakerInner>,
}

impl CircuitBreaker {
    /// Creates a closed breaker for the named dependency.
    ///
    /// A zero threshold is raised to one.
    pub fn new(name: impl Into<String>, config: BreakerConfig) -> Self {
        Self {
            name: name.into(),
            config: BreakerConfig {
                failure_threshold: config.failure_threshold.max(1),
                ..config
            },
            inner: Mutex::new(BreakerInner::default()),
        }
    }

    /// Returns the dependency name this breaker guards.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the breaker's configuration.
    pub fn config(&self) -> &BreakerConfig {
        &self.config
    }

    /// Returns the state the next call would observe.
    ///
    /// Time-based transitions are projected, not applied, so reading the
    /// state never starts a half-open window.
    pub fn state(&self) -> CircuitState {
        let inner = self.lock();
        self.due_transition(&inner, Instant::now())
            .unwrap_or(inner.state)
    }

    /// Returns the number of consecutive outages recorded.
    pub fn failure_count(&self) -> u32 {
        self.lock().failure_count
    }

    /// Returns a snapshot of the breaker's fields, with `state` projected as
    /// in [`CircuitBreaker::state`].
    pub fn snapshot(&self) -> BreakerSnapshot {
        let inner = self.lock();
        BreakerSnapshot {
            state: self
                .due_transition(&inner, Instant::now())
                .unwrap_or(inner.state),
            failure_count: inner.failure_count,
            last_failure_at: inner.last_failure_at,
            half_open_entered_at: inner.half_open_entered_at,
        }
    }

    /// Runs `operation` through the breaker.
    ///
    /// When the circuit is open the operation is not invoked and a terminal
    /// [`CallFailure::BreakerOpen`] is returned.
    pub async fn execute<T, F, Fut>(&self, operation: F) -> CallOutcome<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = CallOutcome<T>>,
    {
        let Some(admission) = self.try_acquire() else {
            metrics::counter!("circuit_breaker_rejections_total", "dependency" => self.name.clone())
                .increment(1);
            return CallOutcome::TerminalFailure(CallFailure::BreakerOpen {
                target: self.name.clone(),
            });
        };

        let mut probe = ProbeGuard {
            breaker: self,
            armed: admission == Admission::Probe,
        };
        let outcome = operation().await;
        probe.armed = false;

        if outcome.counts_as_breaker_failure() {
            self.on_failure();
        } else {
            self.on_success();
        }
        outcome
    }

    fn lock(&self) -> MutexGuard<'_, BreakerInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Decides whether a call may proceed, and whether it is the probe.
    fn try_acquire(&self) -> Option<Admission> {
        let mut inner = self.lock();
        self.check_transition(&mut inner, Instant::now());

        match inner.state {
            CircuitState::Closed => Some(Admission::Normal),
            CircuitState::Open => {
                tracing::warn!(dependency = %self.name, "circuit breaker open, rejecting call");
                None
            }
            CircuitState::HalfOpen if inner.probe_in_flight => None,
            CircuitState::HalfOpen => {
                inner.probe_in_flight = true;
                tracing::info!(dependency = %self.name, "circuit breaker half-open, sending probe");
                Some(Admission::Probe)
            }
        }
    }

    /// Returns the time-based transition due at `now`, if any.
    fn due_transition(&self, inner: &BreakerInner, now: Instant) -> Option<CircuitState> {
        match inner.state {
            CircuitState::Open => inner
                .last_failure_at
                .filter(|at| now.saturating_duration_since(*at) >= self.config.open_duration)
                .map(|_| CircuitState::HalfOpen),
            CircuitState::HalfOpen => {
                // A probe in flight is the call that arrived; its outcome
                // decides. The lapse leaves failure_count untouched, and a
                // count below the threshold keeps the circuit half-open.
                let lapsed = !inner.probe_in_flight
                    && inner.failure_count >= self.config.failure_threshold
                    && inner.half_open_entered_at.is_some_and(|entered| {
                        now.saturating_duration_since(entered)
                            >= self.config.half_open_probe_duration
                    });
                lapsed.then_some(CircuitState::Open)
            }
            CircuitState::Closed => None,
        }
    }

    fn check_transition(&self, inner: &mut BreakerInner, now: Instant) {
        match self.due_transition(inner, now) {
            Some(CircuitState::HalfOpen) => {
                inner.half_open_entered_at = Some(now);
                inner.probe_in_flight = false;
                self.transition(inner, CircuitState::HalfOpen);
            }
            Some(CircuitState::Open) => {
                tracing::warn!(dependency = %self.name, "half-open probe window elapsed, reopening");
                inner.last_failure_at = Some(now);
                self.transition(inner, CircuitState::Open);
            }
            Some(CircuitState::Closed) | None => {}
        }
    }

    /// Frees the probe slot of a probe whose caller gave up before it finished.
    fn abandon_probe(&self) {
        let mut inner = self.lock();
        if inner.state == CircuitState::HalfOpen && inner.probe_in_flight {
            tracing::debug!(dependency = %self.name, "probe abandoned before completing");
            inner.probe_in_flight = false;
        }
    }

    fn on_success(&self) {
        let mut inner = self.lock();
        match inner.state {
            CircuitState::HalfOpen => {
                tracing::info!(dependency = %self.name, "probe succeeded, closing circuit");
                self.transition(&mut inner, CircuitState::Closed);
            }
            // A call admitted before the circuit reopened; the cooldown stands.
            CircuitState::Open => return,
            CircuitState::Closed => {}
        }
        inner.failure_count = 0;
        inner.last_failure_at = None;
        inner.half_open_entered_at = None;
        inner.probe_in_flight = false;
    }

    fn on_failure(&self) {
        let mut inner = self.lock();
        inner.failure_count = inner.failure_count.saturating_add(1);
        inner.last_failure_at = Some(Instant::now());

        if inner.failure_count < self.config.failure_threshold {
            return;
        }
        match inner.state {
            CircuitState::Closed => {
                tracing::error!(
                    dependency = %self.name,
                    threshold = self.config.failure_threshold,
                    "failure threshold reached, opening circuit"
                );
                self.transition(&mut inner, CircuitState::Open);
            }
            CircuitState::HalfOpen => {
                tracing::warn!(dependency = %self.name, "probe failed, reopening circuit");
                inner.probe_in_flight = false;
                self.transition(&mut inner, CircuitState::Open);
            }
            CircuitState::Open => {}
        }
    }

    fn transition(&self, inner: &mut BreakerInner, to: CircuitState) {
        let from = inner.state;
        inner.state = to;
        metrics::counter!(
            "circuit_breaker_transitions_total",
            "dependency" => self.name.clone(),
            "to" => to.as_str()
        )
        .increment(1);
        tracing::debug!(dependency = %self.name, %from, %to, "circuit breaker transition");
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Admission {
    Normal,
    Probe,
}

/// Releases the probe slot if the probe's future is dropped mid-flight.
struct ProbeGuard<'a> {
    breaker: &'a CircuitBreaker,
    armed: bool,
}

impl Drop for ProbeGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.breaker.abandon_probe();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn config() -> BreakerConfig {
        BreakerConfig {
            failure_threshold: 3,
            open_duration: Duration::from_secs(30),
            half_open_probe_duration: Duration::from_secs(5),
        }
    }

    fn refused() -> CallOutcome<()> {
        CallOutcome::RetryableFailure(CallFailure::Connect {
            target: "users".to_string(),
            reason: "connection refused".to_string(),
        })
    }

    fn ok() -> CallOutcome<()> {
        CallOutcome::Success {
            payload: (),
            status: 200,
        }
    }

    async fn trip(breaker: &CircuitBreaker) {
        for _ in 0..breaker.config().failure_threshold {
            breaker.execute(|| async { refused() }).await;
        }
    }

    #[tokio::test(start_paused = true)]
    async fn opens_after_threshold_consecutive_failures() {
        let breaker = CircuitBreaker::new("users", config());

        breaker.execute(|| async { refused() }).await;
        breaker.execute(|| async { refused() }).await;
        assert_eq!(breaker.state(), CircuitState::Closed);
        assert_eq!(breaker.failure_count(), 2);

        breaker.execute(|| async { refused() }).await;
        assert_eq!(breaker.state(), CircuitState::Open);
        assert!(breaker.snapshot().last_failure_at.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn success_resets_failure_count_while_closed() {
        let breaker = CircuitBreaker::new("users", config());

        breaker.execute(|| async { refused() }).await;
        breaker.execute(|| async { refused() }).await;
        breaker.execute(|| async { ok() }).await;
        assert_eq!(breaker.failure_count(), 0);

        breaker.execute(|| async { refused() }).await;
        breaker.execute(|| async { refused() }).await;
        assert_eq!(breaker.state(), CircuitState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn open_circuit_rejects_without_invoking() {
        let breaker = CircuitBreaker::new("users", config());
        trip(&breaker).await;

        let invoked = AtomicU32::new(0);
        tokio::time::advance(Duration::from_secs(29)).await;
        let outcome = breaker
            .execute(|| async {
                invoked.fetch_add(1, Ordering::SeqCst);
                ok()
            })
            .await;

        assert_eq!(invoked.load(Ordering::SeqCst), 0);
        assert!(matches!(
            outcome,
            CallOutcome::TerminalFailure(CallFailure::BreakerOpen { .. })
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn successful_probe_closes_circuit() {
        let breaker = CircuitBreaker::new("users", config());
        trip(&breaker).await;

        tokio::time::advance(Duration::from_secs(30)).await;
        assert_eq!(breaker.state(), CircuitState::HalfOpen);

        let outcome = breaker.execute(|| async { ok() }).await;
        assert!(outcome.is_success());
        assert_eq!(breaker.state(), CircuitState::Closed);
        assert_eq!(breaker.failure_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_probe_reopens_circuit() {
        let breaker = CircuitBreaker::new("users", config());
        trip(&breaker).await;

        tokio::time::advance(Duration::from_secs(31)).await;
        breaker.execute(|| async { refused() }).await;
        assert_eq!(breaker.state(), CircuitState::Open);

        // The cooldown restarts from the failed probe.
        tokio::time::advance(Duration::from_secs(29)).await;
        assert_eq!(breaker.state(), CircuitState::Open);
        tokio::time::advance(Duration::from_secs(1)).await;
        assert_eq!(breaker.state(), CircuitState::HalfOpen);
    }

    #[tokio::test(start_paused = true)]
    async fn only_one_probe_is_admitted_at_a_time() {
        let breaker = CircuitBreaker::new("users", config());
        trip(&breaker).await;
        tokio::time::advance(Duration::from_secs(30)).await;

        let second = breaker
            .execute(|| async {
                // While the probe is in flight, a concurrent caller is refused.
                let concurrent = breaker.execute(|| async { ok() }).await;
                assert!(matches!(
                    concurrent,
                    CallOutcome::TerminalFailure(CallFailure::BreakerOpen { .. })
                ));
                ok()
            })
            .await;
        assert!(second.is_success());
        assert_eq!(breaker.state(), CircuitState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn unused_half_open_window_reopens() {
        let breaker = CircuitBreaker::new("users", config());
        trip(&breaker).await;
        tokio::time::advance(Duration::from_secs(30)).await;

        // The probe's caller gives up, so no outcome ever arrives.
        let abandoned = tokio::time::timeout(
            Duration::from_secs(1),
            breaker.execute(|| async {
                std::future::pending::<()>().await;
                ok()
            }),
        )
        .await;
        assert!(abandoned.is_err());
        assert_eq!(breaker.state(), CircuitState::HalfOpen);

        tokio::time::advance(Duration::from_secs(4)).await;
        assert_eq!(breaker.state(), CircuitState::Open);
        let rejected = breaker.execute(|| async { ok() }).await;
        assert!(matches!(
            rejected,
            CallOutcome::TerminalFailure(CallFailure::BreakerOpen { .. })
        ));
        // The timeout itself does not reset the count.
        assert_eq!(breaker.failure_count(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn abandoned_probe_frees_the_slot() {
        let breaker = CircuitBreaker::new("users", config());
        trip(&breaker).await;
        tokio::time::advance(Duration::from_secs(30)).await;

        let _ = tokio::time::timeout(
            Duration::from_secs(1),
            breaker.execute(|| async {
                std::future::pending::<()>().await;
                ok()
            }),
        )
        .await;

        let next = breaker.execute(|| async { ok() }).await;
        assert!(next.is_success());
        assert_eq!(breaker.state(), CircuitState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn slow_successful_probe_still_closes_circuit() {
        let breaker = CircuitBreaker::new("users", config());
        trip(&breaker).await;
        tokio::time::advance(Duration::from_secs(30)).await;

        let probe = breaker.execute(|| async {
            // Outlasts the 5s half-open window.
            tokio::time::sleep(Duration::from_secs(8)).await;
            ok()
        });
        let bystander = async {
            tokio::time::sleep(Duration::from_secs(6)).await;
            let state = breaker.state();
            let outcome = breaker.execute(|| async { ok() }).await;
            (state, outcome)
        };
        let (probe, (state_during_probe, bystander)) = tokio::join!(probe, bystander);

        assert_eq!(state_during_probe, CircuitState::HalfOpen);
        assert!(matches!(
            bystander,
            CallOutcome::TerminalFailure(CallFailure::BreakerOpen { .. })
        ));
        assert!(probe.is_success());
        assert_eq!(breaker.state(), CircuitState::Closed);
        assert_eq!(breaker.failure_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn reading_state_does_not_start_the_probe_window() {
        let breaker = CircuitBreaker::new("users", config());
        trip(&breaker).await;
        tokio::time::advance(Duration::from_secs(30)).await;

        let snapshot = breaker.snapshot();
        assert_eq!(snapshot.state, CircuitState::HalfOpen);
        assert_eq!(breaker.state(), CircuitState::HalfOpen);
        assert!(snapshot.half_open_entered_at.is_none());

        // Long past the probe window, the next caller is still the probe.
        tokio::time::advance(Duration::from_secs(60)).await;
        assert_eq!(breaker.state(), CircuitState::HalfOpen);
        let probe = breaker.execute(|| async { ok() }).await;
        assert!(probe.is_success());
        assert_eq!(breaker.state(), CircuitState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn client_errors_do_not_trip_the_breaker() {
        let breaker = CircuitBreaker::new("users", config());
        for _ in 0..10 {
            breaker
                .execute(|| async {
                    CallOutcome::<()>::TerminalFailure(CallFailure::Status {
                        target: "users".to_string(),
                        status: 404,
                        body: String::new(),
                    })
                })
                .await;
        }
        assert_eq!(breaker.state(), CircuitState::Closed);
        assert_eq!(breaker.failure_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn server_errors_trip_the_breaker() {
        let breaker = CircuitBreaker::new("users", config());
        for _ in 0..3 {
            breaker
                .execute(|| async {
                    CallOutcome::<()>::TerminalFailure(CallFailure::Status {
                        target: "users".to_string(),
                        status: 503,
                        body: String::new(),
                    })
                })
                .await;
        }
        assert_eq!(breaker.state(), CircuitState::Open);
    }

    #[test]
    fn zero_threshold_is_clamped() {
        let breaker = CircuitBreaker::new(
            "users",
            BreakerConfig {
                failure_threshold: 0,
                ..BreakerConfig::default()
            },
        );
        assert_eq!(breaker.config().failure_threshold, 1);
    }
}
