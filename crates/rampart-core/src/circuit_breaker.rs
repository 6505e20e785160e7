//! Circuit breaker pattern implementation
//!
//! # States
//! - Closed: normal operation, requests pass through
//! - Open: dependency assumed down, requests fail fast
//! - Half-Open: a limited number of probe requests test recovery
//!
//! # State Transitions
//! ```text
//! Closed    → Open:      consecutive failures >= failure_threshold
//! Open      → Half-Open: reset timeout elapsed since the last failure
//! Half-Open → Closed:    half_open_requests consecutive probe successes
//! Half-Open → Open:      any probe failure
//! ```
//!
//! All state lives behind one mutex per breaker. The lock is only held for
//! the bookkeeping, never across the protected call.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;
use thiserror::Error;
use tracing::{debug, info, trace, warn};

use crate::error::ResilienceError;

/// Circuit breaker states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CircuitState {
    /// Circuit is closed, requests flow normally
    #[default]
    Closed,
    /// Circuit is open, requests are rejected
    Open,
    /// Circuit is half-open, limited number of probes allowed
    HalfOpen,
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CircuitState::Closed => write!(f, "CLOSED"),
            CircuitState::Open => write!(f, "OPEN"),
            CircuitState::HalfOpen => write!(f, "HALF_OPEN"),
        }
    }
}

/// Circuit breaker configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CircuitBreakerConfig {
    /// Number of consecutive failures needed to trip the circuit
    pub failure_threshold: u32,
    /// Cooldown in milliseconds before an open circuit admits a probe
    pub reset_timeout_ms: u64,
    /// Probes admitted in half-open state, and successes needed to close
    pub half_open_requests: u32,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            reset_timeout_ms: 30_000,
            half_open_requests: 3,
        }
    }
}

/// Point-in-time view of a breaker
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CircuitBreakerMetrics {
    /// Current state
    pub state: CircuitState,
    /// Calls admitted by the breaker
    pub total_requests: u64,
    /// Successes recorded
    pub total_successes: u64,
    /// Failures recorded
    pub total_failures: u64,
    /// Failures since the last success or reset
    pub consecutive_failures: u32,
    /// `total_failures / total_requests`, 0 when nothing was admitted
    pub failure_rate: f64,
}

#[derive(Debug, Default)]
struct BreakerState {
    state: CircuitState,
    consecutive_failures: u32,
    half_open_successes: u32,
    half_open_attempts: u32,
    last_failure_time: Option<Instant>,
    total_requests: u64,
    total_successes: u64,
    total_failures: u64,
}

impl BreakerState {
    fn cooldown_elapsed(&self, reset_timeout: Duration, now: Instant) -> bool {
        match self.last_failure_time {
            Some(last) => now.saturating_duration_since(last) >= reset_timeout,
            // Forced open without a recorded failure: nothing to wait for
            None => true,
        }
    }

    fn remaining_cooldown(&self, reset_timeout: Duration, now: Instant) -> Duration {
        match self.last_failure_time {
            Some(last) => reset_timeout.saturating_sub(now.saturating_duration_since(last)),
            None => Duration::ZERO,
        }
    }

    fn enter(&mut self, state: CircuitState) {
        self.state = state;
        self.half_open_successes = 0;
        self.half_open_attempts = 0;
        if state == CircuitState::Closed {
            self.consecutive_failures = 0;
        }
    }
}

/// Per-operation circuit breaker
#[derive(Debug)]
pub struct CircuitBreaker {
    name: String,
    config: CircuitBreakerConfig,
    state: Mutex<BreakerState>,
}

impl CircuitBreaker {
    /// Create a new closed circuit breaker
    pub fn new(name: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        let name = name.into();
        debug!(circuit = %name, ?config, "Creating circuit breaker");
        Self {
            name,
            config,
            state: Mutex::new(BreakerState::default()),
        }
    }

    /// Name of the protected operation
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Configuration the breaker was created with
    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    fn reset_timeout(&self) -> Duration {
        Duration::from_millis(self.config.reset_timeout_ms)
    }

    /// Decide whether a call may be attempted now.
    ///
    /// An open breaker whose cooldown has elapsed moves to half-open and the
    /// granted call counts as the first probe.
    pub fn can_proceed(&self) -> bool {
        let mut inner = self.state.lock();
        let now = Instant::now();

        let allowed = match inner.state {
            CircuitState::Closed => true,
            CircuitState::Open => {
                if inner.cooldown_elapsed(self.reset_timeout(), now) {
                    inner.enter(CircuitState::HalfOpen);
                    inner.half_open_attempts = 1;
                    info!(circuit = %self.name, "Circuit breaker transitioned to HALF_OPEN after cooldown");
                    true
                } else {
                    trace!(circuit = %self.name, "Circuit open, rejecting call");
                    false
                }
            }
            CircuitState::HalfOpen => {
                if inner.half_open_attempts < self.config.half_open_requests {
                    inner.half_open_attempts += 1;
                    debug!(
                        circuit = %self.name,
                        attempts = inner.half_open_attempts,
                        max = self.config.half_open_requests,
                        "Admitting half-open probe"
                    );
                    true
                } else {
                    trace!(circuit = %self.name, "Half-open probe budget exhausted, rejecting call");
                    false
                }
            }
        };

        if allowed {
            inner.total_requests += 1;
        }
        allowed
    }

    /// Record a successful call
    pub fn record_success(&self) {
        let mut inner = self.state.lock();
        inner.total_successes += 1;

        match inner.state {
            CircuitState::Closed => {
                inner.consecutive_failures = 0;
            }
            CircuitState::HalfOpen => {
                inner.half_open_successes += 1;
                if inner.half_open_successes >= self.config.half_open_requests {
                    inner.enter(CircuitState::Closed);
                    info!(circuit = %self.name, "Circuit breaker CLOSED after successful probes");
                }
            }
            CircuitState::Open => {}
        }
    }

    /// Record a failed call
    pub fn record_failure(&self) {
        let mut inner = self.state.lock();
        inner.total_failures += 1;
        inner.last_failure_time = Some(Instant::now());

        match inner.state {
            CircuitState::Closed => {
                inner.consecutive_failures += 1;
                if inner.consecutive_failures >= self.config.failure_threshold {
                    inner.enter(CircuitState::Open);
                    warn!(
                        circuit = %self.name,
                        failures = inner.consecutive_failures,
                        "Circuit breaker OPEN after consecutive failures"
                    );
                }
            }
            CircuitState::HalfOpen => {
                inner.consecutive_failures += 1;
                inner.enter(CircuitState::Open);
                warn!(circuit = %self.name, "Circuit breaker reopened after half-open failure");
            }
            CircuitState::Open => {}
        }
    }

    /// Hand back a grant from [`can_proceed`](Self::can_proceed) that never
    /// reached the dependency, e.g. because a rate limiter denied the call.
    ///
    /// Returns the half-open probe slot so the breaker cannot get stuck with
    /// its probe budget spent and no outcome recorded.
    pub fn release(&self) {
        let mut inner = self.state.lock();
        inner.total_requests = inner.total_requests.saturating_sub(1);
        if inner.state == CircuitState::HalfOpen && inner.half_open_attempts > 0 {
            inner.half_open_attempts -= 1;
            debug!(circuit = %self.name, "Released unused half-open probe");
        }
    }

    /// Current state, without triggering the open → half-open transition
    pub fn state(&self) -> CircuitState {
        self.state.lock().state
    }

    /// Suggested wait before the breaker may admit another call.
    ///
    /// Open: time left in the cooldown. Half-open with every slot taken: a full
    /// reset timeout, as admission waits on the calls in flight.
    pub fn remaining_cooldown(&self) -> Duration {
        let inner = self.state.lock();
        match inner.state {
            CircuitState::Open => inner.remaining_cooldown(self.reset_timeout(), Instant::now()),
            CircuitState::HalfOpen if inner.half_open_attempts >= self.config.half_open_requests => {
                self.reset_timeout()
            }
            _ => Duration::ZERO,
        }
    }

    /// Close the circuit and clear the failure streak. Totals are kept.
    pub fn reset(&self) {
        let mut inner = self.state.lock();
        inner.enter(CircuitState::Closed);
        inner.last_failure_time = None;
        info!(circuit = %self.name, "Circuit breaker reset");
    }

    /// Administrative override of the current state
    pub fn force_state(&self, state: CircuitState) {
        let mut inner = self.state.lock();
        inner.enter(state);
        if state == CircuitState::Open && inner.last_failure_time.is_none() {
            // Give a forced-open breaker a full cooldown
            inner.last_failure_time = Some(Instant::now());
        }
        warn!(circuit = %self.name, %state, "Circuit breaker state forced");
    }

    /// Snapshot of counters and state
    pub fn metrics(&self) -> CircuitBreakerMetrics {
        let inner = self.state.lock();
        let failure_rate = if inner.total_requests == 0 {
            0.0
        } else {
            inner.total_failures as f64 / inner.total_requests as f64
        };
        CircuitBreakerMetrics {
            state: inner.state,
            total_requests: inner.total_requests,
            total_successes: inner.total_successes,
            total_failures: inner.total_failures,
            consecutive_failures: inner.consecutive_failures,
            failure_rate,
        }
    }

    /// [`can_proceed`](Self::can_proceed) returning a permit that records
    /// the outcome, or releases the grant if dropped without one
    pub fn admit(&self) -> Option<CircuitPermit<'_>> {
        if self.can_proceed() {
            Some(CircuitPermit { breaker: self, settled: false })
        } else {
            None
        }
    }

    /// Run `operation` under circuit breaker protection.
    ///
    /// Dropping the returned future before `operation` completes releases the
    /// admission instead of recording an outcome.
    pub async fn execute<F, T, E>(&self, operation: F) -> Result<T, CircuitError<E>>
    where
        F: Future<Output = Result<T, E>>,
    {
        let Some(mut permit) = self.admit() else {
            return Err(CircuitError::Open(self.open_error()));
        };

        match operation.await {
            Ok(value) => {
                permit.record_success();
                Ok(value)
            }
            Err(e) => {
                permit.record_failure();
                Err(CircuitError::Inner(e))
            }
        }
    }

    /// Rejection error carrying the remaining cooldown
    pub fn open_error(&self) -> ResilienceError {
        ResilienceError::CircuitOpen {
            name: self.name.clone(),
            remaining_cooldown_ms: self.remaining_cooldown().as_millis() as u64,
        }
    }
}

/// Error returned by [`CircuitBreaker::execute`]
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CircuitError<E> {
    /// The breaker rejected the call
    #[error("{0}")]
    Open(ResilienceError),
    /// The protected operation failed
    #[error("{0}")]
    Inner(E),
}

/// Admission granted by [`CircuitBreaker::admit`].
///
/// Dropping a permit that never recorded an outcome hands the grant back
/// through [`CircuitBreaker::release`], so a call cancelled mid-flight cannot
/// hold a half-open slot forever.
#[must_use = "dropping the permit releases the admission"]
#[derive(Debug)]
pub struct CircuitPermit<'a> {
    breaker: &'a CircuitBreaker,
    settled: bool,
}

impl CircuitPermit<'_> {
    /// Record a successful call on the breaker
    pub fn record_success(&mut self) {
        self.breaker.record_success();
        self.settled = true;
    }

    /// Record a failed call on the breaker
    pub fn record_failure(&mut self) {
        self.breaker.record_failure();
        self.settled = true;
    }

    /// The breaker this permit was granted by
    pub fn breaker(&self) -> &CircuitBreaker {
        self.breaker
    }
}

impl Drop for CircuitPermit<'_> {
    fn drop(&mut self) {
        if !self.settled {
            self.breaker.release();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn breaker(threshold: u32, reset_ms: u64, half_open: u32) -> CircuitBreaker {
        CircuitBreaker::new(
            "test",
            CircuitBreakerConfig {
                failure_threshold: threshold,
                reset_timeout_ms: reset_ms,
                half_open_requests: half_open,
            },
        )
    }

    #[test]
    fn test_starts_closed() {
        let cb = breaker(3, 100, 1);
        assert_eq!(cb.state(), CircuitState::Closed);
        assert!(cb.can_proceed());
        assert_eq!(cb.metrics().total_requests, 1);
    }

    #[test]
    fn test_success_clears_failure_streak() {
        let cb = breaker(3, 100, 1);
        cb.record_failure();
        cb.record_failure();
        cb.record_success();
        cb.record_failure();
        cb.record_failure();
        assert_eq!(cb.state(), CircuitState::Closed);
        assert_eq!(cb.metrics().consecutive_failures, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_open_rejects_until_cooldown() {
        let cb = breaker(2, 1_000, 1);
        cb.record_failure();
        cb.record_failure();
        assert_eq!(cb.state(), CircuitState::Open);
        assert!(!cb.can_proceed());
        assert_eq!(cb.remaining_cooldown(), Duration::from_millis(1_000));

        tokio::time::advance(Duration::from_millis(999)).await;
        assert!(!cb.can_proceed());
        assert_eq!(cb.remaining_cooldown(), Duration::from_millis(1));

        tokio::time::advance(Duration::from_millis(1)).await;
        assert!(cb.can_proceed());
        assert_eq!(cb.state(), CircuitState::HalfOpen);
    }

    #[tokio::test(start_paused = true)]
    async fn test_half_open_probe_budget() {
        let cb = breaker(1, 10, 2);
        cb.record_failure();
        tokio::time::advance(Duration::from_millis(10)).await;

        assert!(cb.can_proceed());
        assert!(cb.can_proceed());
        assert!(!cb.can_proceed(), "third probe exceeds the budget of 2");
    }

    #[tokio::test(start_paused = true)]
    async fn test_release_returns_probe_slot() {
        let cb = breaker(1, 10, 1);
        cb.record_failure();
        tokio::time::advance(Duration::from_millis(10)).await;

        assert!(cb.can_proceed());
        assert!(!cb.can_proceed());
        cb.release();
        assert!(cb.can_proceed(), "released slot can be granted again");
        assert_eq!(cb.metrics().total_requests, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropped_permit_returns_trial_slot() {
        let cb = breaker(1, 10, 1);
        cb.record_failure();
        tokio::time::advance(Duration::from_millis(10)).await;

        let permit = cb.admit().expect("first half-open call admitted");
        assert!(cb.admit().is_none());
        drop(permit);

        let mut retry = cb.admit().expect("slot returned by the dropped permit");
        retry.record_success();
        drop(retry);
        assert_eq!(cb.state(), CircuitState::Closed);
        assert_eq!(cb.metrics().total_requests, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_settled_permit_keeps_outcome() {
        let cb = breaker(2, 1_000, 1);
        let mut permit = cb.admit().unwrap();
        permit.record_failure();
        drop(permit);

        let metrics = cb.metrics();
        assert_eq!(metrics.total_requests, 1);
        assert_eq!(metrics.total_failures, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_execute_does_not_wedge_half_open() {
        let cb = breaker(1, 10, 1);
        cb.record_failure();
        tokio::time::advance(Duration::from_millis(10)).await;

        let slow = cb.execute(async {
            tokio::time::sleep(Duration::from_millis(50)).await;
            Ok::<_, String>(())
        });
        assert!(tokio::time::timeout(Duration::from_millis(5), slow).await.is_err());

        let result: Result<u8, CircuitError<String>> = cb.execute(async { Ok(1) }).await;
        assert_eq!(result, Ok(1));
        assert_eq!(cb.state(), CircuitState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausted_half_open_hints_positive_wait() {
        let cb = breaker(1, 250, 1);
        cb.record_failure();
        tokio::time::advance(Duration::from_millis(250)).await;
        assert!(cb.can_proceed());

        assert!(!cb.can_proceed());
        assert_eq!(cb.remaining_cooldown(), Duration::from_millis(250));
        match cb.open_error() {
            ResilienceError::CircuitOpen { remaining_cooldown_ms, .. } => assert_eq!(remaining_cooldown_ms, 250),
            other => panic!("unexpected error {:?}", other),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_circuit_error_display_is_transparent() {
        let cb = breaker(1, 1_000, 1);
        cb.record_failure();

        let open: CircuitError<String> = CircuitError::Open(cb.open_error());
        assert_eq!(open.to_string(), cb.open_error().to_string());
        let inner: CircuitError<String> = CircuitError::Inner("connection reset".to_string());
        assert_eq!(inner.to_string(), "connection reset");
    }

    #[tokio::test(start_paused = true)]
    async fn test_half_open_failure_reopens() {
        let cb = breaker(1, 10, 3);
        cb.record_failure();
        tokio::time::advance(Duration::from_millis(10)).await;
        assert!(cb.can_proceed());

        cb.record_failure();
        assert_eq!(cb.state(), CircuitState::Open);
        assert!(!cb.can_proceed());
    }

    #[test]
    fn test_failure_in_open_only_updates_timestamp() {
        let cb = breaker(1, 60_000, 1);
        cb.record_failure();
        cb.record_failure();
        let metrics = cb.metrics();
        assert_eq!(metrics.state, CircuitState::Open);
        assert_eq!(metrics.consecutive_failures, 1);
        assert_eq!(metrics.total_failures, 2);
    }

    #[test]
    fn test_force_state_and_reset() {
        let cb = breaker(5, 60_000, 1);
        cb.force_state(CircuitState::Open);
        assert!(!cb.can_proceed());
        assert!(cb.remaining_cooldown() > Duration::ZERO);

        cb.reset();
        assert_eq!(cb.state(), CircuitState::Closed);
        assert!(cb.can_proceed());
    }

    #[test]
    fn test_failure_rate() {
        let cb = breaker(10, 100, 1);
        assert_eq!(cb.metrics().failure_rate, 0.0);
        for _ in 0..4 {
            assert!(cb.can_proceed());
        }
        cb.record_failure();
        cb.record_success();
        cb.record_success();
        cb.record_success();
        let metrics = cb.metrics();
        assert_eq!(metrics.total_requests, 4);
        assert_eq!(metrics.total_successes, 3);
        assert!((metrics.failure_rate - 0.25).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn test_execute_records_outcomes() {
        let cb = breaker(2, 60_000, 1);

        let ok: Result<u32, CircuitError<String>> = cb.execute(async { Ok(7) }).await;
        assert_eq!(ok, Ok(7));

        for _ in 0..2 {
            let err = cb.execute(async { Err::<u32, _>("boom".to_string()) }).await;
            assert_eq!(err, Err(CircuitError::Inner("boom".to_string())));
        }

        let rejected = cb.execute(async { Ok::<u32, String>(1) }).await;
        match rejected {
            Err(CircuitError::Open(ResilienceError::CircuitOpen { name, remaining_cooldown_ms })) => {
                assert_eq!(name, "test");
                assert!(remaining_cooldown_ms > 0);
            }
            other => panic!("expected open rejection, got {:?}", other),
        }
    }

    #[test]
    fn test_state_display() {
        assert_eq!(CircuitState::Closed.to_string(), "CLOSED");
        assert_eq!(CircuitState::Open.to_string(), "OPEN");
        assert_eq!(CircuitState::HalfOpen.to_string(), "HALF_OPEN");
        assert_eq!(serde_json::to_string(&CircuitState::HalfOpen).unwrap(), "\"HALF_OPEN\"");
    }
}
