//! Call metrics.
//!
//! Recorded through the `metrics` facade; without an installed recorder the
//! macros are no-ops. Every recording also leaves a trace-level event.

use metrics::{counter, gauge, histogram};
use rampart_core::CircuitState;
use tracing::trace;

/// Calls by operation and outcome
pub const CALLS_TOTAL: &str = "rampart_rpc_calls_total";
/// Transport attempts by operation
pub const ATTEMPTS_TOTAL: &str = "rampart_rpc_attempts_total";
/// Wall-clock duration of a whole call, retries included
pub const CALL_DURATION_MS: &str = "rampart_rpc_call_duration_ms";
/// Calls rejected before reaching the transport
pub const REJECTIONS_TOTAL: &str = "rampart_rpc_rejections_total";
/// Circuit state per operation: 0 closed, 1 half-open, 2 open
pub const CIRCUIT_STATE: &str = "rampart_circuit_state";

/// Final outcome of a call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallOutcome {
    /// Transport succeeded
    Success,
    /// Transport failed on the last allowed attempt
    Failure,
    /// Rejected by circuit breaker or rate limiter
    Rejected,
}

impl CallOutcome {
    /// Label value
    pub fn as_str(&self) -> &'static str {
        match self {
            CallOutcome::Success => "success",
            CallOutcome::Failure => "failure",
            CallOutcome::Rejected => "rejected",
        }
    }
}

/// Why a call never reached the transport
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectionReason {
    /// Circuit breaker denied the call
    CircuitOpen,
    /// A rate limiter denied the call
    RateLimited,
}

impl RejectionReason {
    /// Label value
    pub fn as_str(&self) -> &'static str {
        match self {
            RejectionReason::CircuitOpen => "circuit_open",
            RejectionReason::RateLimited => "rate_limited",
        }
    }
}

/// Client metrics
pub struct RpcMetrics;

impl RpcMetrics {
    /// Record a finished call
    pub fn record_call(operation: &str, outcome: CallOutcome, attempts: u32, duration_ms: f64) {
        counter!(CALLS_TOTAL, 1, "operation" => operation.to_string(), "outcome" => outcome.as_str());
        histogram!(CALL_DURATION_MS, duration_ms, "operation" => operation.to_string());
        trace!(operation, outcome = outcome.as_str(), attempts, duration_ms, "Recorded call");
    }

    /// Record one transport attempt
    pub fn record_attempt(operation: &str, attempt: u32) {
        counter!(ATTEMPTS_TOTAL, 1, "operation" => operation.to_string());
        trace!(operation, attempt, "Recorded attempt");
    }

    /// Record a rejected call
    pub fn record_rejection(operation: &str, reason: RejectionReason) {
        counter!(REJECTIONS_TOTAL, 1, "operation" => operation.to_string(), "reason" => reason.as_str());
        trace!(operation, reason = reason.as_str(), "Recorded rejection");
    }

    /// Publish the current circuit state of an operation
    pub fn record_circuit_state(operation: &str, state: CircuitState) {
        gauge!(CIRCUIT_STATE, circuit_state_value(state), "operation" => operation.to_string());
        trace!(operation, %state, "Recorded circuit state");
    }
}

/// Gauge value published for a circuit state
pub fn circuit_state_value(state: CircuitState) -> f64 {
    match state {
        CircuitState::Closed => 0.0,
        CircuitState::HalfOpen => 1.0,
        CircuitState::Open => 2.0,
    }
}
