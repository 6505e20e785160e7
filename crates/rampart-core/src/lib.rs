//!
//! Rampart Core - resilience primitives for remote calls
//!
//! This crate holds the pieces the resilient client is assembled from:
//! per-operation circuit breakers, sliding-window rate limiters, the keyed
//! registries that share them between callers, retry backoff strategies and
//! the call configuration.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

/// Retry delay strategies
pub mod backoff;

/// Circuit breaker state machine
pub mod circuit_breaker;

/// Call classes and client settings
pub mod config;

/// Error types
pub mod error;

/// Sliding-window rate limiting
pub mod rate_limiter;

/// Keyed singleton registries
pub mod registry;

// Re-export key types
pub use backoff::BackoffStrategy;
pub use circuit_breaker::{
    CircuitBreaker, CircuitBreakerConfig, CircuitBreakerMetrics, CircuitError, CircuitPermit, CircuitState,
};
pub use config::{ClientSettings, OperationDefaults, PrefixRule, RpcConfig};
pub use error::{ResilienceError, RpcError, RpcResult, TransportError};
pub use rate_limiter::{CompositeRateLimiter, RateLimiter, RateLimiterConfig, RateLimiterStatus};
pub use registry::{
    CircuitBreakerRegistry, KeyedRegistry, RateLimiterRegistry, Registries, GLOBAL_LIMITER_NAME,
};
