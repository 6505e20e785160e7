//! Rampart Client
//!
//! [`ResilientRpcClient`] wraps an injected [`RpcTransport`] with per-operation
//! circuit breakers, a per-operation and a global rate limit, retry with
//! backoff for retryable failures and an optional audit trail.
//!
//! ```no_run
//! use rampart_client::{transport_fn, ResilientRpcClient};
//! use serde_json::{json, Value};
//!
//! # async fn run() -> Result<(), rampart_client::RpcError> {
//! let client = ResilientRpcClient::builder()
//!     .transport(transport_fn(|_operation: String, params: Value| async move {
//!         Ok::<_, rampart_client::TransportError>(params)
//!     }))
//!     .build()?;
//!
//! let balance: Value = client.call("accounts.getBalance", json!({ "account": "42" })).await?;
//! # let _ = balance;
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod audit;
pub mod client;
pub mod transport;

pub use audit::{AuditEvent, AuditSink, NoopAuditSink, TracingAuditSink, AUDIT_TARGET};
pub use client::{ResilientRpcClient, ResilientRpcClientBuilder};
pub use transport::{transport_fn, FnTransport, RpcTransport};

// Core types callers need alongside the client
pub use rampart_core::{
    BackoffStrategy, CircuitBreakerMetrics, CircuitState, ClientSettings, RateLimiterStatus, Registries,
    RpcConfig, RpcError, RpcResult, TransportError,
};
