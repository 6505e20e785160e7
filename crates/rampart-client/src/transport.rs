//! The injected "invoke a remote operation" capability.
//!
//! The client never talks to the network itself. Whatever actually moves the
//! bytes (HTTP, a message bus, an in-process stub) implements
//! [`RpcTransport`] and reports failures as [`TransportError`] so they can be
//! classified for retry.

use async_trait::async_trait;
use rampart_core::TransportError;
use serde_json::Value;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

/// Performs one attempt of a remote operation
#[async_trait]
pub trait RpcTransport: Send + Sync {
    /// Invoke `operation` with `params`, returning the raw result
    async fn invoke(&self, operation: &str, params: Value) -> Result<Value, TransportError>;
}

#[async_trait]
impl<T: RpcTransport + ?Sized> RpcTransport for Arc<T> {
    async fn invoke(&self, operation: &str, params: Value) -> Result<Value, TransportError> {
        (**self).invoke(operation, params).await
    }
}

/// Transport backed by an async closure, see [`transport_fn`]
pub struct FnTransport<F> {
    f: F,
}

impl<F> fmt::Debug for FnTransport<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnTransport").finish_non_exhaustive()
    }
}

/// Wrap an async closure taking `(operation, params)` as a transport.
///
/// ```
/// use rampart_client::{transport_fn, TransportError};
/// use serde_json::{json, Value};
///
/// let transport = transport_fn(|operation: String, _params: Value| async move {
///     Ok::<_, TransportError>(json!({ "echo": operation }))
/// });
/// # let _ = transport;
/// ```
pub fn transport_fn<F, Fut>(f: F) -> FnTransport<F>
where
    F: Fn(String, Value) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Value, TransportError>> + Send,
{
    FnTransport { f }
}

#[async_trait]
impl<F, Fut> RpcTransport for FnTransport<F>
where
    F: Fn(String, Value) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Value, TransportError>> + Send,
{
    async fn invoke(&self, operation: &str, params: Value) -> Result<Value, TransportError> {
        (self.f)(operation.to_string(), params).await
    }
}
