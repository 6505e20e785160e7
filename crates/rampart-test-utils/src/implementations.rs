//! Test implementations (fakes) of the transport and the audit sink.

use async_trait::async_trait;
use parking_lot::Mutex;
use rampart_client::{AuditEvent, AuditSink, RpcTransport};
use rampart_core::TransportError;
use serde_json::Value;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Transport that fails a fixed number of times, then succeeds.
///
/// Clones share the attempt counter, so a clone handed to the client can be
/// inspected from the test.
#[derive(Debug, Clone)]
pub struct FlakyTransport {
    failures: u32,
    error: TransportError,
    response: Value,
    attempts: Arc<AtomicU32>,
}

impl FlakyTransport {
    /// Fail `failures` times with `error`, then return `response`
    pub fn new(failures: u32, error: TransportError, response: Value) -> Self {
        Self {
            failures,
            error,
            response,
            attempts: Arc::new(AtomicU32::new(0)),
        }
    }

    /// Never fails
    pub fn healthy(response: Value) -> Self {
        Self::new(0, TransportError::Io("unused".to_string()), response)
    }

    /// Always fails with `error`
    pub fn failing(error: TransportError) -> Self {
        Self::new(u32::MAX, error, Value::Null)
    }

    /// Attempts made so far
    pub fn attempts(&self) -> u32 {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RpcTransport for FlakyTransport {
    async fn invoke(&self, operation: &str, _params: Value) -> Result<Value, TransportError> {
        let attempt = self.attempts.fetch_add(1, Ordering::SeqCst) + 1;
        if attempt <= self.failures {
            debug!(operation, attempt, "FlakyTransport failing");
            Err(self.error.clone())
        } else {
            Ok(self.response.clone())
        }
    }
}

#[derive(Debug, Default)]
struct Script {
    responses: HashMap<String, VecDeque<Result<Value, TransportError>>>,
    calls: HashMap<String, u32>,
    params: Vec<(String, Value)>,
}

/// Transport answering from per-operation queues of scripted responses.
///
/// Once an operation's queue is empty it echoes the parameters back. An
/// optional latency is applied to every call before answering.
#[derive(Debug, Clone, Default)]
pub struct ScriptedTransport {
    script: Arc<Mutex<Script>>,
    latency: Option<Duration>,
}

impl ScriptedTransport {
    /// Create a transport with no scripted responses
    pub fn new() -> Self {
        Self::default()
    }

    /// Sleep this long on every call
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Queue responses for `operation`, consumed in order
    pub fn script(
        &self,
        operation: &str,
        responses: impl IntoIterator<Item = Result<Value, TransportError>>,
    ) -> &Self {
        self.script
            .lock()
            .responses
            .entry(operation.to_string())
            .or_default()
            .extend(responses);
        self
    }

    /// Calls received for `operation`
    pub fn calls(&self, operation: &str) -> u32 {
        self.script.lock().calls.get(operation).copied().unwrap_or(0)
    }

    /// Calls received across all operations
    pub fn total_calls(&self) -> u32 {
        self.script.lock().calls.values().sum()
    }

    /// Every `(operation, params)` received, in arrival order
    pub fn received(&self) -> Vec<(String, Value)> {
        self.script.lock().params.clone()
    }
}

#[async_trait]
impl RpcTransport for ScriptedTransport {
    async fn invoke(&self, operation: &str, params: Value) -> Result<Value, TransportError> {
        let next = {
            let mut script = self.script.lock();
            *script.calls.entry(operation.to_string()).or_insert(0) += 1;
            script.params.push((operation.to_string(), params.clone()));
            script
                .responses
                .get_mut(operation)
                .and_then(|queue| queue.pop_front())
        };

        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
        next.unwrap_or(Ok(params))
    }
}

/// Audit sink keeping every event in memory; clones share the log
#[derive(Debug, Clone, Default)]
pub struct RecordingAuditSink {
    events: Arc<Mutex<Vec<AuditEvent>>>,
}

impl RecordingAuditSink {
    /// Create an empty sink
    pub fn new() -> Self {
        Self::default()
    }

    /// Events recorded so far
    pub fn events(&self) -> Vec<AuditEvent> {
        self.events.lock().clone()
    }

    /// Operations audited so far, in order
    pub fn operations(&self) -> Vec<String> {
        self.events.lock().iter().map(|e| e.operation.clone()).collect()
    }
}

impl AuditSink for RecordingAuditSink {
    fn record(&self, event: &AuditEvent) {
        self.events.lock().push(event.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_flaky_transport_recovers_after_failures() {
        let transport = FlakyTransport::new(2, TransportError::Timeout("t".to_string()), json!("ok"));
        assert!(transport.invoke("op", Value::Null).await.is_err());
        assert!(transport.invoke("op", Value::Null).await.is_err());
        assert_eq!(transport.invoke("op", Value::Null).await.unwrap(), json!("ok"));
        assert_eq!(transport.attempts(), 3);
    }

    #[tokio::test]
    async fn test_scripted_transport_consumes_queue_then_echoes() {
        let transport = ScriptedTransport::new();
        transport.script("op", vec![Err(TransportError::from_status(500, "boom"))]);

        assert!(transport.invoke("op", json!(1)).await.is_err());
        assert_eq!(transport.invoke("op", json!(2)).await.unwrap(), json!(2));
        assert_eq!(transport.calls("op"), 2);
        assert_eq!(transport.calls("other"), 0);
        assert_eq!(transport.received()[1], ("op".to_string(), json!(2)));
    }
}
