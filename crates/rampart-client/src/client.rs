//! Resilient RPC client
//!
//! Every call runs the same protocol:
//!
//! 1. resolve the effective [`RpcConfig`] (explicit override, else the
//!    per-operation defaults from [`ClientSettings`])
//! 2. emit an audit event when the call class asks for one
//! 3. fail fast with `CircuitOpen` if the operation's breaker denies
//! 4. fail fast with `RateLimited` if the operation limiter or the global
//!    limiter denies
//! 5. invoke the transport, retrying retryable failures with backoff
//!
//! Rejections in steps 3 and 4 never reach the transport and never count as
//! breaker failures. Every transport failure is recorded on the breaker, even
//! when a later retry succeeds.
//!
//! Dropping a call future is safe at any await point: outcomes are recorded
//! as soon as each attempt finishes, and an admission that never produced an
//! outcome is handed back to the breaker.

use futures::future::join_all;
use rampart_core::{
    CircuitBreakerMetrics, ClientSettings, RateLimiterStatus, Registries, RpcConfig, RpcError, RpcResult,
};
use rampart_monitoring::{CallOutcome, RejectionReason, RpcMetrics};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use tokio::time::Instant;
use tracing::{debug, info, instrument, warn};

use crate::audit::{AuditEvent, AuditSink, TracingAuditSink};
use crate::transport::RpcTransport;

/// Client wrapping a transport with circuit breaking, rate limiting and retry
#[derive(Clone)]
pub struct ResilientRpcClient {
    transport: Arc<dyn RpcTransport>,
    registries: Arc<Registries>,
    settings: Arc<ClientSettings>,
    audit: Arc<dyn AuditSink>,
}

impl fmt::Debug for ResilientRpcClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResilientRpcClient")
            .field("settings", &self.settings)
            .field("circuit_breakers", &self.registries.circuit_breakers.len())
            .field("rate_limiters", &self.registries.rate_limiters.len())
            .finish_non_exhaustive()
    }
}

impl ResilientRpcClient {
    /// Client with default settings, its own registries and tracing audit sink
    pub fn new<T: RpcTransport + 'static>(transport: T) -> Self {
        let settings = ClientSettings::default();
        Self {
            transport: Arc::new(transport),
            registries: Arc::new(Registries::new(settings.global_limit())),
            settings: Arc::new(settings),
            audit: Arc::new(TracingAuditSink),
        }
    }

    /// Start building a client
    pub fn builder() -> ResilientRpcClientBuilder {
        ResilientRpcClientBuilder::default()
    }

    /// Settings the client resolves call classes from
    pub fn settings(&self) -> &ClientSettings {
        &self.settings
    }

    /// Breaker and limiter registries used by this client
    pub fn registries(&self) -> &Arc<Registries> {
        &self.registries
    }

    /// Call `operation` with the configured call class for it
    pub async fn call<P, R>(&self, operation: &str, params: P) -> RpcResult<R>
    where
        P: Serialize,
        R: DeserializeOwned,
    {
        let config = self.settings.resolve(operation).clone();
        self.call_typed(operation, params, &config).await
    }

    /// Call `operation` with an explicit call class instead of the configured one
    pub async fn call_with_config<P, R>(&self, operation: &str, params: P, config: &RpcConfig) -> RpcResult<R>
    where
        P: Serialize,
        R: DeserializeOwned,
    {
        config
            .validate()
            .map_err(|errors| RpcError::Configuration(errors.join("; ")))?;
        self.call_typed(operation, params, config).await
    }

    /// Call `operation` with raw JSON parameters and result
    pub async fn call_raw(&self, operation: &str, params: Value) -> RpcResult<Value> {
        let config = self.settings.resolve(operation).clone();
        self.execute(operation, params, &config).await
    }

    /// Run every call concurrently; results come back in input order.
    ///
    /// Each call goes through its own circuit and rate checks, so one failing
    /// operation does not affect the others.
    pub async fn batch<R>(&self, calls: Vec<(String, Value)>) -> Vec<RpcResult<R>>
    where
        R: DeserializeOwned,
    {
        debug!(calls = calls.len(), "Starting batch");
        join_all(
            calls
                .into_iter()
                .map(|(operation, params)| async move { self.call::<Value, R>(&operation, params).await }),
        )
        .await
    }

    /// Metrics of every breaker created so far
    pub fn health_status(&self) -> BTreeMap<String, CircuitBreakerMetrics> {
        self.registries.circuit_breakers.health_status()
    }

    /// Status of every limiter created so far, the global limiter included
    pub fn rate_limiter_status(&self) -> BTreeMap<String, RateLimiterStatus> {
        self.registries.rate_limiters.status()
    }

    /// Operations whose circuit is currently open
    pub fn open_circuits(&self) -> Vec<String> {
        self.registries.circuit_breakers.open_circuits()
    }

    /// Close the circuit of one operation; `false` if it has no breaker yet
    pub fn reset_circuit(&self, operation: &str) -> bool {
        let reset = self.registries.circuit_breakers.reset(operation);
        if reset {
            info!(operation, "Circuit manually reset");
        }
        reset
    }

    /// Reset every breaker and empty every limiter window
    pub fn reset_all(&self) {
        self.registries.reset_all();
    }

    async fn call_typed<P, R>(&self, operation: &str, params: P, config: &RpcConfig) -> RpcResult<R>
    where
        P: Serialize,
        R: DeserializeOwned,
    {
        let params = serde_json::to_value(params).map_err(|e| RpcError::Serialization(e.to_string()))?;
        let value = self.execute(operation, params, config).await?;
        serde_json::from_value(value).map_err(|e| RpcError::Decode {
            operation: operation.to_string(),
            message: e.to_string(),
        })
    }

    #[instrument(skip(self, params, config), fields(max_retries = config.max_retries))]
    async fn execute(&self, operation: &str, params: Value, config: &RpcConfig) -> RpcResult<Value> {
        let started = Instant::now();

        if config.requires_audit_log {
            self.audit.record(&AuditEvent::new(operation, &params, config));
        }

        let breaker = self
            .registries
            .circuit_breakers
            .get_or_create(operation, &config.circuit_breaker_config());
        let Some(mut permit) = breaker.admit() else {
            let err = breaker.open_error();
            warn!(operation, error = %err, "Call rejected by circuit breaker");
            RpcMetrics::record_rejection(operation, RejectionReason::CircuitOpen);
            RpcMetrics::record_call(operation, CallOutcome::Rejected, 0, elapsed_ms(started));
            return Err(err.into());
        };

        let limiter = self
            .registries
            .rate_limiters
            .composite_for(operation, &config.rate_limiter_config());
        if let Err(err) = limiter.check() {
            // The unsettled permit hands its admission back when dropped
            drop(permit);
            debug!(operation, error = %err, "Call rejected by rate limiter");
            RpcMetrics::record_rejection(operation, RejectionReason::RateLimited);
            RpcMetrics::record_call(operation, CallOutcome::Rejected, 0, elapsed_ms(started));
            return Err(err.into());
        }

        let mut attempt: u32 = 0;
        loop {
            attempt += 1;
            RpcMetrics::record_attempt(operation, attempt);

            match self.transport.invoke(operation, params.clone()).await {
                Ok(value) => {
                    permit.record_success();
                    RpcMetrics::record_circuit_state(operation, breaker.state());
                    RpcMetrics::record_call(operation, CallOutcome::Success, attempt, elapsed_ms(started));
                    if attempt > 1 {
                        info!(operation, attempt, "Call succeeded after retry");
                    }
                    return Ok(value);
                }
                Err(err) => {
                    permit.record_failure();
                    RpcMetrics::record_circuit_state(operation, breaker.state());

                    let retries_used = attempt - 1;
                    if err.is_retryable() && retries_used < config.max_retries {
                        let delay = config.backoff.delay_for(attempt);
                        debug!(
                            operation,
                            attempt,
                            delay_ms = delay.as_millis() as u64,
                            error = %err,
                            "Retryable failure, backing off"
                        );
                        tokio::time::sleep(delay).await;
                        continue;
                    }

                    warn!(
                        operation,
                        attempts = attempt,
                        retryable = err.is_retryable(),
                        error = %err,
                        "Call failed"
                    );
                    RpcMetrics::record_call(operation, CallOutcome::Failure, attempt, elapsed_ms(started));
                    return Err(RpcError::Transport {
                        operation: operation.to_string(),
                        attempts: attempt,
                        source: err,
                    });
                }
            }
        }
    }
}

fn elapsed_ms(started: Instant) -> f64 {
    started.elapsed().as_secs_f64() * 1_000.0
}

/// Builder for [`ResilientRpcClient`]
#[derive(Default)]
pub struct ResilientRpcClientBuilder {
    transport: Option<Arc<dyn RpcTransport>>,
    registries: Option<Arc<Registries>>,
    settings: Option<ClientSettings>,
    audit: Option<Arc<dyn AuditSink>>,
}

impl fmt::Debug for ResilientRpcClientBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResilientRpcClientBuilder")
            .field("has_transport", &self.transport.is_some())
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

impl ResilientRpcClientBuilder {
    /// Transport performing the remote calls (required)
    pub fn transport<T: RpcTransport + 'static>(mut self, transport: T) -> Self {
        self.transport = Some(Arc::new(transport));
        self
    }

    /// Shared transport handle
    pub fn transport_arc(mut self, transport: Arc<dyn RpcTransport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Registries to share breakers and limiters with other clients
    pub fn registries(mut self, registries: Arc<Registries>) -> Self {
        self.registries = Some(registries);
        self
    }

    /// Use the process-wide registries
    pub fn shared_registries(self) -> Self {
        self.registries(Registries::shared())
    }

    /// Call classes and global limit
    pub fn settings(mut self, settings: ClientSettings) -> Self {
        self.settings = Some(settings);
        self
    }

    /// Where audit events go; defaults to [`TracingAuditSink`]
    pub fn audit_sink<A: AuditSink + 'static>(mut self, sink: A) -> Self {
        self.audit = Some(Arc::new(sink));
        self
    }

    /// Shared audit sink handle
    pub fn audit_sink_arc(mut self, sink: Arc<dyn AuditSink>) -> Self {
        self.audit = Some(sink);
        self
    }

    /// Validate settings and build the client.
    ///
    /// Without explicit registries the client gets its own, with the global
    /// limiter sized from the settings.
    pub fn build(self) -> RpcResult<ResilientRpcClient> {
        let transport = self
            .transport
            .ok_or_else(|| RpcError::Configuration("a transport is required".to_string()))?;
        let settings = self.settings.unwrap_or_default();
        settings.validate()?;

        let registries = self
            .registries
            .unwrap_or_else(|| Arc::new(Registries::new(settings.global_limit())));
        let audit = self.audit.unwrap_or_else(|| Arc::new(TracingAuditSink));

        debug!(
            global_max_requests = settings.global_max_requests,
            global_window_ms = settings.global_window_ms,
            "Built resilient RPC client"
        );

        Ok(ResilientRpcClient {
            transport,
            registries,
            settings: Arc::new(settings),
            audit,
        })
    }
}
