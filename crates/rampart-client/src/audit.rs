//! Audit trail for sensitive calls.
//!
//! Call classes with `requires_audit_log` emit one [`AuditEvent`] before the
//! call is attempted, whether or not it is later rejected or fails.

use chrono::{DateTime, Utc};
use rampart_core::RpcConfig;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::info;
use uuid::Uuid;

/// Target used by [`TracingAuditSink`]
pub const AUDIT_TARGET: &str = "rampart::audit";

/// Record of an audited call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEvent {
    /// Unique event id
    pub id: Uuid,
    /// Operation about to be called
    pub operation: String,
    /// Call parameters as sent to the transport
    pub params: Value,
    /// Retry budget of the call class
    pub max_retries: u32,
    /// When the call was started
    pub timestamp: DateTime<Utc>,
}

impl AuditEvent {
    /// Build an event for a call about to start
    pub fn new(operation: &str, params: &Value, config: &RpcConfig) -> Self {
        Self {
            id: Uuid::new_v4(),
            operation: operation.to_string(),
            params: params.clone(),
            max_retries: config.max_retries,
            timestamp: Utc::now(),
        }
    }
}

/// Destination for audit events
pub trait AuditSink: Send + Sync {
    /// Record one event; must not block for long
    fn record(&self, event: &AuditEvent);
}

/// Writes audit events as `info` events under the `rampart::audit` target
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingAuditSink;

impl AuditSink for TracingAuditSink {
    fn record(&self, event: &AuditEvent) {
        info!(
            target: AUDIT_TARGET,
            audit_id = %event.id,
            operation = %event.operation,
            max_retries = event.max_retries,
            timestamp = %event.timestamp.to_rfc3339(),
            "Audited remote call"
        );
    }
}

/// Discards audit events
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopAuditSink;

impl AuditSink for NoopAuditSink {
    fn record(&self, _event: &AuditEvent) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_event_captures_call() {
        let config = RpcConfig::critical();
        let event = AuditEvent::new("payments.transfer", &json!({"amount": 10}), &config);

        assert_eq!(event.operation, "payments.transfer");
        assert_eq!(event.params, json!({"amount": 10}));
        assert_eq!(event.max_retries, config.max_retries);

        let other = AuditEvent::new("payments.transfer", &Value::Null, &config);
        assert_ne!(event.id, other.id);
    }

    #[test]
    fn test_event_serializes() {
        let event = AuditEvent::new("op", &Value::Null, &RpcConfig::standard());
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["operation"], "op");
        assert!(json["timestamp"].is_string());
    }
}
