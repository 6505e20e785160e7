//! Configuration for resilient calls
//!
//! [`RpcConfig`] describes one call class. [`ClientSettings`] is the
//! declarative document a client is built from: the global limit, a default
//! call class, and per-operation overrides by exact name or name prefix.
//! Settings load from YAML and can be overridden from the environment.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::env;
use std::fs;
use std::path::Path;
use tracing::{info, warn};

use crate::backoff::BackoffStrategy;
use crate::circuit_breaker::CircuitBreakerConfig;
use crate::error::ResilienceError;
use crate::rate_limiter::RateLimiterConfig;

/// Immutable per-call-class configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcConfig {
    /// Retries after the first attempt
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Delay strategy between attempts
    #[serde(default)]
    pub backoff: BackoffStrategy,

    /// Requests allowed per window for this operation
    #[serde(default = "default_max_requests")]
    pub max_requests: u32,

    /// Rate limit window in milliseconds
    #[serde(default = "default_window_ms")]
    pub window_ms: u64,

    /// Consecutive failures that open the circuit
    #[serde(default = "default_circuit_failure_threshold")]
    pub circuit_failure_threshold: u32,

    /// Cooldown before an open circuit admits probes, in milliseconds
    #[serde(default = "default_circuit_reset_timeout_ms")]
    pub circuit_reset_timeout_ms: u64,

    /// Probes admitted while half-open (and successes needed to close)
    #[serde(default = "default_half_open_requests")]
    pub half_open_requests: u32,

    /// Emit an audit event before the call is attempted
    #[serde(default)]
    pub requires_audit_log: bool,
}

// Default values
fn default_max_retries() -> u32 { 3 }
fn default_max_requests() -> u32 { 100 }
fn default_window_ms() -> u64 { 60_000 }
fn default_circuit_failure_threshold() -> u32 { 5 }
fn default_circuit_reset_timeout_ms() -> u64 { 30_000 }
fn default_half_open_requests() -> u32 { 3 }

impl Default for RpcConfig {
    fn default() -> Self {
        Self::standard()
    }
}

impl RpcConfig {
    /// Ordinary calls: 3 retries, 100 requests/min, breaker at 5 failures
    pub fn standard() -> Self {
        Self {
            max_retries: default_max_retries(),
            backoff: BackoffStrategy::default(),
            max_requests: default_max_requests(),
            window_ms: default_window_ms(),
            circuit_failure_threshold: default_circuit_failure_threshold(),
            circuit_reset_timeout_ms: default_circuit_reset_timeout_ms(),
            half_open_requests: default_half_open_requests(),
            requires_audit_log: false,
        }
    }

    /// State-changing calls: audited, fewer retries, trips sooner
    pub fn critical() -> Self {
        Self {
            max_retries: 2,
            max_requests: 30,
            circuit_failure_threshold: 3,
            circuit_reset_timeout_ms: 60_000,
            half_open_requests: 1,
            requires_audit_log: true,
            ..Self::standard()
        }
    }

    /// Idempotent reads: more retries and a higher rate
    pub fn query() -> Self {
        Self {
            max_retries: 5,
            max_requests: 300,
            ..Self::standard()
        }
    }

    /// Single attempt, no backoff
    pub fn no_retry() -> Self {
        Self {
            max_retries: 0,
            backoff: BackoffStrategy::None,
            ..Self::standard()
        }
    }

    /// Builder-style override of the retry count
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Builder-style override of the backoff strategy
    pub fn with_backoff(mut self, backoff: BackoffStrategy) -> Self {
        self.backoff = backoff;
        self
    }

    /// Builder-style override of the rate limit
    pub fn with_rate_limit(mut self, max_requests: u32, window_ms: u64) -> Self {
        self.max_requests = max_requests;
        self.window_ms = window_ms;
        self
    }

    /// Builder-style override of the breaker thresholds
    pub fn with_circuit(mut self, failure_threshold: u32, reset_timeout_ms: u64, half_open_requests: u32) -> Self {
        self.circuit_failure_threshold = failure_threshold;
        self.circuit_reset_timeout_ms = reset_timeout_ms;
        self.half_open_requests = half_open_requests;
        self
    }

    /// Builder-style toggle of audit logging
    pub fn with_audit_log(mut self, requires_audit_log: bool) -> Self {
        self.requires_audit_log = requires_audit_log;
        self
    }

    /// Breaker configuration derived from this call class
    pub fn circuit_breaker_config(&self) -> CircuitBreakerConfig {
        CircuitBreakerConfig {
            failure_threshold: self.circuit_failure_threshold,
            reset_timeout_ms: self.circuit_reset_timeout_ms,
            half_open_requests: self.half_open_requests,
        }
    }

    /// Limiter configuration derived from this call class
    pub fn rate_limiter_config(&self) -> RateLimiterConfig {
        RateLimiterConfig {
            max_requests: self.max_requests,
            window_ms: self.window_ms,
        }
    }

    /// Semantic checks, collecting every problem found
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();
        if self.max_requests == 0 {
            errors.push("max_requests must be greater than 0".to_string());
        }
        if self.window_ms == 0 {
            errors.push("window_ms must be greater than 0".to_string());
        }
        if self.circuit_failure_threshold == 0 {
            errors.push("circuit_failure_threshold must be greater than 0".to_string());
        }
        if self.half_open_requests == 0 {
            errors.push("half_open_requests must be greater than 0".to_string());
        }
        if let BackoffStrategy::Exponential { base_ms, multiplier, max_ms, .. } = &self.backoff {
            if *multiplier < 1.0 || !multiplier.is_finite() {
                errors.push(format!("backoff multiplier must be >= 1.0, got {}", multiplier));
            }
            if base_ms > max_ms {
                errors.push(format!("backoff base_ms ({}) exceeds max_ms ({})", base_ms, max_ms));
            }
        }
        if errors.is_empty() { Ok(()) } else { Err(errors) }
    }
}

/// Prefix rule mapping a family of operations to a call class
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PrefixRule {
    /// Operation name prefix, e.g. `"payments."`
    pub prefix: String,
    /// Configuration for matching operations
    pub config: RpcConfig,
}

/// Static per-operation defaults
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct OperationDefaults {
    /// Fallback for operations without a specific entry
    #[serde(default)]
    pub default: RpcConfig,

    /// Exact operation name → configuration
    #[serde(default)]
    pub operations: HashMap<String, RpcConfig>,

    /// Prefix rules; the longest matching prefix wins
    #[serde(default)]
    pub prefixes: Vec<PrefixRule>,
}

impl OperationDefaults {
    /// Resolve the configuration for `operation`: exact name, then longest
    /// matching prefix, then the default
    pub fn resolve(&self, operation: &str) -> &RpcConfig {
        if let Some(config) = self.operations.get(operation) {
            return config;
        }
        self.prefixes
            .iter()
            .filter(|rule| operation.starts_with(rule.prefix.as_str()))
            .max_by_key(|rule| rule.prefix.len())
            .map(|rule| &rule.config)
            .unwrap_or(&self.default)
    }

    /// Register an exact-name override
    pub fn with_operation(mut self, operation: impl Into<String>, config: RpcConfig) -> Self {
        self.operations.insert(operation.into(), config);
        self
    }

    /// Register a prefix rule
    pub fn with_prefix(mut self, prefix: impl Into<String>, config: RpcConfig) -> Self {
        self.prefixes.push(PrefixRule { prefix: prefix.into(), config });
        self
    }
}

/// Declarative settings a client is built from
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientSettings {
    /// Requests allowed across all operations per global window
    #[serde(default = "default_global_max_requests")]
    pub global_max_requests: u32,

    /// Global window in milliseconds
    #[serde(default = "default_window_ms")]
    pub global_window_ms: u64,

    /// Per-operation call classes
    #[serde(flatten)]
    pub defaults: OperationDefaults,
}

fn default_global_max_requests() -> u32 { 1_000 }

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            global_max_requests: default_global_max_requests(),
            global_window_ms: default_window_ms(),
            defaults: OperationDefaults::default(),
        }
    }
}

impl ClientSettings {
    /// Parse settings from a YAML document
    pub fn from_yaml_str(yaml: &str) -> Result<Self, ResilienceError> {
        serde_yaml::from_str(yaml)
            .map_err(|e| ResilienceError::Configuration(format!("YAML error: {}", e)))
    }

    /// Load settings from a YAML file, apply environment overrides and validate
    pub fn load(path: &Path) -> Result<Self, ResilienceError> {
        let content = fs::read_to_string(path).map_err(|e| {
            ResilienceError::Configuration(format!("Failed to read {}: {}", path.display(), e))
        })?;
        let mut settings = Self::from_yaml_str(&content)?;
        settings.apply_env_overrides();
        settings.validate()?;
        info!(
            path = %path.display(),
            operations = settings.defaults.operations.len(),
            prefixes = settings.defaults.prefixes.len(),
            "Client settings loaded"
        );
        Ok(settings)
    }

    /// Override values from `RAMPART_*` environment variables
    pub fn apply_env_overrides(&mut self) {
        if let Some(value) = env_parse::<u32>("RAMPART_GLOBAL_MAX_REQUESTS") {
            self.global_max_requests = value;
        }
        if let Some(value) = env_parse::<u64>("RAMPART_GLOBAL_WINDOW_MS") {
            self.global_window_ms = value;
        }
        if let Some(value) = env_parse::<u32>("RAMPART_DEFAULT_MAX_RETRIES") {
            self.defaults.default.max_retries = value;
        }
    }

    /// Global limiter configuration
    pub fn global_limit(&self) -> RateLimiterConfig {
        RateLimiterConfig {
            max_requests: self.global_max_requests,
            window_ms: self.global_window_ms,
        }
    }

    /// Configuration for `operation`
    pub fn resolve(&self, operation: &str) -> &RpcConfig {
        self.defaults.resolve(operation)
    }

    /// Validate every call class, reporting all problems at once
    pub fn validate(&self) -> Result<(), ResilienceError> {
        let mut errors = Vec::new();
        if self.global_max_requests == 0 {
            errors.push("global_max_requests must be greater than 0".to_string());
        }
        if self.global_window_ms == 0 {
            errors.push("global_window_ms must be greater than 0".to_string());
        }

        let mut check = |scope: &str, config: &RpcConfig| {
            if let Err(problems) = config.validate() {
                errors.extend(problems.into_iter().map(|p| format!("{}: {}", scope, p)));
            }
        };
        check("default", &self.defaults.default);
        for (name, config) in &self.defaults.operations {
            check(&format!("operations.{}", name), config);
        }
        for rule in &self.defaults.prefixes {
            check(&format!("prefixes.{}", rule.prefix), &rule.config);
        }

        if errors.is_empty() {
            Ok(())
        } else {
            errors.sort();
            Err(ResilienceError::Configuration(errors.join(", ")))
        }
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    let raw = env::var(key).ok()?;
    match raw.parse::<T>() {
        Ok(value) => Some(value),
        Err(_) => {
            warn!("Invalid {} value: {}", key, raw);
            None
        }
    }
}
