//! Keyed singleton registries for breakers and limiters.
//!
//! All callers of the same logical operation must share one breaker and one
//! limiter. Instances are created on first use under the registry's write
//! lock and then live as long as the registry; steady-state lookups only take
//! the read lock. `clear()` exists for tests.

use once_cell::sync::Lazy;
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tracing::{debug, info};

use crate::circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitBreakerMetrics, CircuitState};
use crate::rate_limiter::{CompositeRateLimiter, RateLimiter, RateLimiterConfig, RateLimiterStatus};

/// Name under which the shared global limiter is reported
pub const GLOBAL_LIMITER_NAME: &str = "__global__";

/// Name → instance map handing out one shared `Arc<T>` per name
#[derive(Debug)]
pub struct KeyedRegistry<T> {
    entries: RwLock<HashMap<String, Arc<T>>>,
}

impl<T> Default for KeyedRegistry<T> {
    fn default() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
        }
    }
}

impl<T> KeyedRegistry<T> {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the instance for `name`, building it with `init` on first use.
    ///
    /// Concurrent first calls for the same name all receive the same `Arc`;
    /// `init` runs at most once per name.
    pub fn get_or_create(&self, name: &str, init: impl FnOnce() -> T) -> Arc<T> {
        if let Some(existing) = self.entries.read().get(name) {
            return existing.clone();
        }

        let mut entries = self.entries.write();
        entries
            .entry(name.to_string())
            .or_insert_with(|| {
                debug!(name, "Registering new instance");
                Arc::new(init())
            })
            .clone()
    }

    /// Instance for `name`, if one was created
    pub fn get(&self, name: &str) -> Option<Arc<T>> {
        self.entries.read().get(name).cloned()
    }

    /// Every registered instance, sorted by name
    pub fn snapshot(&self) -> Vec<(String, Arc<T>)> {
        let mut all: Vec<_> = self
            .entries
            .read()
            .iter()
            .map(|(name, value)| (name.clone(), value.clone()))
            .collect();
        all.sort_by(|a, b| a.0.cmp(&b.0));
        all
    }

    /// Number of registered instances
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// Whether nothing has been registered
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// Drop every instance. Intended for tests.
    pub fn clear(&self) {
        self.entries.write().clear();
    }
}

/// Circuit breakers keyed by operation name
#[derive(Debug, Default)]
pub struct CircuitBreakerRegistry {
    breakers: KeyedRegistry<CircuitBreaker>,
}

impl CircuitBreakerRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Breaker for `name`; `config` only applies when the breaker is created
    pub fn get_or_create(&self, name: &str, config: &CircuitBreakerConfig) -> Arc<CircuitBreaker> {
        self.breakers
            .get_or_create(name, || CircuitBreaker::new(name, config.clone()))
    }

    /// Breaker for `name`, if one exists
    pub fn get(&self, name: &str) -> Option<Arc<CircuitBreaker>> {
        self.breakers.get(name)
    }

    /// Metrics of every registered breaker
    pub fn health_status(&self) -> BTreeMap<String, CircuitBreakerMetrics> {
        self.breakers
            .snapshot()
            .into_iter()
            .map(|(name, breaker)| (name, breaker.metrics()))
            .collect()
    }

    /// Names of breakers currently open
    pub fn open_circuits(&self) -> Vec<String> {
        self.breakers
            .snapshot()
            .into_iter()
            .filter(|(_, breaker)| breaker.state() == CircuitState::Open)
            .map(|(name, _)| name)
            .collect()
    }

    /// Reset one breaker; `false` when no breaker has that name
    pub fn reset(&self, name: &str) -> bool {
        match self.breakers.get(name) {
            Some(breaker) => {
                breaker.reset();
                true
            }
            None => false,
        }
    }

    /// Reset every breaker
    pub fn reset_all(&self) {
        for (_, breaker) in self.breakers.snapshot() {
            breaker.reset();
        }
    }

    /// Number of registered breakers
    pub fn len(&self) -> usize {
        self.breakers.len()
    }

    /// Whether no breaker has been created
    pub fn is_empty(&self) -> bool {
        self.breakers.is_empty()
    }

    /// Drop every breaker. Intended for tests.
    pub fn clear(&self) {
        self.breakers.clear();
    }
}

/// Rate limiters keyed by operation name, plus one global limiter
#[derive(Debug)]
pub struct RateLimiterRegistry {
    limiters: KeyedRegistry<RateLimiter>,
    global: Arc<RateLimiter>,
}

impl Default for RateLimiterRegistry {
    fn default() -> Self {
        Self::new(RateLimiterConfig {
            max_requests: 1_000,
            window_ms: 60_000,
        })
    }
}

impl RateLimiterRegistry {
    /// Create a registry whose global limiter uses `global_config`
    pub fn new(global_config: RateLimiterConfig) -> Self {
        Self {
            limiters: KeyedRegistry::new(),
            global: Arc::new(RateLimiter::new(GLOBAL_LIMITER_NAME, global_config)),
        }
    }

    /// Limiter for `name`; `config` only applies when the limiter is created
    pub fn get_or_create(&self, name: &str, config: &RateLimiterConfig) -> Arc<RateLimiter> {
        self.limiters
            .get_or_create(name, || RateLimiter::new(name, config.clone()))
    }

    /// Limiter for `name`, if one exists
    pub fn get(&self, name: &str) -> Option<Arc<RateLimiter>> {
        self.limiters.get(name)
    }

    /// The limiter shared by every operation
    pub fn global(&self) -> Arc<RateLimiter> {
        self.global.clone()
    }

    /// Per-operation limiter followed by the global limiter
    pub fn composite_for(&self, name: &str, config: &RateLimiterConfig) -> CompositeRateLimiter {
        CompositeRateLimiter::new(vec![self.get_or_create(name, config), self.global()])
    }

    /// Status of every per-operation limiter and the global limiter
    pub fn status(&self) -> BTreeMap<String, RateLimiterStatus> {
        let mut status: BTreeMap<String, RateLimiterStatus> = self
            .limiters
            .snapshot()
            .into_iter()
            .map(|(name, limiter)| (name, limiter.status()))
            .collect();
        status.insert(GLOBAL_LIMITER_NAME.to_string(), self.global.status());
        status
    }

    /// Clear every limiter window, the global one included
    pub fn reset_all(&self) {
        for (_, limiter) in self.limiters.snapshot() {
            limiter.reset();
        }
        self.global.reset();
    }

    /// Number of per-operation limiters
    pub fn len(&self) -> usize {
        self.limiters.len()
    }

    /// Whether no per-operation limiter has been created
    pub fn is_empty(&self) -> bool {
        self.limiters.is_empty()
    }

    /// Drop every per-operation limiter and empty the global window. Intended for tests.
    pub fn clear(&self) {
        self.limiters.clear();
        self.global.reset();
    }
}

static SHARED: Lazy<Arc<Registries>> = Lazy::new(|| Arc::new(Registries::default()));

/// The breaker and limiter registries a client works against
#[derive(Debug, Default)]
pub struct Registries {
    /// Circuit breakers per operation
    pub circuit_breakers: CircuitBreakerRegistry,
    /// Rate limiters per operation plus the global limiter
    pub rate_limiters: RateLimiterRegistry,
}

impl Registries {
    /// Fresh registries with the given global limiter configuration
    pub fn new(global_limit: RateLimiterConfig) -> Self {
        Self {
            circuit_breakers: CircuitBreakerRegistry::new(),
            rate_limiters: RateLimiterRegistry::new(global_limit),
        }
    }

    /// Process-wide registries shared by every client that does not inject its own
    pub fn shared() -> Arc<Registries> {
        SHARED.clone()
    }

    /// Reset every breaker and empty every limiter window
    pub fn reset_all(&self) {
        self.circuit_breakers.reset_all();
        self.rate_limiters.reset_all();
        info!("All circuit breakers and rate limiters reset");
    }

    /// Drop all instances. Intended for tests.
    pub fn clear(&self) {
        self.circuit_breakers.clear();
        self.rate_limiters.clear();
    }
}
