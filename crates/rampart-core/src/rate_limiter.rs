//! Sliding-window rate limiting.
//!
//! Each limiter keeps the instants of the requests it granted during the
//! trailing window. A request is granted while fewer than `max_requests`
//! instants are younger than the window, so any interval of `window_ms`
//! contains at most `max_requests` grants.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, trace};

use crate::error::ResilienceError;

/// Upper bound on a single sleep inside [`RateLimiter::acquire`]
const MAX_ACQUIRE_POLL: Duration = Duration::from_millis(100);
/// Lower bound on a single sleep inside [`RateLimiter::acquire`]
const MIN_ACQUIRE_POLL: Duration = Duration::from_millis(10);

/// Rate limiter configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimiterConfig {
    /// Maximum number of requests allowed in the window
    pub max_requests: u32,
    /// Window length in milliseconds
    pub window_ms: u64,
}

impl Default for RateLimiterConfig {
    fn default() -> Self {
        Self {
            max_requests: 100,
            window_ms: 60_000, // 1 minute
        }
    }
}

/// Advisory view of a limiter
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimiterStatus {
    /// Requests granted within the current window
    pub current_count: u32,
    /// Requests still available within the current window
    pub remaining_requests: u32,
    /// Time until the next request would be granted
    pub wait_time_ms: u64,
}

/// Sliding-window rate limiter
#[derive(Debug)]
pub struct RateLimiter {
    name: String,
    config: RateLimiterConfig,
    granted: Mutex<VecDeque<Instant>>,
}

impl RateLimiter {
    /// Create a new rate limiter
    pub fn new(name: impl Into<String>, config: RateLimiterConfig) -> Self {
        Self {
            name: name.into(),
            config,
            granted: Mutex::new(VecDeque::new()),
        }
    }

    /// Name of the limited operation
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Configuration the limiter was created with
    pub fn config(&self) -> &RateLimiterConfig {
        &self.config
    }

    fn window(&self) -> Duration {
        Duration::from_millis(self.config.window_ms)
    }

    fn prune(&self, granted: &mut VecDeque<Instant>, now: Instant) {
        let window = self.window();
        while let Some(oldest) = granted.front() {
            if now.saturating_duration_since(*oldest) >= window {
                granted.pop_front();
            } else {
                break;
            }
        }
    }

    fn wait_time_locked(&self, granted: &VecDeque<Instant>, now: Instant) -> Duration {
        if (granted.len() as u64) < self.config.max_requests as u64 {
            return Duration::ZERO;
        }
        match granted.front() {
            Some(oldest) => (*oldest + self.window()).saturating_duration_since(now),
            None => Duration::ZERO,
        }
    }

    /// Try to take a slot in the current window
    pub fn try_acquire(&self) -> bool {
        let mut granted = self.granted.lock();
        let now = Instant::now();
        self.prune(&mut granted, now);

        if (granted.len() as u64) < self.config.max_requests as u64 {
            granted.push_back(now);
            trace!(
                limiter = %self.name,
                count = granted.len(),
                max = self.config.max_requests,
                "Rate limiter granted request"
            );
            true
        } else {
            debug!(limiter = %self.name, max = self.config.max_requests, "Rate limit reached");
            false
        }
    }

    /// Wait up to `timeout` for a slot.
    ///
    /// Sleeps until the oldest grant is expected to expire (bounded to
    /// 10..=100 ms per poll) and returns `false` once the timeout is spent.
    pub async fn acquire(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            if self.try_acquire() {
                return true;
            }
            let now = Instant::now();
            if now >= deadline {
                debug!(limiter = %self.name, timeout_ms = timeout.as_millis() as u64, "Gave up waiting for rate limiter");
                return false;
            }
            let pause = self
                .wait_time()
                .clamp(MIN_ACQUIRE_POLL, MAX_ACQUIRE_POLL)
                .min(deadline - now);
            tokio::time::sleep(pause).await;
        }
    }

    /// Time until [`try_acquire`](Self::try_acquire) would succeed
    pub fn wait_time(&self) -> Duration {
        let mut granted = self.granted.lock();
        let now = Instant::now();
        self.prune(&mut granted, now);
        self.wait_time_locked(&granted, now)
    }

    /// [`wait_time`](Self::wait_time) in whole milliseconds, rounded up
    pub fn wait_time_ms(&self) -> u64 {
        duration_to_ms_ceil(self.wait_time())
    }

    /// Requests granted within the current window
    pub fn current_count(&self) -> u32 {
        let mut granted = self.granted.lock();
        self.prune(&mut granted, Instant::now());
        granted.len() as u32
    }

    /// Requests still available within the current window
    pub fn remaining_requests(&self) -> u32 {
        self.config.max_requests.saturating_sub(self.current_count())
    }

    /// Snapshot of count, remaining and wait time
    pub fn status(&self) -> RateLimiterStatus {
        let mut granted = self.granted.lock();
        let now = Instant::now();
        self.prune(&mut granted, now);
        let current_count = granted.len() as u32;
        RateLimiterStatus {
            current_count,
            remaining_requests: self.config.max_requests.saturating_sub(current_count),
            wait_time_ms: duration_to_ms_ceil(self.wait_time_locked(&granted, now)),
        }
    }

    /// Forget every granted request
    pub fn reset(&self) {
        self.granted.lock().clear();
        debug!(limiter = %self.name, "Rate limiter reset");
    }

    /// Rejection error for this limiter
    pub fn limited_error(&self) -> ResilienceError {
        ResilienceError::RateLimited {
            name: self.name.clone(),
            wait_ms: self.wait_time_ms(),
        }
    }
}

fn duration_to_ms_ceil(d: Duration) -> u64 {
    let ms = d.as_millis() as u64;
    if d > Duration::from_millis(ms) { ms + 1 } else { ms }
}

/// Conjunction of several limiters; a request must pass all of them.
///
/// Limiters are checked in order. When a later limiter denies, slots already
/// taken from earlier limiters stay consumed.
#[derive(Debug, Clone)]
pub struct CompositeRateLimiter {
    limiters: Vec<Arc<RateLimiter>>,
}

impl CompositeRateLimiter {
    /// Combine the given limiters
    pub fn new(limiters: Vec<Arc<RateLimiter>>) -> Self {
        Self { limiters }
    }

    /// Member limiters in check order
    pub fn limiters(&self) -> &[Arc<RateLimiter>] {
        &self.limiters
    }

    /// Take a slot from every limiter, stopping at the first denial
    pub fn try_acquire(&self) -> bool {
        self.first_denial().is_none()
    }

    /// Like [`try_acquire`](Self::try_acquire), returning the denying limiter's error
    pub fn check(&self) -> Result<(), ResilienceError> {
        match self.first_denial() {
            None => Ok(()),
            Some(limiter) => Err(limiter.limited_error()),
        }
    }

    fn first_denial(&self) -> Option<&Arc<RateLimiter>> {
        self.limiters.iter().find(|limiter| !limiter.try_acquire())
    }

    /// Wait up to `timeout` for all limiters to grant.
    ///
    /// While any member is full only [`wait_time`](Self::wait_time) is polled,
    /// so waiting takes no slots. A slot is taken only once every member
    /// reports capacity.
    pub async fn acquire(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            let wait = self.wait_time();
            if wait.is_zero() && self.try_acquire() {
                return true;
            }
            let now = Instant::now();
            if now >= deadline {
                debug!(timeout_ms = timeout.as_millis() as u64, "Gave up waiting for composite rate limiter");
                return false;
            }
            let pause = wait.clamp(MIN_ACQUIRE_POLL, MAX_ACQUIRE_POLL).min(deadline - now);
            tokio::time::sleep(pause).await;
        }
    }

    /// Longest wait among the members
    pub fn wait_time(&self) -> Duration {
        self.limiters
            .iter()
            .map(|limiter| limiter.wait_time())
            .max()
            .unwrap_or(Duration::ZERO)
    }
}
