//! Retry delay strategies.
//!
//! The delay before retry `n` (1-based) under the exponential strategy is
//! `min(base_ms * multiplier^(n-1), max_ms)`, plus up to 10% jitter when
//! enabled.

use rand::Rng;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Delay strategy applied between retry attempts
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BackoffStrategy {
    /// Retry immediately
    None,
    /// Constant delay between attempts
    Fixed {
        /// Delay in milliseconds
        delay_ms: u64,
    },
    /// Capped exponential delay
    Exponential {
        /// Delay before the first retry in milliseconds
        #[serde(default = "default_base_ms")]
        base_ms: u64,
        /// Growth factor per retry
        #[serde(default = "default_multiplier")]
        multiplier: f64,
        /// Upper bound on any single delay in milliseconds
        #[serde(default = "default_max_ms")]
        max_ms: u64,
        /// Add up to 10% random jitter
        #[serde(default = "default_jitter")]
        jitter: bool,
    },
}

fn default_base_ms() -> u64 { 500 }
fn default_multiplier() -> f64 { 2.0 }
fn default_max_ms() -> u64 { 10_000 }
fn default_jitter() -> bool { true }

impl Default for BackoffStrategy {
    fn default() -> Self {
        BackoffStrategy::Exponential {
            base_ms: default_base_ms(),
            multiplier: default_multiplier(),
            max_ms: default_max_ms(),
            jitter: default_jitter(),
        }
    }
}

impl BackoffStrategy {
    /// Exponential strategy without jitter
    pub fn exponential(base_ms: u64, multiplier: f64, max_ms: u64) -> Self {
        BackoffStrategy::Exponential { base_ms, multiplier, max_ms, jitter: false }
    }

    /// Delay to wait before retry number `retry` (1-based).
    ///
    /// `retry == 0` always yields zero: the first attempt is never delayed.
    pub fn delay_for(&self, retry: u32) -> Duration {
        if retry == 0 {
            return Duration::ZERO;
        }

        match self {
            BackoffStrategy::None => Duration::ZERO,
            BackoffStrategy::Fixed { delay_ms } => Duration::from_millis(*delay_ms),
            BackoffStrategy::Exponential { base_ms, multiplier, max_ms, jitter } => {
                let capped = capped_exponential(retry, *base_ms, *multiplier, *max_ms);
                let jitter_ms = if *jitter { jitter_for(capped) } else { 0 };
                Duration::from_millis(capped + jitter_ms)
            }
        }
    }

    /// Largest delay this strategy can produce, jitter included
    pub fn max_delay(&self) -> Duration {
        match self {
            BackoffStrategy::None => Duration::ZERO,
            BackoffStrategy::Fixed { delay_ms } => Duration::from_millis(*delay_ms),
            BackoffStrategy::Exponential { max_ms, jitter, .. } => {
                let extra = if *jitter { max_ms / 10 } else { 0 };
                Duration::from_millis(max_ms + extra)
            }
        }
    }
}

fn capped_exponential(retry: u32, base_ms: u64, multiplier: f64, max_ms: u64) -> u64 {
    let exponent = (retry - 1).min(63) as i32;
    let raw = base_ms as f64 * multiplier.max(1.0).powi(exponent);
    if !raw.is_finite() || raw >= max_ms as f64 {
        max_ms
    } else {
        raw as u64
    }
}

// 0 to 10% of the delay
fn jitter_for(delay_ms: u64) -> u64 {
    let range = delay_ms / 10;
    if range > 0 {
        rand::thread_rng().gen_range(0..range)
    } else {
        0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exponential_growth_and_cap() {
        let strategy = BackoffStrategy::exponential(100, 2.0, 1000);
        assert_eq!(strategy.delay_for(0), Duration::ZERO);
        assert_eq!(strategy.delay_for(1), Duration::from_millis(100));
        assert_eq!(strategy.delay_for(2), Duration::from_millis(200));
        assert_eq!(strategy.delay_for(3), Duration::from_millis(400));
        assert_eq!(strategy.delay_for(5), Duration::from_millis(1000));
        assert_eq!(strategy.delay_for(200), Duration::from_millis(1000));
    }

    #[test]
    fn test_jitter_stays_within_ten_percent() {
        let strategy = BackoffStrategy::default();
        for retry in 1..8 {
            let delay = strategy.delay_for(retry).as_millis() as u64;
            let floor = capped_exponential(retry, 500, 2.0, 10_000);
            assert!(delay >= floor && delay <= floor + floor / 10, "retry {} gave {}ms", retry, delay);
        }
        assert_eq!(strategy.max_delay(), Duration::from_millis(11_000));
    }

    #[test]
    fn test_fixed_and_none() {
        assert_eq!(BackoffStrategy::Fixed { delay_ms: 250 }.delay_for(4), Duration::from_millis(250));
        assert_eq!(BackoffStrategy::None.delay_for(3), Duration::ZERO);
    }

    #[test]
    fn test_deserialize_tagged_strategy() {
        let yaml = "type: exponential\nbase_ms: 50\nmax_ms: 400\n";
        let strategy: BackoffStrategy = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(
            strategy,
            BackoffStrategy::Exponential { base_ms: 50, multiplier: 2.0, max_ms: 400, jitter: true }
        );

        let fixed: BackoffStrategy = serde_yaml::from_str("type: fixed\ndelay_ms: 10\n").unwrap();
        assert_eq!(fixed, BackoffStrategy::Fixed { delay_ms: 10 });
    }
}
