//! Retry Backoff
//!
//! Delay policies applied between failed broker reads. The poll loop asks
//! the policy for a delay after every failure and resets it after every
//! successful read, so a healthy broker is polled without added latency.

use std::fmt;
use std::time::Duration;

use rand::Rng;

/// Delay policy between consecutive failures.
pub trait Backoff: Send + Sync + fmt::Debug {
    /// Delay to wait before the next attempt.
    fn next_delay(&mut self) -> Duration;

    /// Forget previous failures.
    fn reset(&mut self);
}

/// Retry immediately.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoBackoff;

impl Backoff for NoBackoff {
    fn next_delay(&mut self) -> Duration {
        Duration::ZERO
    }

    fn reset(&mut self) {}
}

/// Configuration for exponential backoff.
#[derive(Debug, Clone, PartialEq)]
pub struct BackoffConfig {
    /// Delay after the first failure. Zero disables backoff.
    pub initial_delay: Duration,
    /// Upper bound on the delay.
    pub max_delay: Duration,
    /// Growth factor per consecutive failure.
    pub multiplier: f64,
    /// Jitter as a fraction of the delay (0.1 = ±10%).
    pub jitter_factor: f64,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(5),
            multiplier: 2.0,
            jitter_factor: 0.1,
        }
    }
}

impl BackoffConfig {
    /// Configuration that retries immediately.
    #[must_use]
    pub const fn none() -> Self {
        Self {
            initial_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            multiplier: 1.0,
            jitter_factor: 0.0,
        }
    }

    /// Whether this configuration retries immediately.
    #[must_use]
    pub const fn is_disabled(&self) -> bool {
        self.initial_delay.is_zero()
    }

    /// Build the policy this configuration describes.
    #[must_use]
    pub fn into_policy(self) -> Box<dyn Backoff> {
        if self.is_disabled() {
            Box::new(NoBackoff)
        } else {
            Box::new(ExponentialBackoff::new(self))
        }
    }
}

/// Exponential backoff with jitter, capped at `max_delay`.
#[derive(Debug)]
pub struct ExponentialBackoff {
    config: BackoffConfig,
    current_delay: Duration,
    failures: u32,
}

impl ExponentialBackoff {
    /// Create a policy at its initial delay.
    #[must_use]
    pub const fn new(config: BackoffConfig) -> Self {
        let initial_delay = config.initial_delay;
        Self {
            config,
            current_delay: initial_delay,
            failures: 0,
        }
    }

    /// Consecutive failures since the last reset.
    #[must_use]
    pub const fn failures(&self) -> u32 {
        self.failures
    }

    fn apply_jitter(&self, duration: Duration) -> Duration {
        if self.config.jitter_factor <= 0.0 || duration.is_zero() {
            return duration;
        }

        #[allow(clippy::cast_precision_loss)]
        let base_millis = duration.as_millis() as f64;
        let jitter_range = base_millis * self.config.jitter_factor;
        let jitter: f64 = rand::rng().random_range(-jitter_range..=jitter_range);
        let adjusted_millis = (base_millis + jitter).max(1.0);

        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let adjusted_u64 = adjusted_millis as u64;
        Duration::from_millis(adjusted_u64)
    }
}

impl Backoff for ExponentialBackoff {
    fn next_delay(&mut self) -> Duration {
        self.failures = self.failures.saturating_add(1);
        let delay = self.apply_jitter(self.current_delay);

        #[allow(clippy::cast_precision_loss)]
        let scaled = (self.current_delay.as_millis() as f64 * self.config.multiplier).round();
        let next_millis = if scaled.is_finite() && scaled > 0.0 {
            #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
            {
                scaled as u128
            }
        } else {
            0
        };
        let capped = next_millis.min(self.config.max_delay.as_millis());
        self.current_delay = Duration::from_millis(u64::try_from(capped).unwrap_or(u64::MAX));

        delay
    }

    fn reset(&mut self) {
        self.current_delay = self.config.initial_delay;
        self.failures = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn predictable(initial_ms: u64, max_ms: u64, multiplier: f64) -> ExponentialBackoff {
        ExponentialBackoff::new(BackoffConfig {
            initial_delay: Duration::from_millis(initial_ms),
            max_delay: Duration::from_millis(max_ms),
            multiplier,
            jitter_factor: 0.0,
        })
    }

    #[test]
    fn default_config_values() {
        let config = BackoffConfig::default();
        assert_eq!(config.initial_delay, Duration::from_millis(100));
        assert_eq!(config.max_delay, Duration::from_secs(5));
        assert!((config.multiplier - 2.0).abs() < f64::EPSILON);
        assert!(!config.is_disabled());
    }

    #[test]
    fn delays_double_until_capped() {
        let mut policy = predictable(100, 500, 2.0);

        let delays: Vec<u128> = (0..5).map(|_| policy.next_delay().as_millis()).collect();
        assert_eq!(delays, vec![100, 200, 400, 500, 500]);
        assert_eq!(policy.failures(), 5);
    }

    #[test]
    fn reset_returns_to_initial_delay() {
        let mut policy = predictable(100, 10_000, 2.0);
        let _ = policy.next_delay();
        let _ = policy.next_delay();

        policy.reset();

        assert_eq!(policy.failures(), 0);
        assert_eq!(policy.next_delay(), Duration::from_millis(100));
    }

    #[test]
    fn jitter_stays_within_bounds() {
        for _ in 0..100 {
            let mut policy = ExponentialBackoff::new(BackoffConfig {
                initial_delay: Duration::from_millis(1000),
                jitter_factor: 0.1,
                ..BackoffConfig::default()
            });

            let millis = policy.next_delay().as_millis();
            assert!((900..=1100).contains(&millis), "delay {millis}ms out of range");
        }
    }

    #[test]
    fn zero_initial_delay_disables_backoff() {
        let config = BackoffConfig {
            initial_delay: Duration::ZERO,
            ..BackoffConfig::default()
        };
        assert!(config.is_disabled());

        let mut policy = config.into_policy();
        for _ in 0..10 {
            assert_eq!(policy.next_delay(), Duration::ZERO);
        }
    }

    #[test]
    fn none_is_disabled() {
        let mut policy = BackoffConfig::none().into_policy();
        assert_eq!(policy.next_delay(), Duration::ZERO);
        policy.reset();
        assert_eq!(policy.next_delay(), Duration::ZERO);
    }
}
