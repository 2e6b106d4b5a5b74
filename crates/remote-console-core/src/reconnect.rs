//! Reconnect policy for the event stream.
//!
//! Pure decision logic: given the number of consecutive failed attempts,
//! decide whether to try again and how long to wait first. The stream
//! driver owns the timer; nothing here sleeps.

use std::time::Duration;

use crate::BackoffConfig;

/// Decision for one reconnect attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Reconnect {
    /// Whether another attempt should be made.
    pub should_retry: bool,
    /// How long to wait before it.
    pub delay: Duration,
}

impl Reconnect {
    /// Retry after `delay`.
    #[must_use]
    pub const fn retry(delay: Duration) -> Self {
        Self {
            should_retry: true,
            delay,
        }
    }

    /// Stop retrying.
    #[must_use]
    pub const fn give_up() -> Self {
        Self {
            should_retry: false,
            delay: Duration::ZERO,
        }
    }
}

/// Trait for reconnect policies.
pub trait ReconnectPolicy: Send + Sync {
    /// Decide for the `attempt`-th consecutive failure (1-based).
    fn decide(&self, attempt: u32) -> Reconnect;
}

/// Exponential backoff with a capped delay and optional jitter.
///
/// `delay = min(max, base * multiplier^(attempt - 1))`, then scaled by
/// `1 + r * jitter` for a random `r` in `[0, 1)` and capped again.
#[derive(Debug, Clone, PartialEq)]
pub struct ExponentialBackoff {
    config: BackoffConfig,
}

impl ExponentialBackoff {
    /// Create a policy from configuration.
    #[must_use]
    pub const fn new(config: BackoffConfig) -> Self {
        Self { config }
    }

    /// Decide with an explicit random value in `[0, 1)`.
    #[must_use]
    #[allow(
        clippy::cast_precision_loss,
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss,
        clippy::cast_possible_wrap
    )]
    pub fn decide_with_random(&self, attempt: u32, random: f64) -> Reconnect {
        if self.config.max_attempts.is_some_and(|max| attempt > max) {
            return Reconnect::give_up();
        }

        let exponent = attempt.saturating_sub(1).min(63) as i32;
        let max_ms = self.config.max_delay_ms as f64;
        let exponential = (self.config.base_delay_ms as f64)
            * self.config.multiplier.max(1.0).powi(exponent);
        let capped = exponential.min(max_ms);

        let jitter = self.config.jitter_factor.clamp(0.0, 1.0) * random.clamp(0.0, 1.0);
        let delay_ms = (capped * (1.0 + jitter)).min(max_ms).round() as u64;

        Reconnect::retry(Duration::from_millis(delay_ms))
    }
}

impl Default for ExponentialBackoff {
    fn default() -> Self {
        Self::new(BackoffConfig::default())
    }
}

impl ReconnectPolicy for ExponentialBackoff {
    fn decide(&self, attempt: u32) -> Reconnect {
        let random = if self.config.jitter_factor > 0.0 {
            rand::random::<f64>()
        } else {
            0.0
        };
        self.decide_with_random(attempt, random)
    }
}
