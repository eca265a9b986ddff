//! Reconnect backoff: `min(base * multiplier^attempt, max)`.

use std::time::Duration;

use crate::types::{BackoffConfig, DEFAULT_MULTIPLIER};

/// Attempt counter plus the delay policy derived from [`BackoffConfig`].
#[derive(Debug, Clone)]
pub(crate) struct Backoff {
    base: Duration,
    max: Duration,
    multiplier: f64,
    attempts: u32,
}

impl Backoff {
    pub(crate) fn new(config: &BackoffConfig) -> Self {
        let multiplier = if config.multiplier.is_finite() && config.multiplier > 0.0 {
            config.multiplier
        } else {
            DEFAULT_MULTIPLIER
        };
        Self {
            base: config.base_delay,
            max: config.max_delay,
            multiplier,
            attempts: 0,
        }
    }

    /// Delay for a given attempt number, clamped to `max`.
    pub(crate) fn delay_for(&self, attempt: u32) -> Duration {
        let exp = i32::try_from(attempt).unwrap_or(i32::MAX);
        let secs = self.base.as_secs_f64() * self.multiplier.powi(exp);
        let max = self.max.as_secs_f64();
        if secs.is_nan() || secs >= max {
            self.max
        } else {
            Duration::try_from_secs_f64(secs.max(0.0)).unwrap_or(self.max)
        }
    }

    /// Delay for the current attempt; advances the counter.
    pub(crate) fn next_delay(&mut self) -> Duration {
        let delay = self.delay_for(self.attempts);
        self.attempts = self.attempts.saturating_add(1);
        delay
    }

    pub(crate) fn reset(&mut self) {
        self.attempts = 0;
    }

    pub(crate) fn attempts(&self) -> u32 {
        self.attempts
    }
}
