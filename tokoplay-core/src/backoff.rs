// src/backoff.rs
//
// One bounded exponential-backoff policy shared by the authentication and
// play-submission retry paths, so retry behavior is tuned in one place.

use std::time::Duration;

use rand::Rng;

#[derive(Debug, Clone)]
pub struct BackoffPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    /// Fractional jitter applied to each delay, e.g. 0.3 => +/-30%.
    pub jitter: f64,
}

impl BackoffPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_attempts,
            base_delay,
            max_delay,
            jitter: 0.3,
        }
    }

    /// True once `attempts` failures have been consumed.
    pub fn exhausted(&self, attempts: u32) -> bool {
        attempts >= self.max_attempts
    }

    /// Delay before retry number `attempt` (first retry is attempt 1).
    /// Grows as base * 2^(attempt-1), capped at `max_delay`, with jitter.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let shift = attempt.saturating_sub(1).min(20);
        let base_ms = self.base_delay.as_millis() as u64;
        let raw_ms = base_ms
            .saturating_mul(1u64 << shift)
            .min(self.max_delay.as_millis() as u64);

        if self.jitter <= 0.0 {
            return Duration::from_millis(raw_ms);
        }
        let spread = self.jitter.min(1.0);
        let factor = 1.0 + rand::rng().random_range(-spread..=spread);
        let jittered = (raw_ms as f64 * factor).max(0.0) as u64;
        Duration::from_millis(jittered.min(self.max_delay.as_millis() as u64))
    }
}
