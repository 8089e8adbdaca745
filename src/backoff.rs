//! Exponential reconnect backoff with jitter.
//!
//! `delay(k) = min(base · 2^k + U(0, jitter), ceiling)`

use std::time::Duration;

use rand::Rng;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Backoff {
    /// Default: 1 s.
    pub base: Duration,
    /// Default: 30 s.
    pub ceiling: Duration,
    /// Upper bound of the uniform jitter.  Default: 1 s.
    pub max_jitter: Duration,
    /// Failed attempts before giving up.  Default: 10.
    pub max_attempts: u32,
}

impl Default for Backoff {
    fn default() -> Self {
        Self {
            base: Duration::from_secs(1),
            ceiling: Duration::from_secs(30),
            max_jitter: Duration::from_secs(1),
            max_attempts: 10,
        }
    }
}

impl Backoff {
    /// Deterministic part: `min(base · 2^attempt, ceiling)`.
    pub fn nominal(&self, attempt: u32) -> Duration {
        self.delay_with(attempt, Duration::ZERO)
    }

    /// Delay before retry number `attempt` (0-based) with the given jitter.
    pub fn delay_with(&self, attempt: u32, jitter: Duration) -> Duration {
        let factor = 1u32.checked_shl(attempt).unwrap_or(u32::MAX);
        self.base
            .saturating_mul(factor)
            .saturating_add(jitter.min(self.max_jitter))
            .min(self.ceiling)
    }

    /// Delay before retry number `attempt` with fresh random jitter.
    pub fn delay(&self, attempt: u32) -> Duration {
        let max_ms = self.max_jitter.as_millis() as u64;
        let jitter = Duration::from_millis(rand::thread_rng().gen_range(0..=max_ms));
        self.delay_with(attempt, jitter)
    }

    pub fn exhausted(&self, attempts: u32) -> bool {
        attempts >= self.max_attempts
    }
}
