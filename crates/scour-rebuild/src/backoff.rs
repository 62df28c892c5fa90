//! Exponential backoff with jitter for batch re-sends.

use std::time::Duration;

/// Exponential backoff calculator with jitter.
///
/// There is no attempt limit; the delay stops growing at `max`.
#[derive(Debug)]
pub struct Backoff {
    base_ms: u64,
    max_ms: u64,
    attempt: u32,
}

impl Backoff {
    /// Create a backoff starting at `base` and capped at `max`.
    pub fn new(base: Duration, max: Duration) -> Self {
        let base_ms = base.as_millis() as u64;
        Self {
            base_ms,
            max_ms: (max.as_millis() as u64).max(base_ms),
            attempt: 0,
        }
    }

    /// Number of delays handed out so far.
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    /// Get the next delay and increment the attempt counter.
    pub fn next_delay(&mut self) -> Duration {
        let factor = 1u64.checked_shl(self.attempt).unwrap_or(u64::MAX);
        let capped = self.base_ms.saturating_mul(factor).min(self.max_ms);
        let jitter = rand::random::<u64>() % (capped / 4 + 1);
        self.attempt = self.attempt.saturating_add(1);
        Duration::from_millis(capped + jitter)
    }
}
