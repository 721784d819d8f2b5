/// Exponential backoff schedule for health-check retries.
///
/// Maps an attempt index to a delay: `base * 2^attempt`, capped at
/// `max_delay`. The schedule is stateless and has no jitter, so the same
/// attempt index always yields the same delay. Attempt counting lives in
/// the monitor's `RetryContext`.
use std::time::Duration;

/// Default delay for attempt 0.
pub const DEFAULT_BASE_DELAY: Duration = Duration::from_millis(1000);

/// Default ceiling for any single delay.
pub const DEFAULT_MAX_DELAY: Duration = Duration::from_millis(10_000);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Backoff {
    base_delay: Duration,
    max_delay: Duration,
}

impl Backoff {
    pub fn new(base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            base_delay,
            max_delay,
        }
    }

    /// Returns the delay to wait before the retry following `attempt`
    /// consecutive failures (0-based).
    pub fn delay(&self, attempt: u32) -> Duration {
        // 2^attempt overflows u32 at 32; anything past that is capped anyway
        let factor = 1u32.checked_shl(attempt).unwrap_or(u32::MAX);
        self.base_delay
            .checked_mul(factor)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Self::new(DEFAULT_BASE_DELAY, DEFAULT_MAX_DELAY)
    }
}
