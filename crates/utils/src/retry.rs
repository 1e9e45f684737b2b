//! Backoff configuration for operations that poll a contended resource.

use std::time::Duration;

/// Default maximum number of retry attempts
const DEFAULT_MAX_RETRIES: u32 = 200;

/// Default base delay for exponential backoff
const DEFAULT_BASE_DELAY: Duration = Duration::from_millis(10);

/// Default maximum delay for exponential backoff
const DEFAULT_MAX_DELAY: Duration = Duration::from_millis(500);

/// Default jitter factor (0.1 = 10% randomization)
const DEFAULT_JITTER_FACTOR: f64 = 0.1;

/// Configuration for retry behavior
#[derive(Debug, Clone, PartialEq)]
pub struct RetryConfig {
    /// Maximum number of retry attempts
    pub max_retries: u32,
    /// Base delay for exponential backoff
    pub base_delay: Duration,
    /// Maximum delay between retries
    pub max_delay: Duration,
    /// Jitter factor for randomization (0.0 to 1.0)
    pub jitter_factor: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            base_delay: DEFAULT_BASE_DELAY,
            max_delay: DEFAULT_MAX_DELAY,
            jitter_factor: DEFAULT_JITTER_FACTOR,
        }
    }
}

impl RetryConfig {
    /// Retry config for tests and tightly bounded waits: no jitter, short delays
    pub fn immediate(max_retries: u32) -> Self {
        Self {
            max_retries,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(5),
            jitter_factor: 0.0,
        }
    }

    /// Whether another attempt is allowed after `attempt` failed ones
    pub fn allows_retry(&self, attempt: u32) -> bool {
        attempt < self.max_retries
    }

    /// Calculate delay for a given attempt with exponential backoff and jitter
    pub fn calculate_delay(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.min(16));
        let exponential_delay = self.base_delay.saturating_mul(factor);
        let capped_delay = exponential_delay.min(self.max_delay);

        if self.jitter_factor <= 0.0 {
            return capped_delay;
        }

        // Spread concurrent waiters so they don't retry in lockstep
        let jitter_range = capped_delay.as_millis() as f64 * self.jitter_factor;
        let normalized = (fastrand::f64() - 0.5) * 2.0;
        let final_millis = (capped_delay.as_millis() as f64 + normalized * jitter_range).max(0.0);
        Duration::from_millis(final_millis as u64)
    }
}
