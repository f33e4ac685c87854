//! Exponential backoff schedule for transient intelligence failures.

use std::time::Duration;

use crate::domain::models::RetryConfig;

/// Retry policy with exponential backoff.
///
/// With the defaults the waits are 2s, 4s, 8s: four attempts in total.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the first attempt.
    pub max_retries: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_backoff: Duration::from_millis(2_000),
            max_backoff: Duration::from_millis(8_000),
        }
    }
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(config: &RetryConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            initial_backoff: Duration::from_millis(config.initial_backoff_ms),
            max_backoff: Duration::from_millis(config.max_backoff_ms.max(config.initial_backoff_ms)),
        }
    }
}

impl RetryPolicy {
    pub fn max_attempts(&self) -> u32 {
        self.max_retries + 1
    }

    /// Wait before retry number `retry` (0-based): `initial * 2^retry`, capped.
    pub fn backoff(&self, retry: u32) -> Duration {
        let factor = 2_u32.saturating_pow(retry);
        self.initial_backoff
            .checked_mul(factor)
            .unwrap_or(self.max_backoff)
            .min(self.max_backoff)
    }

    /// Backoff honoring a server-provided hint, never shorter than the hint.
    pub fn backoff_with_hint(&self, retry: u32, hint: Option<Duration>) -> Duration {
        let base = self.backoff(retry);
        hint.map_or(base, |h| h.max(base))
    }
}
