//! Circuit breaker for the intelligence capability.
//!
//! CLOSED -> OPEN after `failure_threshold` consecutive failures inside the
//! failure window. OPEN rejects every call until the cooldown elapses, then
//! HALF_OPEN admits exactly one trial call. A successful trial call closes the circuit;
//! a failed trial call reopens it and restarts the cooldown.

use serde::{Deserialize, Serialize};
use std::sync::Mutex;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{info, warn};

use crate::domain::models::CircuitBreakerConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    /// Calls flow normally.
    Closed,
    /// Calls are rejected.
    Open,
    /// One trial call is allowed through.
    HalfOpen,
}

impl CircuitState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Closed => "closed",
            Self::Open => "open",
            Self::HalfOpen => "half_open",
        }
    }
}

/// Breaker thresholds.
#[derive(Debug, Clone, Copy)]
pub struct BreakerSettings {
    pub failure_threshold: u32,
    pub failure_window: Duration,
    pub cooldown: Duration,
}

impl Default for BreakerSettings {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            failure_window: Duration::from_secs(600),
            cooldown: Duration::from_secs(60),
        }
    }
}

impl From<&CircuitBreakerConfig> for BreakerSettings {
    fn from(config: &CircuitBreakerConfig) -> Self {
        Self {
            failure_threshold: config.failure_threshold.max(1),
            failure_window: Duration::from_secs(config.failure_window_secs),
            cooldown: Duration::from_secs(config.cooldown_secs),
        }
    }
}

/// Why a call was not admitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rejected {
    /// Time left until a trial call will be admitted. Zero while a trial call is in flight.
    pub retry_after: Duration,
}

#[derive(Debug)]
struct Inner {
    state: CircuitState,
    consecutive_failures: u32,
    first_failure_at: Option<Instant>,
    opened_at: Option<Instant>,
    trial_in_flight: bool,
    open_count: u32,
}

#[derive(Debug)]
pub struct CircuitBreaker {
    settings: BreakerSettings,
    inner: Mutex<Inner>,
}

impl CircuitBreaker {
    pub fn new(settings: BreakerSettings) -> Self {
        Self {
            settings,
            inner: Mutex::new(Inner {
                state: CircuitState::Closed,
                consecutive_failures: 0,
                first_failure_at: None,
                opened_at: None,
                trial_in_flight: false,
                open_count: 0,
            }),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        // A panic while holding the lock cannot leave the counters invalid.
        self.inner.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// Current state, moving OPEN to HALF_OPEN once the cooldown has elapsed.
    pub fn state(&self) -> CircuitState {
        let mut inner = self.lock();
        self.refresh(&mut inner);
        inner.state
    }

    /// Times the circuit has opened since creation.
    pub fn open_count(&self) -> u32 {
        self.lock().open_count
    }

    /// Ask to make a call. In HALF_OPEN only the first caller is admitted.
    pub fn try_acquire(&self) -> Result<(), Rejected> {
        let mut inner = self.lock();
        self.refresh(&mut inner);
        match inner.state {
            CircuitState::Closed => Ok(()),
            CircuitState::Open => Err(Rejected {
                retry_after: self.remaining_cooldown(&inner),
            }),
            CircuitState::HalfOpen if inner.trial_in_flight => Err(Rejected {
                retry_after: Duration::ZERO,
            }),
            CircuitState::HalfOpen => {
                inner.trial_in_flight = true;
                info!("Circuit half-open, admitting trial call");
                Ok(())
            }
        }
    }

    pub fn record_success(&self) {
        let mut inner = self.lock();
        inner.consecutive_failures = 0;
        inner.first_failure_at = None;
        if inner.state == CircuitState::HalfOpen {
            inner.state = CircuitState::Closed;
            inner.trial_in_flight = false;
            inner.opened_at = None;
            info!("Circuit closed after successful trial call");
        }
    }

    pub fn record_failure(&self) {
        let now = Instant::now();
        let mut inner = self.lock();
        match inner.state {
            CircuitState::HalfOpen => {
                inner.trial_in_flight = false;
                self.open(&mut inner, now);
            }
            CircuitState::Open => {}
            CircuitState::Closed => {
                let window_expired = inner
                    .first_failure_at
                    .is_some_and(|first| now.duration_since(first) > self.settings.failure_window);
                if window_expired || inner.first_failure_at.is_none() {
                    inner.first_failure_at = Some(now);
                    inner.consecutive_failures = 0;
                }
                inner.consecutive_failures += 1;
                if inner.consecutive_failures >= self.settings.failure_threshold {
                    self.open(&mut inner, now);
                }
            }
        }
    }

    /// Release an admitted call that ended without a verdict on the capability
    /// (for example a non-transient error).
    pub fn record_neutral(&self) {
        let mut inner = self.lock();
        if inner.state == CircuitState::HalfOpen {
            inner.trial_in_flight = false;
        }
    }

    fn open(&self, inner: &mut Inner, now: Instant) {
        inner.state = CircuitState::Open;
        inner.opened_at = Some(now);
        inner.consecutive_failures = 0;
        inner.first_failure_at = None;
        inner.open_count += 1;
        warn!(
            cooldown_secs = self.settings.cooldown.as_secs(),
            open_count = inner.open_count,
            "Circuit opened"
        );
    }

    fn refresh(&self, inner: &mut Inner) {
        if inner.state == CircuitState::Open && self.remaining_cooldown(inner).is_zero() {
            inner.state = CircuitState::HalfOpen;
            inner.trial_in_flight = false;
        }
    }

    fn remaining_cooldown(&self, inner: &Inner) -> Duration {
        inner.opened_at.map_or(Duration::ZERO, |opened| {
            self.settings.cooldown.saturating_sub(opened.elapsed())
        })
    }
}

impl Default for CircuitBreaker {
    fn default() -> Self {
        Self::new(BreakerSettings::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn breaker() -> CircuitBreaker {
        CircuitBreaker::new(BreakerSettings {
            failure_threshold: 3,
            failure_window: Duration::from_secs(60),
            cooldown: Duration::from_secs(30),
        })
    }

    #[tokio::test(start_paused = true)]
    async fn test_opens_after_threshold() {
        let cb = breaker();
        for _ in 0..2 {
            cb.try_acquire().unwrap();
            cb.record_failure();
        }
        assert_eq!(cb.state(), CircuitState::Closed);
        cb.try_acquire().unwrap();
        cb.record_failure();
        assert_eq!(cb.state(), CircuitState::Open);

        let rejected = cb.try_acquire().unwrap_err();
        assert_eq!(rejected.retry_after, Duration::from_secs(30));
    }

    #[tokio::test(start_paused = true)]
    async fn test_success_resets_consecutive_count() {
        let cb = breaker();
        cb.record_failure();
        cb.record_failure();
        cb.record_success();
        cb.record_failure();
        cb.record_failure();
        assert_eq!(cb.state(), CircuitState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failures_outside_window_do_not_accumulate() {
        let cb = breaker();
        cb.record_failure();
        cb.record_failure();
        tokio::time::advance(Duration::from_secs(61)).await;
        cb.record_failure();
        assert_eq!(cb.state(), CircuitState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_half_open_admits_single_trial_call() {
        let cb = breaker();
        for _ in 0..3 {
            cb.record_failure();
        }
        tokio::time::advance(Duration::from_secs(30)).await;
        assert_eq!(cb.state(), CircuitState::HalfOpen);

        assert!(cb.try_acquire().is_ok());
        assert!(cb.try_acquire().is_err());

        cb.record_success();
        assert_eq!(cb.state(), CircuitState::Closed);
        assert!(cb.try_acquire().is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_trial_call_restarts_cooldown() {
        let cb = breaker();
        for _ in 0..3 {
            cb.record_failure();
        }
        tokio::time::advance(Duration::from_secs(30)).await;
        cb.try_acquire().unwrap();
        cb.record_failure();

        assert_eq!(cb.state(), CircuitState::Open);
        assert_eq!(cb.open_count(), 2);
        tokio::time::advance(Duration::from_secs(29)).await;
        assert_eq!(cb.state(), CircuitState::Open);
        tokio::time::advance(Duration::from_secs(1)).await;
        assert_eq!(cb.state(), CircuitState::HalfOpen);
    }
}
