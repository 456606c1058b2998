//! # Backoff Manager
//!
//! Failure-driven backoff for identity checks, plus the independent minimum
//! interval between live calls. Both gates must pass for a check to reach
//! the network; a retry call skips only the interval gate.

use std::time::Duration;

use rand::Rng;
use tokio::time::Instant;

use crate::config::CheckConfig;

/// Growth factor per consecutive failure.
const BACKOFF_MULTIPLIER: f64 = 1.5;

/// Uniform jitter applied to the computed backoff (±15%).
const BACKOFF_JITTER: f64 = 0.15;

/// No backoff is ever shorter than this.
const BACKOFF_FLOOR: Duration = Duration::from_millis(500);

/// Spread `delay` uniformly by ±`fraction`.
pub fn jittered(delay: Duration, fraction: f64) -> Duration {
    if fraction <= 0.0 || delay.is_zero() {
        return delay;
    }
    let factor = rand::rng().random_range((1.0 - fraction)..=(1.0 + fraction));
    delay.mul_f64(factor.max(0.0))
}

/// Tracks consecutive failures and the active backoff window.
#[derive(Debug)]
pub struct BackoffManager {
    base: Duration,
    max: Duration,
    min_interval: Duration,
    failures: u32,
    backoff_until: Option<Instant>,
}

impl BackoffManager {
    pub fn new(config: &CheckConfig) -> Self {
        Self {
            base: Duration::from_millis(config.backoff_base_ms),
            max: Duration::from_millis(config.backoff_max_ms),
            min_interval: Duration::from_millis(config.min_interval_ms),
            failures: 0,
            backoff_until: None,
        }
    }

    /// `min(base * 1.5^failures, max)`, ±15% jitter, never below 500ms.
    pub fn calculate_backoff(&self) -> Duration {
        let exponent = i32::try_from(self.failures).unwrap_or(i32::MAX);
        let raw = self.base.as_secs_f64() * BACKOFF_MULTIPLIER.powi(exponent);
        let capped = Duration::from_secs_f64(raw.min(self.max.as_secs_f64()));
        jittered(capped, BACKOFF_JITTER).max(BACKOFF_FLOOR)
    }

    pub fn increment_failures(&mut self) -> u32 {
        self.failures = self.failures.saturating_add(1);
        self.failures
    }

    /// Clears the failure count and any active window.
    pub fn reset_failures(&mut self) {
        self.failures = 0;
        self.backoff_until = None;
    }

    pub fn failures(&self) -> u32 {
        self.failures
    }

    /// Open (or extend) a backoff window of `duration` starting at `now`.
    pub fn apply_backoff(&mut self, duration: Duration, now: Instant) {
        let until = now + duration;
        if self.backoff_until.is_none_or(|current| current < until) {
            self.backoff_until = Some(until);
        }
        tracing::debug!(
            delay_ms = u64::try_from(duration.as_millis()).unwrap_or(u64::MAX),
            failures = self.failures,
            "Backoff applied"
        );
    }

    /// Time left in the active backoff window, if any.
    pub fn remaining(&self, now: Instant) -> Option<Duration> {
        self.backoff_until
            .filter(|until| *until > now)
            .map(|until| until - now)
    }

    /// Whether a call at `now` must be skipped.
    ///
    /// `is_retry` skips the minimum-interval check but never the backoff window.
    pub fn should_throttle_call(
        &self,
        last_call: Option<Instant>,
        now: Instant,
        is_retry: bool,
    ) -> bool {
        if self.remaining(now).is_some() {
            return true;
        }
        if is_retry {
            return false;
        }
        last_call.is_some_and(|last| now.saturating_duration_since(last) < self.min_interval)
    }
}
