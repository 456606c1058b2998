//! # Oscillation Detector
//!
//! Watches consecutive committed snapshots for rapid flapping between
//! authenticated and unauthenticated. Two flips in a row escalate into an
//! extended backoff window applied by the orchestrator.

use std::time::Duration;

use tokio::time::Instant;

use crate::state::AuthState;

/// A `whoami_ok` flip closer than this to the last check counts.
const WHOAMI_FLIP_WINDOW: Duration = Duration::from_secs(10);

/// An `is_authenticated` / `session_ready` flip closer than this counts.
const AUTH_FLIP_WINDOW: Duration = Duration::from_secs(5);

/// Oscillation events before backoff kicks in.
const OSCILLATION_THRESHOLD: u32 = 2;

/// First extended backoff step.
const INITIAL_OSCILLATION_BACKOFF: Duration = Duration::from_secs(10);

/// Extended backoff ceiling.
pub const MAX_OSCILLATION_BACKOFF: Duration = Duration::from_secs(60);

#[derive(Debug, Default)]
pub struct OscillationDetector {
    count: u32,
    current_backoff: Duration,
    last_successful: Option<AuthState>,
}

impl OscillationDetector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether `prev → next` is a flip close enough to the last identity call.
    ///
    /// Without a prior successful state nothing counts, so the first load
    /// never looks like flapping.
    pub fn detect_oscillation(
        &self,
        prev: &AuthState,
        next: &AuthState,
        last_call: Option<Instant>,
        now: Instant,
    ) -> bool {
        if self.last_successful.is_none() {
            return false;
        }
        let Some(last_call) = last_call else {
            return false;
        };
        let since = now.saturating_duration_since(last_call);

        let whoami_flip = prev.whoami_ok != next.whoami_ok && since < WHOAMI_FLIP_WINDOW;
        let auth_flip = (prev.is_authenticated != next.is_authenticated
            || prev.session_ready != next.session_ready)
            && since < AUTH_FLIP_WINDOW;

        whoami_flip || auth_flip
    }

    pub fn increment_oscillation_count(&mut self) -> u32 {
        self.count = self.count.saturating_add(1);
        self.count
    }

    pub fn reset_oscillation_count(&mut self) {
        self.count = 0;
        self.current_backoff = Duration::ZERO;
    }

    pub fn count(&self) -> u32 {
        self.count
    }

    pub fn should_apply_backoff(count: u32) -> bool {
        count >= OSCILLATION_THRESHOLD
    }

    /// Next extended backoff: 10s, then doubling, capped at `max`.
    pub fn apply_oscillation_backoff(current: Duration, max: Duration) -> Duration {
        if current.is_zero() {
            INITIAL_OSCILLATION_BACKOFF.min(max)
        } else {
            current.saturating_mul(2).min(max)
        }
    }

    /// Advance this detector's own backoff step and return it.
    pub fn escalate(&mut self) -> Duration {
        self.current_backoff =
            Self::apply_oscillation_backoff(self.current_backoff, MAX_OSCILLATION_BACKOFF);
        self.current_backoff
    }

    pub fn update_successful_state(&mut self, state: &AuthState) {
        self.last_successful = Some(state.clone());
    }

    pub fn has_successful_state(&self) -> bool {
        self.last_successful.is_some()
    }
}
