use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::SystemTime;

use tokio::time::Instant;

use crate::error::AuthError;
use crate::events::AuthEvent;
use crate::health::HealthStatus;
use crate::oscillation::OscillationDetector;
use crate::state::{AuthState, CredentialSource, UserInfo};

use super::{Inner, lock};

const MISMATCH_REASON: &str = "Identity asserted without a user identifier";

impl Inner {
    /// The only place [`AuthState`] changes.
    ///
    /// Diffs against the current snapshot first: a no-op only refreshes
    /// `last_checked` and notifies nobody. A real change bumps `version`,
    /// runs oscillation accounting when `explicit` (or the armed flag)
    /// allows it, then notifies subscribers in order outside the lock.
    pub(super) fn set_state(&self, mut next: AuthState, explicit: bool) -> AuthState {
        next.normalize();
        next.is_loading = false;
        next.last_checked = Some(SystemTime::now());
        let now = Instant::now();

        let committed = {
            let mut core = self.core();
            if core.state.same_session_as(&next) {
                core.state.last_checked = next.last_checked;
                core.state.is_loading = false;
                return core.state.clone();
            }

            let armed = core.explicit_until.take().is_some_and(|until| now < until);
            if (explicit || armed)
                && self.initialized.load(Ordering::SeqCst)
                && core.oscillation.has_successful_state()
            {
                self.account_oscillation(&mut core, &next, now);
            }

            next.version = core.state.version + 1;
            core.state = next.clone();
            next
        };

        tracing::debug!(
            version = committed.version,
            is_authenticated = committed.is_authenticated,
            session_ready = committed.session_ready,
            whoami_ok = committed.whoami_ok,
            "Auth state committed"
        );

        let callbacks: Vec<_> = lock(&self.subscribers)
            .callbacks
            .iter()
            .map(|(_, callback)| Arc::clone(callback))
            .collect();
        for callback in callbacks {
            callback(&committed);
        }

        self.events.emit(AuthEvent::StateChanged {
            version: committed.version,
            is_authenticated: committed.is_authenticated,
            session_ready: committed.session_ready,
        });
        committed
    }

    fn account_oscillation(&self, core: &mut super::Core, next: &AuthState, now: Instant) {
        if !core
            .oscillation
            .detect_oscillation(&core.state, next, core.last_call, now)
        {
            core.oscillation.reset_oscillation_count();
            return;
        }

        let count = core.oscillation.increment_oscillation_count();
        tracing::warn!(count, "Auth state oscillation detected");

        if OscillationDetector::should_apply_backoff(count) {
            let delay = core.oscillation.escalate();
            core.backoff.apply_backoff(delay, now);
            tracing::warn!(
                delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                "Oscillation backoff applied"
            );
        }
    }

    pub(super) async fn commit_authenticated(
        &self,
        user: UserInfo,
        claimed_ready: Option<bool>,
        source: CredentialSource,
        explicit: bool,
        generation: u64,
    ) -> AuthState {
        let claimed = claimed_ready.unwrap_or(true);

        // Lenient: a failed probe is logged and retried in the background,
        // never turned into "not ready" here.
        let verdict = self.health.probe().await;
        if !verdict.is_healthy() {
            tracing::warn!(
                verdict = ?verdict,
                "Identity confirmed but health probe failed, assuming healthy"
            );
            let health = Arc::clone(&self.health);
            tokio::spawn(async move {
                if health.probe().await.is_healthy() {
                    tracing::info!("Health probe recovered");
                } else {
                    tracing::warn!("Health probe still failing");
                }
            });
        }

        if self.current_generation() != generation {
            return self.snapshot();
        }

        let session_ready = {
            let mut core = self.core();
            core.claimed_ready = Some(claimed);
            core.backoff.reset_failures();
            claimed && !core.backend_unhealthy
        };

        let committed = self.set_state(
            AuthState {
                is_authenticated: true,
                session_ready,
                user: Some(user),
                source,
                whoami_ok: true,
                ..AuthState::default()
            },
            explicit,
        );
        self.core().oscillation.update_successful_state(&committed);

        if !self.callback_params_consumed.swap(true, Ordering::SeqCst) {
            tracing::info!("First authenticated check complete, callback parameters consumed");
            self.events.emit(AuthEvent::CallbackParamsConsumed);
        }
        committed
    }

    pub(super) fn commit_mismatch(&self, source: CredentialSource, explicit: bool) -> AuthState {
        tracing::warn!("Auth-gate retry still missing identifier, treating as unauthenticated");
        let committed = self.set_state(
            AuthState {
                source,
                whoami_ok: true,
                error: Some(MISMATCH_REASON.to_string()),
                ..AuthState::default()
            },
            explicit,
        );
        self.events.emit(AuthEvent::AuthMismatch {
            reason: MISMATCH_REASON.to_string(),
        });
        committed
    }

    pub(super) fn commit_anonymous(&self, source: CredentialSource, explicit: bool) -> AuthState {
        {
            let mut core = self.core();
            core.backoff.reset_failures();
            core.claimed_ready = None;
        }
        self.set_state(
            AuthState {
                source,
                whoami_ok: true,
                ..AuthState::default()
            },
            explicit,
        )
    }

    /// Definitive "not authenticated": no failure counted, tokens untouched.
    pub(super) fn commit_rejected(&self, error: &AuthError, explicit: bool) -> AuthState {
        tracing::info!(status = ?error.status(), "Identity endpoint reports no session");
        self.core().claimed_ready = None;
        self.set_state(
            AuthState {
                whoami_ok: false,
                error: Some(error.to_string()),
                ..AuthState::default()
            },
            explicit,
        )
    }

    /// Transient failure after the fetcher's own retries ran out.
    pub(super) fn commit_failure(&self, error: &AuthError, explicit: bool) -> AuthState {
        let whoami_ok = {
            let mut core = self.core();
            let failures = core.backoff.increment_failures();
            let delay = core.backoff.calculate_backoff();
            core.backoff.apply_backoff(delay, Instant::now());
            tracing::warn!(
                failures,
                delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                error = %error,
                "Identity check failed"
            );
            core.state.whoami_ok
        };

        self.set_state(
            AuthState {
                whoami_ok,
                error: Some(error.to_string()),
                ..AuthState::default()
            },
            explicit,
        )
    }

    /// React to the background health monitor.
    pub(super) fn apply_health_status(&self, status: &HealthStatus) {
        let next = {
            let mut core = self.core();
            match status {
                HealthStatus::Unhealthy { .. } => {
                    core.backend_unhealthy = true;
                    core.state.session_ready.then(|| AuthState {
                        session_ready: false,
                        ..core.state.clone()
                    })
                }
                HealthStatus::Healthy => {
                    let was_unhealthy = std::mem::replace(&mut core.backend_unhealthy, false);
                    (was_unhealthy
                        && core.state.is_authenticated
                        && !core.state.session_ready
                        && core.claimed_ready == Some(true))
                    .then(|| AuthState {
                        session_ready: true,
                        ..core.state.clone()
                    })
                }
                HealthStatus::Degraded { .. } => None,
            }
        };

        if let Some(next) = next {
            tracing::info!(session_ready = next.session_ready, "Readiness follows backend health");
            self.set_state(next, false);
        }
    }
}
