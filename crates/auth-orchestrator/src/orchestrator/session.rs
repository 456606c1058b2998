use std::future::Future;
use std::sync::Arc;

use tokio::sync::broadcast::error::RecvError;

use crate::error::{AuthError, AuthResult};
use crate::events::AuthEvent;
use crate::health::HealthMonitor;
use crate::state::AuthState;
use crate::token_store::TokenPair;

use super::check::CheckRequest;
use super::{AuthOrchestrator, lock};

impl AuthOrchestrator {
    /// Deliberate sign-out. Eligible for oscillation accounting.
    pub fn logout(&self) -> AuthState {
        tracing::info!("Logging out");
        self.mark_explicit_state_change();
        self.inner.tokens.clear_tokens();
        self.inner.fetcher.clear_cache();
        self.inner.core().claimed_ready = None;
        self.inner.set_state(AuthState::default(), true)
    }

    /// Exchange the stored refresh token for a new pair.
    ///
    /// On rejection the stored credentials are confirmed invalid: tokens are
    /// cleared, health polling stops, and `auth:session_expired` is emitted.
    ///
    /// # Errors
    /// [`AuthError::MissingRefreshToken`] when nothing is stored, or the
    /// backend error that rejected the refresh.
    pub async fn refresh_tokens(&self) -> AuthResult<()> {
        let Some(refresh_token) = self.inner.tokens.get_refresh_token() else {
            self.expire_session("no refresh token");
            return Err(AuthError::MissingRefreshToken);
        };

        match self.inner.backend.refresh_tokens(&refresh_token).await {
            Ok(TokenPair {
                access: Some(access),
                refresh,
            }) => {
                tracing::info!("Tokens refreshed");
                self.inner.tokens.set_tokens(access, refresh);
                self.inner.fetcher.clear_cache();
                Ok(())
            }
            Ok(TokenPair { access: None, .. }) => {
                let err = AuthError::MalformedResponse {
                    reason: "refresh response carried no access token".into(),
                };
                self.expire_session(&err.to_string());
                Err(err)
            }
            Err(e) => {
                self.expire_session(&e.to_string());
                Err(e)
            }
        }
    }

    /// Run an OAuth code exchange with identity checks fully suppressed.
    ///
    /// The resulting tokens are stored before the gate reopens; the gate
    /// listener started by [`initialize`](Self::initialize) then issues
    /// exactly one check.
    ///
    /// # Errors
    /// Whatever error the exchange produced. The gate is reopened either way.
    pub async fn finish_auth<F>(&self, exchange: F) -> AuthResult<()>
    where
        F: Future<Output = AuthResult<TokenPair>>,
    {
        let gate = &self.inner.gate;
        gate.set_auth_finish_in_progress(true);

        let result = exchange.await;
        let outcome = match result {
            Ok(TokenPair {
                access: Some(access),
                refresh,
            }) => {
                self.inner.tokens.set_tokens(access, refresh);
                Ok(())
            }
            Ok(TokenPair { access: None, .. }) => {
                // Cookie-mode exchange: the session cookie is the credential.
                self.inner.tokens.bump_epoch();
                Ok(())
            }
            Err(e) => {
                tracing::warn!(error = %e, "Auth finish exchange failed");
                Err(e)
            }
        };

        self.inner.fetcher.clear_cache();
        gate.set_auth_finish_in_progress(false);
        outcome
    }

    /// Follow token store events: every credential change purges the
    /// identity cache and, once initialized, schedules a `refresh_auth`.
    pub fn watch_token_events(&self) {
        let mut rx = self.inner.events.subscribe();
        let weak = Arc::downgrade(&self.inner);

        let handle = tokio::spawn(async move {
            loop {
                let event = match rx.recv().await {
                    Ok(event) => event,
                    Err(RecvError::Lagged(skipped)) => {
                        tracing::warn!(skipped, "Token event listener lagged");
                        continue;
                    }
                    Err(RecvError::Closed) => break,
                };
                if !event.changes_credentials() {
                    continue;
                }
                let Some(inner) = weak.upgrade() else { break };
                inner.fetcher.clear_cache();
                let orchestrator = AuthOrchestrator { inner };
                if orchestrator.is_initialized() {
                    tracing::debug!(event = event.name(), "Credentials changed, refreshing");
                    drop(orchestrator.refresh_auth());
                }
            }
        });
        self.inner.track_task(handle);
    }

    pub(super) fn start_health_polling(&self) {
        let inner = &self.inner;
        if !inner.config.health.enabled {
            return;
        }
        if !inner.gate.start_health_polling() {
            tracing::debug!("Health polling already active");
            return;
        }

        let (monitor, mut rx) =
            HealthMonitor::start(Arc::clone(&inner.health), &inner.config.health);
        *lock(&inner.monitor) = Some(monitor);

        let weak = Arc::downgrade(inner);
        let handle = tokio::spawn(async move {
            while let Some(status) = rx.recv().await {
                let Some(inner) = weak.upgrade() else { break };
                inner.apply_health_status(&status);
            }
        });
        inner.track_task(handle);
    }

    /// Issue exactly one check each time an auth finish completes.
    pub(super) fn spawn_gate_listener(&self) {
        let mut rx = self.inner.gate.subscribe();
        let mut seen = rx.borrow_and_update().auth_finishes;
        let weak = Arc::downgrade(&self.inner);

        let handle = tokio::spawn(async move {
            while rx.changed().await.is_ok() {
                let state = *rx.borrow_and_update();
                if state.auth_finish_in_progress || state.auth_finishes == seen {
                    continue;
                }
                seen = state.auth_finishes;

                let Some(inner) = weak.upgrade() else { break };
                tracing::info!("Auth finish complete, checking session");
                inner.run_check(CheckRequest::immediate()).await;
            }
        });
        self.inner.track_task(handle);
    }

    fn expire_session(&self, reason: &str) {
        tracing::warn!(reason, "Session expired");
        let inner = &self.inner;
        inner.tokens.clear_tokens();
        inner.fetcher.clear_cache();

        if lock(&inner.monitor).take().is_some() {
            inner.gate.stop_health_polling();
        }

        inner.core().claimed_ready = None;
        inner.set_state(
            AuthState {
                error: Some(format!("Session expired: {reason}")),
                ..AuthState::default()
            },
            false,
        );
        inner.events.emit(AuthEvent::SessionExpired);
    }
}

