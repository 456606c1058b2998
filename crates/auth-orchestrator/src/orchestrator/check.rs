use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Duration;

use futures_util::FutureExt;
use futures_util::future;
use tokio::task::AbortHandle;
use tokio::time::Instant;

use crate::protocol::identity::Identity;
use crate::state::AuthState;

use super::{AuthOrchestrator, CheckFuture, Core, Inner, lock};

/// How a check was triggered.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(super) struct CheckRequest {
    /// Skip the minimum-interval gate. The backoff window still applies.
    pub(super) bypass_interval: bool,
    /// Skip every rate gate: cold start and the check after an auth finish.
    pub(super) immediate: bool,
    /// Eligible for oscillation accounting when committed.
    pub(super) explicit: bool,
}

impl CheckRequest {
    pub(super) fn passive() -> Self {
        Self::default()
    }

    pub(super) fn user_action() -> Self {
        Self {
            bypass_interval: true,
            ..Self::default()
        }
    }

    pub(super) fn immediate() -> Self {
        Self {
            bypass_interval: true,
            immediate: true,
            explicit: false,
        }
    }

    /// Combine two triggers that collapsed into one debounce window.
    fn merge(self, other: Self) -> Self {
        Self {
            bypass_interval: self.bypass_interval || other.bypass_interval,
            immediate: self.immediate || other.immediate,
            explicit: self.explicit || other.explicit,
        }
    }
}

pub(super) struct InFlight {
    id: u64,
    fut: CheckFuture,
}

pub(super) struct PendingDebounce {
    id: u64,
    deadline: Instant,
    fut: CheckFuture,
    request: CheckRequest,
    pub(super) driver: AbortHandle,
}

impl AuthOrchestrator {
    /// Debounced, rate-limited passive check.
    ///
    /// The returned future resolves to the state after the check (or the
    /// current state if the check was suppressed). Dropping it does not
    /// cancel the check.
    pub fn check_auth(&self) -> CheckFuture {
        self.inner.schedule(CheckRequest::passive())
    }

    /// Debounced check after a user action.
    ///
    /// Skips the minimum interval, short-circuits when the session is
    /// already authenticated and ready, and before [`initialize`] has run
    /// it performs the initial check instead.
    ///
    /// [`initialize`]: AuthOrchestrator::initialize
    pub fn refresh_auth(&self) -> CheckFuture {
        if !self.is_initialized() {
            tracing::debug!("refresh_auth before initialization, running initial check");
            let this = self.clone();
            let fut = async move { this.initialize().await }.boxed().shared();
            tokio::spawn(fut.clone());
            return fut;
        }

        let state = self.get_state();
        if state.is_authenticated && state.session_ready {
            return future::ready(state).boxed().shared();
        }
        self.inner.schedule(CheckRequest::user_action())
    }

    /// Run the initial check exactly once, bypassing debounce and rate
    /// limits. Later calls share the first call's result.
    pub async fn initialize(&self) -> AuthState {
        let fut = {
            let mut init = lock(&self.inner.init);
            if let Some(existing) = init.as_ref() {
                existing.clone()
            } else {
                let this = self.clone();
                let fut = async move { this.run_initialize().await }.boxed().shared();
                *init = Some(fut.clone());
                fut
            }
        };
        fut.await
    }

    async fn run_initialize(self) -> AuthState {
        tracing::info!("Initializing auth orchestrator");
        let generation = self.inner.current_generation();
        self.start_health_polling();
        self.spawn_gate_listener();

        let state = Arc::clone(&self.inner)
            .run_check(CheckRequest::immediate())
            .await;
        if self.inner.current_generation() == generation {
            self.inner.initialized.store(true, Ordering::SeqCst);
        }
        state
    }
}

impl Inner {
    /// Join the pending debounce window or open a new one.
    pub(super) fn schedule(self: &Arc<Self>, mut request: CheckRequest) -> CheckFuture {
        let now = Instant::now();
        let debounce = Duration::from_millis(self.config.checks.debounce_ms);
        let mut core = self.core();

        if core.explicit_until.take_if(|until| now < *until).is_some() {
            request.explicit = true;
        }

        if let Some(pending) = core.pending.as_mut() {
            pending.deadline = now + debounce;
            pending.request = pending.request.merge(request);
            return pending.fut.clone();
        }

        let id = core.next_check_id;
        core.next_check_id += 1;

        let inner = Arc::clone(self);
        let fut = async move { inner.await_debounce(id).await }
            .boxed()
            .shared();
        let driver = tokio::spawn(fut.clone()).abort_handle();

        core.pending = Some(PendingDebounce {
            id,
            deadline: now + debounce,
            fut: fut.clone(),
            request,
            driver,
        });
        fut
    }

    /// Sleep until the (possibly extended) debounce deadline, then check.
    async fn await_debounce(self: Arc<Self>, id: u64) -> AuthState {
        loop {
            let deadline = {
                let core = self.core();
                match core.pending.as_ref() {
                    Some(pending) if pending.id == id => pending.deadline,
                    _ => return core.state.clone(),
                }
            };
            if Instant::now() >= deadline {
                break;
            }
            tokio::time::sleep_until(deadline).await;
        }

        let request = {
            let mut core = self.core();
            match core.pending.take_if(|pending| pending.id == id) {
                Some(pending) => pending.request,
                None => return core.state.clone(),
            }
        };
        self.run_check(request).await
    }

    /// Single-flight gate: join the outstanding check or start one.
    pub(super) async fn run_check(self: Arc<Self>, request: CheckRequest) -> AuthState {
        let fut = {
            let now = Instant::now();
            let mut core = self.core();

            if let Some(flight) = core.in_flight.as_ref() {
                tracing::debug!("Joining in-flight identity check");
                flight.fut.clone()
            } else {
                if let Some(reason) = self.suppression(&core, request, now) {
                    tracing::debug!(reason, "Identity check suppressed");
                    return core.state.clone();
                }

                core.last_call = Some(now);
                core.state.is_loading = true;
                let id = core.next_check_id;
                core.next_check_id += 1;
                let generation = self.current_generation();

                let inner = Arc::clone(&self);
                let fut = async move {
                    let state = Arc::clone(&inner)
                        .perform_check(generation, request.explicit)
                        .await;
                    {
                        let mut core = inner.core();
                        if core.in_flight.as_ref().is_some_and(|flight| flight.id == id) {
                            core.in_flight = None;
                        }
                    }
                    state
                }
                .boxed()
                .shared();

                core.in_flight = Some(InFlight {
                    id,
                    fut: fut.clone(),
                });
                tokio::spawn(fut.clone());
                fut
            }
        };
        fut.await
    }

    fn suppression(
        &self,
        core: &Core,
        request: CheckRequest,
        now: Instant,
    ) -> Option<&'static str> {
        if self.gate.get_state().auth_finish_in_progress {
            return Some("auth finish in progress");
        }
        if request.immediate {
            return None;
        }
        if core
            .backoff
            .should_throttle_call(core.last_call, now, request.bypass_interval)
        {
            return Some(if core.backoff.remaining(now).is_some() {
                "backoff active"
            } else {
                "minimum interval"
            });
        }
        None
    }

    /// One identity round trip, including the auth-gate retry, then commit.
    async fn perform_check(self: Arc<Self>, generation: u64, explicit: bool) -> AuthState {
        let mut outcome = self.fetcher.get_identity().await;

        if matches!(outcome, Ok(Identity::MissingIdentifier { .. })) {
            let delay = self.config.auth_gate_delay();
            tracing::warn!(
                delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                "Identity asserted without identifier, retrying once"
            );
            tokio::time::sleep(delay).await;

            let throttled = {
                let now = Instant::now();
                let mut core = self.core();
                let throttled = core.backoff.should_throttle_call(core.last_call, now, true);
                if !throttled {
                    core.last_call = Some(now);
                }
                throttled
            };
            if throttled {
                tracing::debug!("Auth-gate retry skipped, backoff active");
            } else if self.current_generation() == generation {
                self.fetcher.clear_cache();
                outcome = self.fetcher.get_identity().await;
            }
        }

        if self.current_generation() != generation {
            tracing::debug!("Discarding identity result from before cleanup");
            return self.snapshot();
        }

        match outcome {
            Ok(Identity::Authenticated {
                user,
                session_ready,
                source,
            }) => {
                self.commit_authenticated(user, session_ready, source, explicit, generation)
                    .await
            }
            Ok(Identity::MissingIdentifier { source }) => self.commit_mismatch(source, explicit),
            Ok(Identity::Anonymous { source }) => self.commit_anonymous(source, explicit),
            Err(e) if e.is_definitive_unauthenticated() => self.commit_rejected(&e, explicit),
            Err(e) => self.commit_failure(&e, explicit),
        }
    }
}
