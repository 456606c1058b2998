//! # Bootstrap Gate
//!
//! Startup coordinator shared by the orchestrator and the composition root.
//! It keeps an OAuth code exchange and identity checks from racing, and
//! guards the one-shot startup sequences against being run twice.
//!
//! The gate only records intent. Nothing here schedules work.

use std::sync::Arc;

use tokio::sync::watch;

/// Flags published by the gate.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BootstrapState {
    /// An OAuth code exchange is running; identity checks are refused.
    pub auth_finish_in_progress: bool,
    pub health_polling_active: bool,
    pub auth_bootstrap_active: bool,
    /// Completed auth-finish flows. Bumped on every `true → false` edge so
    /// listeners cannot miss a finish that happened between two polls.
    pub auth_finishes: u64,
}

/// Cloneable handle to the shared gate.
#[derive(Debug, Clone)]
pub struct BootstrapGate {
    tx: Arc<watch::Sender<BootstrapState>>,
}

impl BootstrapGate {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(BootstrapState::default());
        Self { tx: Arc::new(tx) }
    }

    pub fn get_state(&self) -> BootstrapState {
        *self.tx.borrow()
    }

    /// Receiver that observes every flag change.
    pub fn subscribe(&self) -> watch::Receiver<BootstrapState> {
        self.tx.subscribe()
    }

    pub fn set_auth_finish_in_progress(&self, in_progress: bool) {
        let changed = self.tx.send_if_modified(|state| {
            let changed = state.auth_finish_in_progress != in_progress;
            if state.auth_finish_in_progress && !in_progress {
                state.auth_finishes += 1;
            }
            state.auth_finish_in_progress = in_progress;
            changed
        });
        if changed {
            tracing::debug!(in_progress, "Auth finish flag changed");
        }
    }

    /// Claim health polling. Returns `false` if it is already running.
    pub fn start_health_polling(&self) -> bool {
        self.claim(|state| &mut state.health_polling_active)
    }

    pub fn stop_health_polling(&self) {
        self.release(|state| &mut state.health_polling_active);
    }

    /// Claim the auth bootstrap sequence. Returns `false` if it is already running.
    pub fn start_auth_bootstrap(&self) -> bool {
        self.claim(|state| &mut state.auth_bootstrap_active)
    }

    pub fn stop_auth_bootstrap(&self) {
        self.release(|state| &mut state.auth_bootstrap_active);
    }

    fn claim(&self, flag: impl Fn(&mut BootstrapState) -> &mut bool) -> bool {
        self.tx.send_if_modified(|state| {
            let slot = flag(state);
            if *slot {
                false
            } else {
                *slot = true;
                true
            }
        })
    }

    fn release(&self, flag: impl Fn(&mut BootstrapState) -> &mut bool) {
        self.tx.send_if_modified(|state| std::mem::replace(flag(state), false));
    }
}

impl Default for BootstrapGate {
    fn default() -> Self {
        Self::new()
    }
}
