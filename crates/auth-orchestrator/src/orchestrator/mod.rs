//! # Auth Orchestrator
//!
//! The single component allowed to call the identity endpoint. It owns the
//! authoritative [`AuthState`], serializes and debounces check requests,
//! gates readiness on backend health, dampens oscillation, and coordinates
//! with the [`BootstrapGate`].
//!
//! ## Usage
//!
//! ```no_run
//! use std::sync::Arc;
//! use auth_orchestrator::{
//!     AuthOrchestrator, BootstrapGate, EventBus, HttpSessionBackend, OrchestratorConfig,
//!     TokenStore,
//! };
//!
//! # async fn demo() -> auth_orchestrator::AuthResult<()> {
//! let config = OrchestratorConfig::discover(None)?;
//! let events = EventBus::new();
//! let tokens = TokenStore::in_memory(events.clone());
//! let backend = Arc::new(HttpSessionBackend::new(&config)?);
//!
//! let orchestrator =
//!     AuthOrchestrator::new(config, backend, tokens, BootstrapGate::new(), events);
//!
//! let _subscription = orchestrator.subscribe(|state| {
//!     println!("v{} authenticated={}", state.version, state.is_authenticated);
//! });
//!
//! let state = orchestrator.initialize().await;
//! println!("ready: {}", state.session_ready);
//! # Ok(())
//! # }
//! ```
//!
//! ## Check Pipeline
//!
//! 1. `check_auth` / `refresh_auth` join a trailing debounce window
//! 2. The check is refused while an auth finish is in progress, and
//!    throttled by the failure backoff and minimum interval
//! 3. At most one identity request is outstanding; late callers share it
//! 4. The result is committed through `set_state`, which diffs, bumps the
//!    version, runs oscillation accounting, and notifies subscribers
//!
//! Errors never escape the public check methods. They land in
//! [`AuthState::error`].

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use futures_util::future::{BoxFuture, Shared};
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::backend::SessionBackend;
use crate::backoff::BackoffManager;
use crate::bootstrap::BootstrapGate;
use crate::config::OrchestratorConfig;
use crate::events::EventBus;
use crate::health::{HealthMonitor, HealthProbe};
use crate::identity::ResilientIdentityFetcher;
use crate::oscillation::OscillationDetector;
use crate::state::{AuthState, AuthStateSource};
use crate::token_store::TokenStore;

mod check;
mod commit;
mod session;

/// Awaitable result of a scheduled check. Cloning shares the same check.
pub type CheckFuture = Shared<BoxFuture<'static, AuthState>>;

type Callback = Arc<dyn Fn(&AuthState) + Send + Sync>;

/// Mutable orchestrator state. Never held across an `.await`.
struct Core {
    state: AuthState,
    backoff: BackoffManager,
    oscillation: OscillationDetector,
    last_call: Option<Instant>,
    in_flight: Option<check::InFlight>,
    pending: Option<check::PendingDebounce>,
    explicit_until: Option<Instant>,
    next_check_id: u64,
    /// Readiness the backend last claimed, restored after a health outage.
    claimed_ready: Option<bool>,
    backend_unhealthy: bool,
}

struct Subscribers {
    next_id: u64,
    callbacks: Vec<(u64, Callback)>,
}

struct Inner {
    config: OrchestratorConfig,
    backend: Arc<dyn SessionBackend>,
    fetcher: ResilientIdentityFetcher,
    health: Arc<HealthProbe>,
    tokens: TokenStore,
    gate: BootstrapGate,
    events: EventBus,
    core: Mutex<Core>,
    subscribers: Mutex<Subscribers>,
    /// Bumped by `cleanup`; results from an older generation are dropped.
    generation: AtomicU64,
    initialized: AtomicBool,
    callback_params_consumed: AtomicBool,
    init: Mutex<Option<CheckFuture>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    monitor: Mutex<Option<HealthMonitor>>,
}

/// Cloneable handle to the orchestrator. Construct one per application.
#[derive(Clone)]
pub struct AuthOrchestrator {
    inner: Arc<Inner>,
}

/// Handle returned by [`AuthOrchestrator::subscribe`].
#[derive(Debug)]
pub struct Subscription {
    id: u64,
    inner: Weak<Inner>,
}

impl Subscription {
    /// Stop receiving notifications.
    pub fn unsubscribe(self) {
        if let Some(inner) = self.inner.upgrade() {
            lock(&inner.subscribers)
                .callbacks
                .retain(|(id, _)| *id != self.id);
        }
    }
}

impl std::fmt::Debug for Inner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Inner")
            .field("generation", &self.generation.load(Ordering::SeqCst))
            .field("initialized", &self.initialized.load(Ordering::SeqCst))
            .finish_non_exhaustive()
    }
}

impl AuthOrchestrator {
    pub fn new(
        config: OrchestratorConfig,
        backend: Arc<dyn SessionBackend>,
        tokens: TokenStore,
        gate: BootstrapGate,
        events: EventBus,
    ) -> Self {
        let fetcher =
            ResilientIdentityFetcher::new(Arc::clone(&backend), tokens.clone(), &config.identity);
        let health = Arc::new(HealthProbe::new(Arc::clone(&backend), &config));

        let core = Core {
            state: AuthState::default(),
            backoff: BackoffManager::new(&config.checks),
            oscillation: OscillationDetector::new(),
            last_call: None,
            in_flight: None,
            pending: None,
            explicit_until: None,
            next_check_id: 0,
            claimed_ready: None,
            backend_unhealthy: false,
        };

        Self {
            inner: Arc::new(Inner {
                config,
                backend,
                fetcher,
                health,
                tokens,
                gate,
                events,
                core: Mutex::new(core),
                subscribers: Mutex::new(Subscribers {
                    next_id: 0,
                    callbacks: Vec::new(),
                }),
                generation: AtomicU64::new(0),
                initialized: AtomicBool::new(false),
                callback_params_consumed: AtomicBool::new(false),
                init: Mutex::new(None),
                tasks: Mutex::new(Vec::new()),
                monitor: Mutex::new(None),
            }),
        }
    }

    /// Immutable snapshot of the current state.
    pub fn get_state(&self) -> AuthState {
        self.inner.snapshot()
    }

    /// Register a callback run synchronously, in subscription order, after
    /// every committed change. No-op updates do not notify.
    pub fn subscribe<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&AuthState) + Send + Sync + 'static,
    {
        let mut subscribers = lock(&self.inner.subscribers);
        let id = subscribers.next_id;
        subscribers.next_id += 1;
        subscribers.callbacks.push((id, Arc::new(callback)));
        Subscription {
            id,
            inner: Arc::downgrade(&self.inner),
        }
    }

    /// Arm the one-shot explicit-change flag. The next commit (or the next
    /// check scheduled while armed) is eligible for oscillation accounting.
    pub fn mark_explicit_state_change(&self) {
        let window =
            std::time::Duration::from_millis(self.inner.config.checks.explicit_change_window_ms);
        self.inner.core().explicit_until = Some(Instant::now() + window);
    }

    /// Whether the first check has completed.
    pub fn is_initialized(&self) -> bool {
        self.inner.initialized.load(Ordering::SeqCst)
    }

    /// Shared health probe, for the connection hub.
    pub fn health_probe(&self) -> Arc<HealthProbe> {
        Arc::clone(&self.inner.health)
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.inner.config
    }

    pub fn events(&self) -> &EventBus {
        &self.inner.events
    }

    pub fn token_store(&self) -> &TokenStore {
        &self.inner.tokens
    }

    pub fn bootstrap_gate(&self) -> &BootstrapGate {
        &self.inner.gate
    }

    /// Consecutive oscillation events seen so far.
    pub fn oscillation_count(&self) -> u32 {
        self.inner.core().oscillation.count()
    }

    /// Time left before identity checks are allowed again, if throttled by backoff.
    pub fn backoff_remaining(&self) -> Option<std::time::Duration> {
        self.inner.core().backoff.remaining(Instant::now())
    }

    /// Identity cache diagnostics.
    pub fn identity_cache_status(&self) -> crate::identity::CacheStatus {
        self.inner.fetcher.get_cache_status()
    }

    /// Drop subscribers, pending timers, background tasks, and the identity
    /// cache. A check already on the wire finishes but its result is ignored.
    pub fn cleanup(&self) {
        let inner = &self.inner;
        inner.generation.fetch_add(1, Ordering::SeqCst);

        let pending = {
            let mut core = inner.core();
            core.in_flight = None;
            core.explicit_until = None;
            core.state.is_loading = false;
            core.pending.take()
        };
        if let Some(pending) = pending {
            pending.driver.abort();
        }

        lock(&inner.subscribers).callbacks.clear();
        inner.fetcher.clear_cache();

        for task in lock(&inner.tasks).drain(..) {
            task.abort();
        }
        if lock(&inner.monitor).take().is_some() {
            inner.gate.stop_health_polling();
        }

        *lock(&inner.init) = None;
        inner.initialized.store(false, Ordering::SeqCst);
        tracing::debug!("Orchestrator cleaned up");
    }
}

impl AuthStateSource for AuthOrchestrator {
    fn auth_snapshot(&self) -> AuthState {
        self.get_state()
    }
}

impl Inner {
    fn core(&self) -> MutexGuard<'_, Core> {
        lock(&self.core)
    }

    fn snapshot(&self) -> AuthState {
        self.core().state.clone()
    }

    fn current_generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    fn track_task(&self, handle: JoinHandle<()>) {
        let mut tasks = lock(&self.tasks);
        tasks.retain(|task| !task.is_finished());
        tasks.push(handle);
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        for task in lock(&self.tasks).drain(..) {
            task.abort();
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
