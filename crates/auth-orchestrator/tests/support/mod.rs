#![allow(dead_code)]

pub mod http_responder;
pub mod mock_backend;
pub mod mock_socket;
pub mod mock_ws_server;

use std::sync::{Arc, Mutex};
use std::time::Duration;

use auth_orchestrator::{
    AuthOrchestrator, AuthState, AuthStateSource, BootstrapGate, EventBus, OrchestratorConfig,
    TokenStore, UserInfo,
};

use mock_backend::ScriptedBackend;

/// Defaults tuned for tests: short auth-gate delay, no background polling.
pub fn test_config() -> OrchestratorConfig {
    let mut config = OrchestratorConfig::new("http://backend.test");
    config.ws_base_url = "ws://backend.test".into();
    config.test_mode = true;
    config.health.enabled = false;
    config
}

pub struct Harness {
    pub orchestrator: AuthOrchestrator,
    pub backend: Arc<ScriptedBackend>,
    pub events: EventBus,
    pub gate: BootstrapGate,
    pub tokens: TokenStore,
}

impl Harness {
    pub fn new(backend: ScriptedBackend) -> Self {
        Self::with_config(test_config(), backend)
    }

    pub fn with_config(config: OrchestratorConfig, backend: ScriptedBackend) -> Self {
        let backend = Arc::new(backend);
        let events = EventBus::new();
        let tokens = TokenStore::in_memory(events.clone());
        let gate = BootstrapGate::new();
        let orchestrator = AuthOrchestrator::new(
            config,
            backend.clone(),
            tokens.clone(),
            gate.clone(),
            events.clone(),
        );
        Self {
            orchestrator,
            backend,
            events,
            gate,
            tokens,
        }
    }
}

/// Poll until `predicate` holds for the orchestrator state.
pub async fn wait_for_state(
    orchestrator: &AuthOrchestrator,
    predicate: impl Fn(&AuthState) -> bool,
) -> AuthState {
    for _ in 0..500 {
        let state = orchestrator.get_state();
        if predicate(&state) {
            return state;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("state never matched: {:?}", orchestrator.get_state());
}

/// Poll until `condition` holds.
pub async fn wait_until(mut condition: impl FnMut() -> bool) {
    for _ in 0..500 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition never became true");
}

/// Settable [`AuthStateSource`] for driving the hub without an orchestrator.
#[derive(Default)]
pub struct StaticAuth {
    state: Mutex<AuthState>,
}

impl StaticAuth {
    pub fn ready() -> Self {
        let auth = Self::default();
        auth.set_ready(true);
        auth
    }

    pub fn set_ready(&self, ready: bool) {
        let mut state = self.state.lock().unwrap();
        *state = if ready {
            AuthState {
                is_authenticated: true,
                session_ready: true,
                user_id: Some("u-1".into()),
                user: Some(UserInfo {
                    id: "u-1".into(),
                    email: None,
                }),
                whoami_ok: true,
                version: state.version + 1,
                ..AuthState::default()
            }
        } else {
            AuthState {
                version: state.version + 1,
                ..AuthState::default()
            }
        };
    }

    pub fn version(&self) -> u64 {
        self.state.lock().unwrap().version
    }
}

impl AuthStateSource for StaticAuth {
    fn auth_snapshot(&self) -> AuthState {
        self.state.lock().unwrap().clone()
    }
}
