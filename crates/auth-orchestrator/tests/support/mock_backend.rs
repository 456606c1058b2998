use std::collections::VecDeque;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use auth_orchestrator::error::{AuthError, AuthResult};
use auth_orchestrator::health::HealthVerdict;
use auth_orchestrator::protocol::identity::Identity;
use auth_orchestrator::{CredentialSource, TokenPair, UserInfo};
use auth_orchestrator::SessionBackend;

/// One scripted identity endpoint answer.
#[derive(Debug, Clone)]
pub enum Reply {
    Authenticated { id: &'static str, ready: Option<bool> },
    MissingIdentifier,
    Anonymous,
    Status(u16),
    NetworkDown,
}

impl Reply {
    pub fn user(id: &'static str) -> Self {
        Reply::Authenticated {
            id,
            ready: Some(true),
        }
    }

    fn into_result(self) -> AuthResult<Identity> {
        match self {
            Reply::Authenticated { id, ready } => Ok(Identity::Authenticated {
                user: UserInfo {
                    id: id.to_string(),
                    email: None,
                },
                session_ready: ready,
                source: CredentialSource::Header,
            }),
            Reply::MissingIdentifier => Ok(Identity::MissingIdentifier {
                source: CredentialSource::Cookie,
            }),
            Reply::Anonymous => Ok(Identity::Anonymous {
                source: CredentialSource::Missing,
            }),
            Reply::Status(status) => Err(AuthError::Http { status }),
            Reply::NetworkDown => Err(AuthError::Network {
                reason: "connection refused".into(),
            }),
        }
    }
}

/// [`SessionBackend`] that answers from a script and counts every call.
pub struct ScriptedBackend {
    script: Mutex<VecDeque<Reply>>,
    fallback: Mutex<Reply>,
    identity_delay: Mutex<Duration>,
    identity_calls: AtomicUsize,
    tokens_seen: Mutex<Vec<Option<String>>>,
    healthy: AtomicBool,
    health_calls: AtomicUsize,
    refresh_reply: Mutex<Result<TokenPair, u16>>,
    refresh_calls: AtomicUsize,
}

impl ScriptedBackend {
    /// Always answers `reply` unless a script is queued.
    pub fn answering(reply: Reply) -> Self {
        Self {
            script: Mutex::new(VecDeque::new()),
            fallback: Mutex::new(reply),
            identity_delay: Mutex::new(Duration::ZERO),
            identity_calls: AtomicUsize::new(0),
            tokens_seen: Mutex::new(Vec::new()),
            healthy: AtomicBool::new(true),
            health_calls: AtomicUsize::new(0),
            refresh_reply: Mutex::new(Err(401)),
            refresh_calls: AtomicUsize::new(0),
        }
    }

    /// Answers `replies` in order, then `fallback` forever.
    pub fn scripted(replies: impl IntoIterator<Item = Reply>, fallback: Reply) -> Self {
        let backend = Self::answering(fallback);
        backend.script.lock().unwrap().extend(replies);
        backend
    }

    pub fn with_delay(self, delay: Duration) -> Self {
        *self.identity_delay.lock().unwrap() = delay;
        self
    }

    pub fn set_fallback(&self, reply: Reply) {
        *self.fallback.lock().unwrap() = reply;
    }

    pub fn set_healthy(&self, healthy: bool) {
        self.healthy.store(healthy, Ordering::SeqCst);
    }

    pub fn set_refresh_reply(&self, reply: Result<TokenPair, u16>) {
        *self.refresh_reply.lock().unwrap() = reply;
    }

    pub fn identity_calls(&self) -> usize {
        self.identity_calls.load(Ordering::SeqCst)
    }

    pub fn health_calls(&self) -> usize {
        self.health_calls.load(Ordering::SeqCst)
    }

    pub fn refresh_calls(&self) -> usize {
        self.refresh_calls.load(Ordering::SeqCst)
    }

    pub fn tokens_seen(&self) -> Vec<Option<String>> {
        self.tokens_seen.lock().unwrap().clone()
    }

    fn next_reply(&self) -> Reply {
        self.script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| self.fallback.lock().unwrap().clone())
    }
}

#[async_trait]
impl SessionBackend for ScriptedBackend {
    async fn fetch_identity(&self, token: Option<&str>) -> AuthResult<Identity> {
        self.identity_calls.fetch_add(1, Ordering::SeqCst);
        self.tokens_seen
            .lock()
            .unwrap()
            .push(token.map(str::to_string));

        let delay = *self.identity_delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        self.next_reply().into_result()
    }

    async fn probe_health(&self) -> HealthVerdict {
        self.health_calls.fetch_add(1, Ordering::SeqCst);
        if self.healthy.load(Ordering::SeqCst) {
            HealthVerdict::Reachable { status: 200 }
        } else {
            HealthVerdict::Unreachable {
                reason: "HTTP 503".into(),
            }
        }
    }

    async fn refresh_tokens(&self, _refresh_token: &str) -> AuthResult<TokenPair> {
        self.refresh_calls.fetch_add(1, Ordering::SeqCst);
        self.refresh_reply
            .lock()
            .unwrap()
            .clone()
            .map_err(|status| AuthError::Http { status })
    }
}
