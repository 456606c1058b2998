//! Authoritative session snapshot shared by the orchestrator and its readers.

use std::time::SystemTime;

use serde::{Deserialize, Serialize};

/// Which credential mechanism produced a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CredentialSource {
    Cookie,
    Header,
    #[default]
    Missing,
}

/// The identity the backend asserted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserInfo {
    pub id: String,
    pub email: Option<String>,
}

/// Versioned, immutable snapshot of the client's authentication state.
///
/// Invariants maintained by the orchestrator:
/// - `session_ready` implies `is_authenticated`
/// - `user` is `Some` exactly when `is_authenticated` is true
/// - `version` increases by one per committed transition and never decreases
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AuthState {
    pub is_authenticated: bool,
    pub session_ready: bool,
    pub user_id: Option<String>,
    pub user: Option<UserInfo>,
    pub source: CredentialSource,
    pub version: u64,
    pub last_checked: Option<SystemTime>,
    pub is_loading: bool,
    pub error: Option<String>,
    /// Sticky: set by any 2xx identity response, kept across transient
    /// failures, cleared only by a definitive "not authenticated" answer or logout.
    pub whoami_ok: bool,
}

impl Default for AuthState {
    fn default() -> Self {
        Self {
            is_authenticated: false,
            session_ready: false,
            user_id: None,
            user: None,
            source: CredentialSource::Missing,
            version: 0,
            last_checked: None,
            is_loading: false,
            error: None,
            whoami_ok: false,
        }
    }
}

impl AuthState {
    /// Channels may only open on a fully established session.
    pub fn can_open_channels(&self) -> bool {
        self.is_authenticated && self.session_ready && self.whoami_ok
    }

    /// Compares the fields that make up a transition.
    ///
    /// `version`, `last_checked` and `is_loading` are bookkeeping and do not
    /// count as a change on their own.
    pub fn same_session_as(&self, other: &AuthState) -> bool {
        self.is_authenticated == other.is_authenticated
            && self.session_ready == other.session_ready
            && self.user_id == other.user_id
            && self.user == other.user
            && self.source == other.source
            && self.error == other.error
            && self.whoami_ok == other.whoami_ok
    }

    /// Enforce the snapshot invariants after an update.
    pub(crate) fn normalize(&mut self) {
        if self.is_authenticated && self.user.is_none() {
            self.is_authenticated = false;
        }
        if !self.is_authenticated {
            self.session_ready = false;
            self.user = None;
            self.user_id = None;
        } else {
            self.user_id = self.user.as_ref().map(|u| u.id.clone());
        }
    }
}

/// Read-only access to the current session, for components that gate on
/// it but must never trigger a check themselves.
pub trait AuthStateSource: Send + Sync {
    fn auth_snapshot(&self) -> AuthState;
}
