//! Identity endpoint payloads.
//!
//! The raw body is deserialized into [`WhoamiPayload`] and then validated
//! into the tagged [`Identity`] enum. Nothing downstream probes optional
//! fields to guess what the backend meant.

use serde::{Deserialize, Serialize};

use crate::error::{AuthError, AuthResult};
use crate::state::{CredentialSource, UserInfo};

/// Raw `200` body of the identity endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WhoamiPayload {
    pub is_authenticated: bool,
    #[serde(default)]
    pub session_ready: Option<bool>,
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub source: Option<CredentialSource>,
}

/// What the identity endpoint asserted, after validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Identity {
    /// A session with a usable identifier.
    Authenticated {
        user: UserInfo,
        /// Readiness as claimed by the backend, if it said anything.
        session_ready: Option<bool>,
        source: CredentialSource,
    },

    /// The backend claims a session but sent no identifier. Usually a
    /// cookie that has not propagated yet.
    MissingIdentifier { source: CredentialSource },

    /// The backend answered and there is no session.
    Anonymous { source: CredentialSource },
}

impl Identity {
    /// Parse and validate an identity response body.
    ///
    /// # Errors
    /// Returns [`AuthError::MalformedResponse`] if the body is not a JSON
    /// object with a boolean `is_authenticated`.
    pub fn from_body(body: &str) -> AuthResult<Self> {
        let payload: WhoamiPayload =
            serde_json::from_str(body).map_err(|e| AuthError::MalformedResponse {
                reason: format!("identity body: {e}"),
            })?;
        Ok(Self::from_payload(payload))
    }

    pub fn from_payload(payload: WhoamiPayload) -> Self {
        let source = payload.source.unwrap_or_default();
        if !payload.is_authenticated {
            return Identity::Anonymous { source };
        }

        match payload.user_id.filter(|id| !id.trim().is_empty()) {
            Some(id) => Identity::Authenticated {
                user: UserInfo {
                    id,
                    email: payload.email,
                },
                session_ready: payload.session_ready,
                source,
            },
            None => Identity::MissingIdentifier { source },
        }
    }
}

/// Body of a token refresh request.
#[derive(Debug, Serialize)]
pub struct RefreshRequest<'a> {
    pub refresh_token: &'a str,
}

/// `2xx` body of the token refresh endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct RefreshResponse {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
}
