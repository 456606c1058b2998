//! # Session Backend
//!
//! The HTTP seam between the orchestrator and the server-authoritative
//! session. [`SessionBackend`] is what every component depends on;
//! [`HttpSessionBackend`] is the `reqwest` implementation used in
//! production, and tests swap in scripted mocks.

use std::time::Duration;

use async_trait::async_trait;

use crate::config::OrchestratorConfig;
use crate::error::{AuthError, AuthResult};
use crate::health::HealthVerdict;
use crate::protocol::constants::Headers;
use crate::protocol::identity::{Identity, RefreshRequest, RefreshResponse};
use crate::token_store::TokenPair;

/// Backend calls the orchestrator and hub depend on.
#[async_trait]
pub trait SessionBackend: Send + Sync {
    /// Ask the identity endpoint who we are.
    ///
    /// # Errors
    /// [`AuthError::Http`] for any non-2xx status, transport errors, and
    /// [`AuthError::MalformedResponse`] for bodies that fail validation.
    async fn fetch_identity(&self, token: Option<&str>) -> AuthResult<Identity>;

    /// Probe the health endpoint. Never fails; unreachability is a verdict.
    async fn probe_health(&self) -> HealthVerdict;

    /// Exchange a refresh token for a new pair.
    ///
    /// # Errors
    /// [`AuthError::Http`] when the backend rejects the refresh token.
    async fn refresh_tokens(&self, refresh_token: &str) -> AuthResult<TokenPair>;
}

/// `reqwest`-backed [`SessionBackend`].
#[derive(Debug, Clone)]
pub struct HttpSessionBackend {
    http: reqwest::Client,
    whoami_url: String,
    health_url: String,
    refresh_url: String,
    request_timeout: Duration,
    health_timeout: Duration,
}

impl HttpSessionBackend {
    /// Build a backend client from config.
    ///
    /// # Errors
    /// Returns [`AuthError::ConfigError`] if the HTTP client cannot be built.
    pub fn new(config: &OrchestratorConfig) -> AuthResult<Self> {
        let request_timeout = Duration::from_millis(config.timeouts.request_timeout_ms);
        let http = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(|e| AuthError::ConfigError {
                reason: format!("Failed to build HTTP client: {e}"),
            })?;

        Ok(Self {
            http,
            whoami_url: config.whoami_url(),
            health_url: config.health_url(),
            refresh_url: config.refresh_url(),
            request_timeout,
            health_timeout: Duration::from_millis(config.timeouts.health_probe_timeout_ms),
        })
    }
}

#[async_trait]
impl SessionBackend for HttpSessionBackend {
    async fn fetch_identity(&self, token: Option<&str>) -> AuthResult<Identity> {
        let mut request = self
            .http
            .get(&self.whoami_url)
            .header(Headers::REQUESTED_WITH, Headers::REQUESTED_WITH_VALUE);
        if let Some(token) = token {
            request = request.bearer_auth(token);
        }

        let response = request
            .send()
            .await
            .map_err(|e| map_send_error(e, self.request_timeout))?;

        let status = response.status();
        if !status.is_success() {
            tracing::debug!(status = status.as_u16(), "Identity endpoint rejected request");
            return Err(AuthError::Http {
                status: status.as_u16(),
            });
        }

        let body = response
            .text()
            .await
            .map_err(|e| map_send_error(e, self.request_timeout))?;
        Identity::from_body(&body)
    }

    async fn probe_health(&self) -> HealthVerdict {
        match self
            .http
            .get(&self.health_url)
            .timeout(self.health_timeout)
            .send()
            .await
        {
            Ok(response) => HealthVerdict::from_status(response.status().as_u16()),
            Err(e) => HealthVerdict::Unreachable {
                reason: e.to_string(),
            },
        }
    }

    async fn refresh_tokens(&self, refresh_token: &str) -> AuthResult<TokenPair> {
        let response = self
            .http
            .post(&self.refresh_url)
            .header(Headers::REQUESTED_WITH, Headers::REQUESTED_WITH_VALUE)
            .json(&RefreshRequest { refresh_token })
            .send()
            .await
            .map_err(|e| map_send_error(e, self.request_timeout))?;

        let status = response.status();
        if !status.is_success() {
            return Err(AuthError::Http {
                status: status.as_u16(),
            });
        }

        let text = response
            .text()
            .await
            .map_err(|e| map_send_error(e, self.request_timeout))?;
        let parsed: RefreshResponse =
            serde_json::from_str(&text).map_err(|e| AuthError::MalformedResponse {
                reason: format!("refresh body: {e}"),
            })?;

        Ok(TokenPair {
            access: Some(parsed.access_token),
            refresh: parsed.refresh_token,
        })
    }
}

fn map_send_error(err: reqwest::Error, timeout: Duration) -> AuthError {
    if err.is_timeout() {
        AuthError::Timeout {
            millis: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
        }
    } else {
        err.into()
    }
}
