//! # Error Types
//!
//! Semantic error types for session orchestration. Every variant carries
//! enough context to diagnose the problem without digging through logs.
//!
//! ## Status Classification
//!
//! The identity endpoint answers with plain HTTP statuses.
//! [`AuthError::is_retryable`] and [`AuthError::is_definitive_unauthenticated`]
//! split them into the two buckets the orchestrator cares about:
//!
//! | Status | Bucket |
//! |--------|--------|
//! | `5xx`, `408`, `429` | transient, retried with backoff |
//! | other `4xx` | definitive "not authenticated", never retried |
//! | network / timeout | transient, retried with backoff |

use thiserror::Error;

/// Convenient Result alias for orchestrator operations.
pub type AuthResult<T> = std::result::Result<T, AuthError>;

/// All errors that can occur while checking, refreshing, or transporting a session.
#[derive(Error, Debug)]
pub enum AuthError {
    // ─── HTTP ───────────────────────────────────────────────────────
    /// The backend answered with a non-2xx status.
    #[error("Backend returned HTTP {status}")]
    Http { status: u16 },

    /// The request never produced a response (DNS, refused, reset, ...).
    #[error("Network error: {reason}")]
    Network { reason: String },

    /// The request did not complete in time.
    #[error("Request timed out after {millis}ms")]
    Timeout { millis: u64 },

    /// The response body did not match the expected schema.
    #[error("Malformed response: {reason}")]
    MalformedResponse { reason: String },

    // ─── Retry ──────────────────────────────────────────────────────
    /// All retry attempts have been exhausted.
    #[error("Operation failed after {attempts} attempts: {last_error}")]
    RetriesExhausted {
        attempts: u32,
        last_error: Box<AuthError>,
    },

    // ─── Session ────────────────────────────────────────────────────
    /// No refresh token is stored, so the session cannot be renewed.
    #[error("No refresh token available")]
    MissingRefreshToken,

    // ─── WebSocket ──────────────────────────────────────────────────
    /// Failed to open a channel socket.
    #[error("Failed to connect to {url}: {reason}")]
    ConnectionFailed { url: String, reason: String },

    // ─── Storage ────────────────────────────────────────────────────
    /// Persistent token storage could not be read or written.
    #[error("Token storage error: {reason}")]
    Storage { reason: String },

    // ─── Config ─────────────────────────────────────────────────────
    /// Configuration file error (missing, malformed, or invalid values).
    #[error("Configuration error: {reason}")]
    ConfigError { reason: String },

    // ─── I/O ────────────────────────────────────────────────────────
    /// Filesystem or I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl AuthError {
    /// The HTTP status carried by this error, looking through retry wrappers.
    pub fn status(&self) -> Option<u16> {
        match self {
            AuthError::Http { status } => Some(*status),
            AuthError::RetriesExhausted { last_error, .. } => last_error.status(),
            _ => None,
        }
    }

    /// Returns `true` if this error is transient and the request can be retried.
    pub fn is_retryable(&self) -> bool {
        match self {
            AuthError::Http { status } => is_retryable_status(*status),
            AuthError::Network { .. } | AuthError::Timeout { .. } => true,
            _ => false,
        }
    }

    /// Returns `true` if the backend definitively said "no session".
    ///
    /// These are client errors other than `408` and `429`; retrying them
    /// cannot change the answer.
    pub fn is_definitive_unauthenticated(&self) -> bool {
        self.status()
            .is_some_and(|status| (400..500).contains(&status) && !is_retryable_status(status))
    }
}

/// `5xx`, `408 Request Timeout` and `429 Too Many Requests` are transient.
pub fn is_retryable_status(status: u16) -> bool {
    status >= 500 || status == 408 || status == 429
}

// ─── From impls for external error types ────────────────────────────────

impl From<reqwest::Error> for AuthError {
    fn from(err: reqwest::Error) -> Self {
        if let Some(status) = err.status() {
            AuthError::Http {
                status: status.as_u16(),
            }
        } else if err.is_timeout() {
            AuthError::Timeout { millis: 0 }
        } else {
            AuthError::Network {
                reason: err.to_string(),
            }
        }
    }
}

#[cfg(feature = "config-toml")]
impl From<toml::de::Error> for AuthError {
    fn from(err: toml::de::Error) -> Self {
        AuthError::ConfigError {
            reason: err.to_string(),
        }
    }
}
