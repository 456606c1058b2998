//! # Event Bus
//!
//! Typed replacement for the process-wide browser events the UI layer
//! listens to. Every component receives an [`EventBus`] at construction;
//! the wire names returned by [`AuthEvent::name`] are kept stable so the
//! integration seam looks the same from the outside.

use tokio::sync::broadcast;

use crate::hub::{ChannelName, FailureReason};

/// Buffer size for the event broadcast channel.
const EVENT_CHANNEL_BUFFER: usize = 128;

/// Events emitted by the token store, orchestrator, and connection hub.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthEvent {
    /// New tokens were stored.
    TokensSet { epoch: String },

    /// Tokens were removed.
    TokensCleared { epoch: String },

    /// The credential epoch moved without a token change.
    EpochBumped { epoch: String },

    /// A new [`AuthState`](crate::state::AuthState) was committed.
    StateChanged {
        version: u64,
        is_authenticated: bool,
        session_ready: bool,
    },

    /// The backend claimed a session but never produced an identifier.
    AuthMismatch { reason: String },

    /// Refreshing the session failed; the user has to log in again.
    SessionExpired,

    /// The first authenticated check finished; OAuth callback parameters
    /// in the page URL can be discarded.
    CallbackParamsConsumed,

    /// A channel could not connect.
    ConnectionFailed {
        channel: ChannelName,
        reason: FailureReason,
    },
}

impl AuthEvent {
    /// Stable wire name for this event.
    pub fn name(&self) -> &'static str {
        match self {
            AuthEvent::TokensSet { .. } => "auth:tokens_set",
            AuthEvent::TokensCleared { .. } => "auth:tokens_cleared",
            AuthEvent::EpochBumped { .. } => "auth:epoch_bumped",
            AuthEvent::StateChanged { .. } => "auth:state_changed",
            AuthEvent::AuthMismatch { .. } => "auth-mismatch",
            AuthEvent::SessionExpired => "auth:session_expired",
            AuthEvent::CallbackParamsConsumed => "auth:callback_params_consumed",
            AuthEvent::ConnectionFailed { .. } => "ws:connection_failed",
        }
    }

    /// Events that change which credentials a channel should present.
    pub fn changes_credentials(&self) -> bool {
        matches!(
            self,
            AuthEvent::TokensSet { .. }
                | AuthEvent::TokensCleared { .. }
                | AuthEvent::EpochBumped { .. }
        )
    }
}

/// Cloneable handle to the shared event broadcast.
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<AuthEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(EVENT_CHANNEL_BUFFER);
        Self { tx }
    }

    /// Publish an event. Having no listeners is not an error.
    pub fn emit(&self, event: AuthEvent) {
        tracing::debug!(event = event.name(), "Emitting event");
        let _ = self.tx.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<AuthEvent> {
        self.tx.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
