//! # auth-orchestrator
//!
//! Client-side session orchestration for a backend that authenticates with
//! cookies or bearer tokens and pushes data over WebSocket channels.
//!
//! The crate keeps one authoritative [`AuthState`] and makes sure that:
//!
//! - identity checks are debounced, rate limited, and never overlap
//! - a backend that flaps between "authenticated" and "not authenticated"
//!   is dampened with escalating backoff instead of hammered
//! - readiness follows backend health
//! - channels only connect on an established session, and socket failures
//!   never turn into identity checks
//!
//! ## Quick Start
//!
//! ```ignore
//! use std::sync::Arc;
//! use auth_orchestrator::{
//!     AuthOrchestrator, BootstrapGate, ChannelName, ConnectionHub, EventBus,
//!     HttpSessionBackend, OrchestratorConfig, TokenStore, TungsteniteConnector,
//! };
//!
//! #[tokio::main]
//! async fn main() -> auth_orchestrator::AuthResult<()> {
//!     // Load config from environment or orchestrator.toml
//!     let config = OrchestratorConfig::discover(None)?;
//!
//!     let events = EventBus::new();
//!     let tokens = TokenStore::in_memory(events.clone());
//!     let backend = Arc::new(HttpSessionBackend::new(&config)?);
//!     let orchestrator = AuthOrchestrator::new(
//!         config.clone(),
//!         backend,
//!         tokens,
//!         BootstrapGate::new(),
//!         events,
//!     );
//!
//!     let state = orchestrator.initialize().await;
//!     println!("authenticated: {}", state.is_authenticated);
//!
//!     let hub = ConnectionHub::for_orchestrator(
//!         &orchestrator,
//!         Arc::new(TungsteniteConnector::new(&config)),
//!     );
//!     hub.start(&[ChannelName::Music, ChannelName::Care]);
//!
//!     orchestrator.cleanup();
//!     Ok(())
//! }
//! ```
//!
//! ## Components
//!
//! | Component | Type | Role |
//! |-----------|------|------|
//! | Orchestrator | [`AuthOrchestrator`] | Owns `AuthState`, the only caller of the identity endpoint |
//! | Identity fetcher | [`ResilientIdentityFetcher`] | Retry plus a short epoch-keyed cache |
//! | Token store | [`TokenStore`] | Access/refresh tokens and the credential epoch |
//! | Bootstrap gate | [`BootstrapGate`] | Startup idempotency and the auth-finish lock |
//! | Connection hub | [`ConnectionHub`] | Auth-gated `music` and `care` channels |
//!
//! ## Configuration
//!
//! See [`OrchestratorConfig`] for the full configuration reference.
//! The simplest setup uses environment variables:
//!
//! ```bash
//! export AUTH_ORCHESTRATOR_API_URL="https://api.example.com"
//! export AUTH_ORCHESTRATOR_WS_URL="wss://api.example.com"
//! ```
//!
//! Or an `orchestrator.toml` file:
//!
//! ```toml
//! api_base_url = "https://api.example.com"
//! ws_base_url = "wss://api.example.com"
//! ```

pub mod backend;
pub mod backoff;
pub mod bootstrap;
pub mod config;
pub mod error;
pub mod events;
pub mod health;
pub mod hub;
pub mod identity;
pub mod orchestrator;
pub mod oscillation;
pub mod protocol;
pub mod retry;
pub mod state;
pub mod token_store;

// ─── Public re-exports ──────────────────────────────────────────────────

pub use backend::{HttpSessionBackend, SessionBackend};
pub use bootstrap::{BootstrapGate, BootstrapState};
pub use config::OrchestratorConfig;
pub use error::{AuthError, AuthResult};
pub use events::{AuthEvent, EventBus};
pub use hub::{ChannelEvent, ChannelName, ConnectionHub, FailureReason, TungsteniteConnector};
pub use identity::ResilientIdentityFetcher;
pub use orchestrator::{AuthOrchestrator, CheckFuture, Subscription};
pub use protocol::envelope::Envelope;
pub use state::{AuthState, AuthStateSource, CredentialSource, UserInfo};
pub use token_store::{TokenPair, TokenStore};
