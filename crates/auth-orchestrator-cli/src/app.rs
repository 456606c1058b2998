use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::broadcast;

use auth_orchestrator::token_store::FileStorage;
use auth_orchestrator::{
    AuthEvent, AuthOrchestrator, AuthResult, AuthState, BootstrapGate, ChannelEvent, ChannelName,
    ConnectionHub, EventBus, HttpSessionBackend, OrchestratorConfig, TokenStore,
    TungsteniteConnector,
};

/// What the binary was asked to do.
pub struct RunOptions {
    pub config_path: Option<PathBuf>,
    pub api_url: Option<String>,
    pub token: Option<String>,
    pub channels: Vec<ChannelName>,
    pub once: bool,
}

/// Wire the stack together, report the session, and keep channels alive
/// until Ctrl-C.
pub async fn run(options: RunOptions) -> AuthResult<()> {
    let config = load_config(&options)?;
    tracing::info!(api = %config.api_base_url, ws = %config.ws_base_url, "Starting");

    let events = EventBus::new();
    let tokens = match &config.token_store_path {
        Some(path) => TokenStore::new(FileStorage::new(path), events.clone()),
        None => TokenStore::in_memory(events.clone()),
    };
    if let Some(token) = &options.token {
        tokens.set_tokens(token.clone(), None);
    }

    let backend = Arc::new(HttpSessionBackend::new(&config)?);
    let orchestrator = AuthOrchestrator::new(
        config.clone(),
        backend,
        tokens,
        BootstrapGate::new(),
        events.clone(),
    );
    orchestrator.watch_token_events();

    let state = orchestrator.initialize().await;
    if options.once {
        print_state(&state);
        orchestrator.cleanup();
        return Ok(());
    }
    tracing::info!(summary = %summarize(&state), "Initial session");

    let hub = ConnectionHub::for_orchestrator(
        &orchestrator,
        Arc::new(TungsteniteConnector::new(&config)),
    );
    let mut auth_events = events.subscribe();
    let mut channel_events = hub.channel_events();
    hub.start(&options.channels);

    let interrupted = tokio::signal::ctrl_c();
    tokio::pin!(interrupted);

    loop {
        tokio::select! {
            event = auth_events.recv() => match event {
                Ok(event) => log_auth_event(&orchestrator, &event),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "Auth event log lagged");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            },
            event = channel_events.recv() => match event {
                Ok(event) => log_channel_event(&event),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "Channel event log lagged");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            },
            _ = &mut interrupted => {
                tracing::info!("Interrupted, shutting down");
                break;
            }
        }
    }

    hub.shutdown();
    orchestrator.cleanup();
    Ok(())
}

fn load_config(options: &RunOptions) -> AuthResult<OrchestratorConfig> {
    let mut config = OrchestratorConfig::discover(options.config_path.as_deref())?;
    if let Some(url) = &options.api_url {
        let ws_default = OrchestratorConfig::new(config.api_base_url.clone()).ws_base_url;
        let derived = OrchestratorConfig::new(url.clone());
        // Only follow the new API host if the socket URL was never set explicitly.
        if config.ws_base_url == ws_default {
            config.ws_base_url = derived.ws_base_url;
        }
        config.api_base_url = derived.api_base_url;
    }
    Ok(config)
}

fn log_auth_event(orchestrator: &AuthOrchestrator, event: &AuthEvent) {
    match event {
        AuthEvent::StateChanged { .. } => {
            tracing::info!(
                event = event.name(),
                summary = %summarize(&orchestrator.get_state()),
                "Session changed"
            );
        }
        AuthEvent::ConnectionFailed { channel, reason } => {
            tracing::warn!(event = event.name(), %channel, %reason, "Channel failure");
        }
        AuthEvent::AuthMismatch { .. } | AuthEvent::SessionExpired => {
            tracing::warn!(event = event.name(), ?event, "Session problem");
        }
        other => tracing::debug!(event = other.name(), "Auth event"),
    }
}

fn log_channel_event(event: &ChannelEvent) {
    match event {
        ChannelEvent::Opened { channel } => tracing::info!(%channel, "Channel open"),
        ChannelEvent::Closed { channel } => tracing::info!(%channel, "Channel closed"),
        ChannelEvent::Failed { channel, reason } => {
            tracing::warn!(%channel, %reason, "Channel gave up");
        }
        ChannelEvent::ReconnectScheduled {
            channel,
            attempt,
            delay,
        } => tracing::info!(%channel, attempt, ?delay, "Reconnecting"),
        ChannelEvent::Connecting { channel } => tracing::debug!(%channel, "Connecting"),
    }
}

fn summarize(state: &AuthState) -> String {
    match (&state.user_id, state.session_ready) {
        (Some(user), true) => format!("v{} ready as {user}", state.version),
        (Some(user), false) => format!("v{} signed in as {user}, not ready", state.version),
        (None, _) => match &state.error {
            Some(error) => format!("v{} signed out ({error})", state.version),
            None => format!("v{} signed out", state.version),
        },
    }
}

fn print_state(state: &AuthState) {
    match serde_json::to_string_pretty(state) {
        Ok(text) => println!("{text}"),
        Err(err) => {
            tracing::warn!(error = %err, "Failed to format state as JSON");
            println!("{state:?}");
        }
    }
}
