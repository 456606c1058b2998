//! Watches the session state and prints every committed transition.
//!
//! ```bash
//! AUTH_ORCHESTRATOR_API_URL=http://localhost:8000 cargo run --example session_watch
//! ```

use std::sync::Arc;

use auth_orchestrator::{
    AuthEvent, AuthOrchestrator, BootstrapGate, EventBus, HttpSessionBackend, OrchestratorConfig,
    TokenStore,
};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let config = OrchestratorConfig::discover(None)?;
    println!("Checking session against {}...", config.api_base_url);

    let events = EventBus::new();
    let tokens = TokenStore::in_memory(events.clone());
    let backend = Arc::new(HttpSessionBackend::new(&config)?);
    let orchestrator =
        AuthOrchestrator::new(config, backend, tokens, BootstrapGate::new(), events.clone());

    let _subscription = orchestrator.subscribe(|state| {
        println!(
            "[state v{}] authenticated={} ready={} user={:?} error={:?}",
            state.version, state.is_authenticated, state.session_ready, state.user_id, state.error
        );
    });

    let mut bus = events.subscribe();
    tokio::spawn(async move {
        while let Ok(event) = bus.recv().await {
            if matches!(event, AuthEvent::AuthMismatch { .. } | AuthEvent::SessionExpired) {
                println!("[event] {}", event.name());
            }
        }
    });

    orchestrator.initialize().await;

    // Passive checks are debounced and rate limited, so polling faster
    // than the minimum interval only returns the current state.
    println!("\nRe-checking every 10s. Press Ctrl+C to exit.\n");
    let poll_loop = async {
        let mut interval = tokio::time::interval(std::time::Duration::from_secs(10));
        interval.tick().await;
        loop {
            interval.tick().await;
            orchestrator.check_auth().await;
        }
    };

    tokio::select! {
        _ = poll_loop => {}
        _ = tokio::signal::ctrl_c() => {
            println!("\nShutting down...");
        }
    }

    orchestrator.cleanup();
    Ok(())
}
