//! Opens the music and care channels once the session is ready and
//! prints everything that arrives on them.
//!
//! ```bash
//! AUTH_ORCHESTRATOR_API_URL=http://localhost:8000 AUTH_ORCHESTRATOR_TOKEN=xxx \
//!     cargo run --example channels
//! ```

use std::sync::Arc;

use auth_orchestrator::{
    AuthOrchestrator, BootstrapGate, ChannelEvent, ChannelName, ConnectionHub, Envelope,
    EventBus, HttpSessionBackend, OrchestratorConfig, TokenStore, TungsteniteConnector,
};
use serde_json::json;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let config = OrchestratorConfig::discover(None)?;
    let events = EventBus::new();
    let tokens = TokenStore::in_memory(events.clone());
    if let Ok(token) = std::env::var("AUTH_ORCHESTRATOR_TOKEN") {
        tokens.set_tokens(token, None);
    }

    let backend = Arc::new(HttpSessionBackend::new(&config)?);
    let orchestrator = AuthOrchestrator::new(
        config.clone(),
        backend,
        tokens,
        BootstrapGate::new(),
        events,
    );
    let state = orchestrator.initialize().await;
    println!(
        "Session: authenticated={} ready={}",
        state.is_authenticated, state.session_ready
    );

    let hub = ConnectionHub::for_orchestrator(
        &orchestrator,
        Arc::new(TungsteniteConnector::new(&config)),
    );

    let mut channel_events = hub.channel_events();
    tokio::spawn(async move {
        while let Ok(event) = channel_events.recv().await {
            match event {
                ChannelEvent::Opened { channel } => println!("[{channel}] open"),
                ChannelEvent::Closed { channel } => println!("[{channel}] closed"),
                ChannelEvent::ReconnectScheduled {
                    channel,
                    attempt,
                    delay,
                } => println!("[{channel}] reconnect #{attempt} in {delay:?}"),
                ChannelEvent::Failed { channel, reason } => {
                    println!("[{channel}] failed: {reason}");
                }
                ChannelEvent::Connecting { .. } => {}
            }
        }
    });

    let mut inbound = hub.inbound();
    tokio::spawn(async move {
        while let Ok(message) = inbound.recv().await {
            println!(
                "[{}] {} {}",
                message.channel, message.envelope.topic, message.envelope.data
            );
        }
    });

    hub.start(&ChannelName::ALL);

    // Queued until the channel opens.
    hub.send_care(&Envelope::new("hello", json!({ "client": "channels-example" })))
        .await?;

    println!("Listening. Press Ctrl+C to exit.");
    tokio::signal::ctrl_c().await?;

    hub.shutdown();
    orchestrator.cleanup();
    Ok(())
}
