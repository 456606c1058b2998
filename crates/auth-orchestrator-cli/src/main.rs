//! # auth-orchestrator-cli
//!
//! Runs the session orchestrator against a backend and keeps the music
//! and care channels connected, logging every auth and channel event
//! until interrupted.

use std::path::PathBuf;

use clap::{Parser, ValueEnum};
use tracing_subscriber::EnvFilter;

use auth_orchestrator::ChannelName;

mod app;

/// Drive the auth orchestrator and connection hub from the terminal.
#[derive(Parser)]
#[command(name = "auth-orchestrator", version, about)]
struct Cli {
    /// Path to orchestrator.toml config file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Backend API URL override
    #[arg(long)]
    api_url: Option<String>,

    /// Access token to seed the token store with
    #[arg(long, env = "AUTH_ORCHESTRATOR_TOKEN", hide_env_values = true)]
    token: Option<String>,

    /// Channels to open (repeatable)
    #[arg(long = "channel", value_enum, default_values_t = [ChannelArg::Music, ChannelArg::Care])]
    channels: Vec<ChannelArg>,

    /// Print the initial auth state as JSON and exit
    #[arg(long)]
    once: bool,

    /// Enable verbose logging (set RUST_LOG for fine-grained control)
    #[arg(short, long)]
    verbose: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum ChannelArg {
    Music,
    Care,
}

impl From<ChannelArg> for ChannelName {
    fn from(arg: ChannelArg) -> Self {
        match arg {
            ChannelArg::Music => ChannelName::Music,
            ChannelArg::Care => ChannelName::Care,
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let default_filter = if cli.verbose {
        "auth_orchestrator=debug,auth_orchestrator_cli=debug"
    } else {
        "auth_orchestrator=warn,auth_orchestrator_cli=info"
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let options = app::RunOptions {
        config_path: cli.config,
        api_url: cli.api_url,
        token: cli.token,
        channels: cli.channels.into_iter().map(ChannelName::from).collect(),
        once: cli.once,
    };

    app::run(options).await?;
    Ok(())
}
