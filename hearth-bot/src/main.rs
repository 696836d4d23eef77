//! hearth-bot: community bot for voice channels and live streamers.
//!
//! Connects to the platform bridge and runs until Ctrl+C. Commands:
//!
//!   !voice [name]   Create a temporary voice channel
//!   !live           Who is streaming right now
//!   !help           List commands

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use hearth_sdk::client::{self, ConnectConfig, ReconnectConfig};
use hearth_sdk::gateway::Gateway;
use tracing_subscriber::EnvFilter;

use hearth_bot::channels::ChannelLifecycle;
use hearth_bot::commands::Commands;
use hearth_bot::config::Settings;
use hearth_bot::dispatch::Dispatcher;
use hearth_bot::streamers::StreamerRotation;

#[derive(Parser)]
#[command(name = "hearth-bot", about = "Community bot: voice channels and live streamers")]
struct Args {
    /// Platform bridge address (host:port)
    #[arg(long, env = "HEARTH_BRIDGE", default_value = "127.0.0.1:7878")]
    bridge: String,

    /// Settings file (TOML); defaults apply when omitted
    #[arg(long, env = "HEARTH_CONFIG")]
    config: Option<PathBuf>,

    /// Seconds a gateway request waits for its reply
    #[arg(long, default_value_t = 15)]
    request_timeout: u64,

    /// Log as JSON (or set HEARTH_LOG_JSON=1)
    #[arg(long)]
    log_json: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let json_logs = args.log_json || std::env::var("HEARTH_LOG_JSON").unwrap_or_default() == "1";
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| "hearth_bot=info".into());
    if json_logs {
        tracing_subscriber::fmt().with_env_filter(filter).json().init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }

    let settings = match &args.config {
        Some(path) => Settings::load(path).with_context(|| format!("loading {}", path.display()))?,
        None => Settings::default(),
    };

    tracing::info!(
        bridge = %args.bridge,
        prefix = %settings.prefix,
        category = %settings.voice.parent_category,
        announce_channel = %settings.streams.announce_channel,
        "Starting hearth-bot"
    );

    let (handle, events) = client::connect(
        ConnectConfig {
            bridge_addr: args.bridge.clone(),
            request_timeout: std::time::Duration::from_secs(args.request_timeout),
        },
        ReconnectConfig::default(),
    );
    let gateway: Arc<dyn Gateway> = Arc::new(handle);

    let channels = Arc::new(ChannelLifecycle::new(Arc::clone(&gateway), settings.voice.clone()));
    let streamers = Arc::new(StreamerRotation::new(Arc::clone(&gateway), settings.streams.clone()));
    let commands = Commands::new(
        Arc::clone(&gateway),
        Arc::clone(&channels),
        Arc::clone(&streamers),
        settings.prefix.clone(),
    );
    let dispatcher = Dispatcher::standard(channels, streamers, commands)?;

    tracing::info!("Bot running. Ctrl+C to stop.");

    tokio::select! {
        _ = dispatcher.run(events) => {}
        result = tokio::signal::ctrl_c() => {
            result.context("listening for Ctrl+C")?;
            tracing::info!("Shutting down");
        }
    }

    Ok(())
}
