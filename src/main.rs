use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use tracing::{info, level_filters::LevelFilter, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};
use uuid::Uuid;

use protocolo_notify_client::config::{CliConfig, ClientConfig, FileConfig};
use protocolo_notify_client::NotificationEngine;

fn parse_path(s: &str) -> Result<PathBuf> {
    let path_buf = PathBuf::from(s);
    let original_path = match path_buf.canonicalize() {
        Ok(path) => path,
        Err(msg) => {
            if msg.kind() == std::io::ErrorKind::NotFound {
                path_buf
            } else {
                return Err(msg).with_context(|| format!("Error resolving path: {}", s));
            }
        }
    };
    if original_path.is_absolute() {
        return Ok(original_path);
    }
    let cwd = std::env::current_dir()?;
    Ok(cwd.join(original_path))
}

#[derive(Parser, Debug)]
struct CliArgs {
    /// Base URL of the portal API (e.g. https://portal.example).
    #[clap(long)]
    pub server_url: Option<String>,

    /// User the agent receives notifications for.
    #[clap(long)]
    pub user_id: Option<String>,

    /// Path to a TOML config file. File values override CLI flags.
    #[clap(long, value_parser = parse_path)]
    pub config: Option<PathBuf>,

    /// Maximum number of retained notifications.
    #[clap(long, default_value_t = 100)]
    pub store_capacity: usize,

    /// Timeout in seconds for API requests.
    #[clap(long, default_value_t = 30)]
    pub request_timeout_sec: u64,

    /// Path to the SQLite state database. Omit to keep state in memory only.
    #[clap(long, value_parser = parse_path)]
    pub state_db: Option<PathBuf>,

    /// URL of the push relay service. Push stays disabled without it.
    #[clap(long)]
    pub push_relay_url: Option<String>,

    /// Session identifier sent in the channel handshake. Random per run
    /// when omitted.
    #[clap(long)]
    pub session_id: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli_args = CliArgs::parse();

    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            EnvFilter::builder()
                .with_default_directive(LevelFilter::INFO.into())
                .with_env_var("LOG_LEVEL")
                .from_env_lossy(),
        )
        .try_init()
        .unwrap();

    let file_config = match &cli_args.config {
        Some(path) => Some(FileConfig::load(path)?),
        None => None,
    };
    let cli_config = CliConfig {
        server_url: cli_args.server_url,
        user_id: cli_args.user_id,
        store_capacity: cli_args.store_capacity,
        request_timeout_sec: cli_args.request_timeout_sec,
        state_db: cli_args.state_db,
        push_relay_url: cli_args.push_relay_url,
    };
    let config = ClientConfig::resolve(&cli_config, file_config)?;
    let push_enabled = config.push_enabled();

    info!(
        server_url = %config.server_url,
        user_id = %config.user_id,
        "starting notification agent"
    );
    let engine = NotificationEngine::init(config)?;

    // Surface state transitions and banner deliveries in the agent's log.
    let mut state_rx = engine.watch_connection();
    tokio::spawn(async move {
        while state_rx.changed().await.is_ok() {
            let state = *state_rx.borrow();
            info!(state = state.as_str(), "connection state changed");
        }
    });
    let mut banner_rx = engine.banner_events();
    tokio::spawn(async move {
        loop {
            match banner_rx.recv().await {
                Ok(event) => info!(
                    kind = event.record.kind.as_str(),
                    title = %event.record.title,
                    "notification"
                ),
                Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "banner log fell behind");
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => return,
            }
        }
    });

    let session_id = cli_args
        .session_id
        .unwrap_or_else(|| Uuid::new_v4().to_string());
    engine.connect(&session_id);

    if push_enabled {
        match engine.register_push().await {
            Ok(subscription) => {
                info!(endpoint = %subscription.endpoint, "push subscription registered")
            }
            Err(err) => warn!(error = %err, "push registration failed"),
        }
    }

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for shutdown signal")?;
    info!("shutdown signal received");
    engine.dispose().await;
    Ok(())
}
