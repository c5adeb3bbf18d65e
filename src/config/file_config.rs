use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct FileConfig {
    // Core settings (can override CLI)
    pub server_url: Option<String>,
    pub user_id: Option<String>,
    pub store_capacity: Option<usize>,
    pub request_timeout_sec: Option<u64>,
    pub state_db: Option<String>,
    pub push_relay_url: Option<String>,
    pub push_server_key: Option<String>,

    // Feature configs
    pub connection: Option<ConnectionConfig>,
    pub poll: Option<PollConfig>,
}

#[derive(Debug, Deserialize, Default, Clone)]
#[serde(default)]
pub struct ConnectionConfig {
    pub max_reconnect_attempts: Option<u32>,
    pub initial_reconnect_delay_ms: Option<u64>,
    pub max_reconnect_delay_ms: Option<u64>,
    pub handshake_timeout_ms: Option<u64>,
    pub heartbeat_interval_secs: Option<u64>,
}

#[derive(Debug, Deserialize, Default, Clone)]
#[serde(default)]
pub struct PollConfig {
    pub interval_secs: Option<u64>,
}

impl FileConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;
        toml::from_str(&content).with_context(|| format!("Failed to parse config file: {:?}", path))
    }
}
