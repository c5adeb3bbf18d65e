mod file_config;

pub use file_config::{ConnectionConfig, FileConfig, PollConfig};

use anyhow::{bail, Result};
use std::path::PathBuf;

pub const DEFAULT_STORE_CAPACITY: usize = 100;
pub const DEFAULT_REQUEST_TIMEOUT_SEC: u64 = 30;
pub const DEFAULT_HANDSHAKE_TIMEOUT_MS: u64 = 10_000;
pub const DEFAULT_HEARTBEAT_INTERVAL_SECS: u64 = 25;
pub const DEFAULT_POLL_INTERVAL_SECS: u64 = 30;

/// CLI arguments that can be used for config resolution.
/// This struct mirrors the CLI arguments that can be overridden by TOML config.
#[derive(Debug, Clone)]
pub struct CliConfig {
    pub server_url: Option<String>,
    pub user_id: Option<String>,
    pub store_capacity: usize,
    pub request_timeout_sec: u64,
    pub state_db: Option<PathBuf>,
    pub push_relay_url: Option<String>,
}

impl Default for CliConfig {
    fn default() -> Self {
        Self {
            server_url: None,
            user_id: None,
            store_capacity: DEFAULT_STORE_CAPACITY,
            request_timeout_sec: DEFAULT_REQUEST_TIMEOUT_SEC,
            state_db: None,
            push_relay_url: None,
        }
    }
}

/// Reconnect tuning for the real-time channel, also reused by the polling
/// fallback as its failure backoff.
#[derive(Debug, Clone)]
pub struct ReconnectSettings {
    pub max_attempts: u32,
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for ReconnectSettings {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_delay_ms: 1000,
            max_delay_ms: 30000,
        }
    }
}

#[derive(Debug, Clone)]
pub struct PollSettings {
    pub interval_secs: u64,
}

impl Default for PollSettings {
    fn default() -> Self {
        Self {
            interval_secs: DEFAULT_POLL_INTERVAL_SECS,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ClientConfig {
    // Core settings
    pub server_url: String,
    pub user_id: String,
    pub store_capacity: usize,
    pub request_timeout_sec: u64,

    // Real-time channel settings (with defaults)
    pub reconnect: ReconnectSettings,
    pub handshake_timeout_ms: u64,
    pub heartbeat_interval_secs: u64,

    // Polling fallback
    pub poll: PollSettings,

    // Local state persistence; `None` keeps everything in memory.
    pub state_db: Option<PathBuf>,

    // Push; enabled only when a relay URL is configured.
    pub push_relay_url: Option<String>,
    pub push_server_key: Option<String>,
}

impl ClientConfig {
    /// Resolve configuration from CLI arguments and optional TOML file config.
    /// TOML values override CLI values where present.
    pub fn resolve(cli: &CliConfig, file_config: Option<FileConfig>) -> Result<Self> {
        let file = file_config.unwrap_or_default();

        // TOML overrides CLI for each field
        let server_url = file
            .server_url
            .or_else(|| cli.server_url.clone())
            .ok_or_else(|| {
                anyhow::anyhow!("server_url must be specified via --server-url or in config file")
            })?;
        let server_url = server_url.trim_end_matches('/').to_string();
        if server_url.is_empty() {
            bail!("server_url must not be empty");
        }
        if !server_url.starts_with("http://") && !server_url.starts_with("https://") {
            bail!("server_url must start with http:// or https://: {server_url}");
        }

        let user_id = file
            .user_id
            .or_else(|| cli.user_id.clone())
            .filter(|id| !id.trim().is_empty())
            .ok_or_else(|| {
                anyhow::anyhow!("user_id must be specified via --user-id or in config file")
            })?;

        let store_capacity = file.store_capacity.unwrap_or(cli.store_capacity);
        if store_capacity == 0 {
            bail!("store_capacity must be at least 1");
        }

        let request_timeout_sec = file.request_timeout_sec.unwrap_or(cli.request_timeout_sec);

        // Connection settings - merge file config with defaults
        let conn_file = file.connection.unwrap_or_default();
        let reconnect_defaults = ReconnectSettings::default();
        let reconnect = ReconnectSettings {
            max_attempts: conn_file
                .max_reconnect_attempts
                .unwrap_or(reconnect_defaults.max_attempts),
            initial_delay_ms: conn_file
                .initial_reconnect_delay_ms
                .unwrap_or(reconnect_defaults.initial_delay_ms),
            max_delay_ms: conn_file
                .max_reconnect_delay_ms
                .unwrap_or(reconnect_defaults.max_delay_ms),
        };
        if reconnect.initial_delay_ms == 0 {
            bail!("initial_reconnect_delay_ms must be at least 1");
        }
        if reconnect.max_delay_ms < reconnect.initial_delay_ms {
            bail!("max_reconnect_delay_ms must not be below initial_reconnect_delay_ms");
        }
        let handshake_timeout_ms = conn_file
            .handshake_timeout_ms
            .unwrap_or(DEFAULT_HANDSHAKE_TIMEOUT_MS);
        let heartbeat_interval_secs = conn_file
            .heartbeat_interval_secs
            .unwrap_or(DEFAULT_HEARTBEAT_INTERVAL_SECS);

        let poll_file = file.poll.unwrap_or_default();
        let poll = PollSettings {
            interval_secs: poll_file.interval_secs.unwrap_or(DEFAULT_POLL_INTERVAL_SECS),
        };
        if poll.interval_secs == 0 {
            bail!("poll interval_secs must be at least 1");
        }

        let state_db = file
            .state_db
            .map(PathBuf::from)
            .or_else(|| cli.state_db.clone());

        let push_relay_url = file
            .push_relay_url
            .or_else(|| cli.push_relay_url.clone())
            .map(|url| url.trim_end_matches('/').to_string());
        let push_server_key = file.push_server_key;

        Ok(Self {
            server_url,
            user_id,
            store_capacity,
            request_timeout_sec,
            reconnect,
            handshake_timeout_ms,
            heartbeat_interval_secs,
            poll,
            state_db,
            push_relay_url,
            push_server_key,
        })
    }

    /// Websocket endpoint derived from the REST base URL.
    pub fn websocket_url(&self) -> String {
        let base = if let Some(rest) = self.server_url.strip_prefix("https://") {
            format!("wss://{rest}")
        } else if let Some(rest) = self.server_url.strip_prefix("http://") {
            format!("ws://{rest}")
        } else {
            self.server_url.clone()
        };
        format!("{base}/v1/ws")
    }

    pub fn push_enabled(&self) -> bool {
        self.push_relay_url.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cli_with_required() -> CliConfig {
        CliConfig {
            server_url: Some("https://portal.example".to_string()),
            user_id: Some("erika".to_string()),
            ..Default::default()
        }
    }

    #[test]
    fn test_resolve_cli_only_uses_defaults() {
        let config = ClientConfig::resolve(&cli_with_required(), None).unwrap();

        assert_eq!(config.server_url, "https://portal.example");
        assert_eq!(config.user_id, "erika");
        assert_eq!(config.store_capacity, DEFAULT_STORE_CAPACITY);
        assert_eq!(config.request_timeout_sec, DEFAULT_REQUEST_TIMEOUT_SEC);
        assert_eq!(config.reconnect.max_attempts, 5);
        assert_eq!(config.reconnect.initial_delay_ms, 1000);
        assert_eq!(config.reconnect.max_delay_ms, 30000);
        assert_eq!(config.handshake_timeout_ms, DEFAULT_HANDSHAKE_TIMEOUT_MS);
        assert_eq!(config.heartbeat_interval_secs, DEFAULT_HEARTBEAT_INTERVAL_SECS);
        assert_eq!(config.poll.interval_secs, DEFAULT_POLL_INTERVAL_SECS);
        assert!(config.state_db.is_none());
        assert!(!config.push_enabled());
    }

    #[test]
    fn test_resolve_toml_overrides_cli() {
        let cli = CliConfig {
            server_url: Some("https://should.be.overridden".to_string()),
            user_id: Some("cli-user".to_string()),
            store_capacity: 100,
            ..Default::default()
        };

        let file_config = FileConfig {
            server_url: Some("https://portal.example/".to_string()),
            store_capacity: Some(250),
            connection: Some(ConnectionConfig {
                max_reconnect_attempts: Some(8),
                heartbeat_interval_secs: Some(10),
                ..Default::default()
            }),
            poll: Some(PollConfig {
                interval_secs: Some(5),
            }),
            ..Default::default()
        };

        let config = ClientConfig::resolve(&cli, Some(file_config)).unwrap();

        // TOML values should override CLI, trailing slash trimmed
        assert_eq!(config.server_url, "https://portal.example");
        assert_eq!(config.store_capacity, 250);
        assert_eq!(config.reconnect.max_attempts, 8);
        assert_eq!(config.heartbeat_interval_secs, 10);
        assert_eq!(config.poll.interval_secs, 5);
        // CLI value used when TOML doesn't specify
        assert_eq!(config.user_id, "cli-user");
        assert_eq!(config.reconnect.initial_delay_ms, 1000);
    }

    #[test]
    fn test_resolve_missing_server_url_error() {
        let cli = CliConfig {
            user_id: Some("erika".to_string()),
            ..Default::default()
        };
        let result = ClientConfig::resolve(&cli, None);
        assert!(result.is_err());
        assert!(result
            .unwrap_err()
            .to_string()
            .contains("server_url must be specified"));
    }

    #[test]
    fn test_resolve_bad_server_url_scheme_error() {
        let cli = CliConfig {
            server_url: Some("ftp://portal.example".to_string()),
            user_id: Some("erika".to_string()),
            ..Default::default()
        };
        let result = ClientConfig::resolve(&cli, None);
        assert!(result.is_err());
    }

    #[test]
    fn test_resolve_blank_user_id_error() {
        let cli = CliConfig {
            server_url: Some("https://portal.example".to_string()),
            user_id: Some("   ".to_string()),
            ..Default::default()
        };
        let result = ClientConfig::resolve(&cli, None);
        assert!(result.is_err());
        assert!(result
            .unwrap_err()
            .to_string()
            .contains("user_id must be specified"));
    }

    #[test]
    fn test_resolve_zero_capacity_error() {
        let mut cli = cli_with_required();
        cli.store_capacity = 0;
        let result = ClientConfig::resolve(&cli, None);
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("store_capacity"));
    }

    #[test]
    fn test_resolve_inverted_delay_bounds_error() {
        let file_config = FileConfig {
            connection: Some(ConnectionConfig {
                initial_reconnect_delay_ms: Some(5000),
                max_reconnect_delay_ms: Some(1000),
                ..Default::default()
            }),
            ..Default::default()
        };
        let result = ClientConfig::resolve(&cli_with_required(), Some(file_config));
        assert!(result.is_err());
    }

    #[test]
    fn test_websocket_url_derivation() {
        let mut config = ClientConfig::resolve(&cli_with_required(), None).unwrap();
        assert_eq!(config.websocket_url(), "wss://portal.example/v1/ws");

        config.server_url = "http://localhost:8080".to_string();
        assert_eq!(config.websocket_url(), "ws://localhost:8080/v1/ws");
    }

    #[test]
    fn test_push_enabled_with_relay_url() {
        let file_config = FileConfig {
            push_relay_url: Some("https://relay.example/".to_string()),
            ..Default::default()
        };
        let config = ClientConfig::resolve(&cli_with_required(), Some(file_config)).unwrap();
        assert!(config.push_enabled());
        assert_eq!(config.push_relay_url.as_deref(), Some("https://relay.example"));
    }

    #[test]
    fn test_file_config_load_round_trip() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("notify.toml");
        std::fs::write(
            &path,
            r#"
server_url = "https://portal.example"
user_id = "erika"
store_capacity = 50

[connection]
max_reconnect_attempts = 3

[poll]
interval_secs = 15
"#,
        )
        .unwrap();

        let file = FileConfig::load(&path).unwrap();
        let config = ClientConfig::resolve(&CliConfig::default(), Some(file)).unwrap();

        assert_eq!(config.store_capacity, 50);
        assert_eq!(config.reconnect.max_attempts, 3);
        assert_eq!(config.poll.interval_secs, 15);
    }

    #[test]
    fn test_file_config_load_missing_file_error() {
        let result = FileConfig::load(std::path::Path::new("/nonexistent/notify.toml"));
        assert!(result.is_err());
    }
}
