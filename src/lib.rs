//! Protocolo Notification Client Library
//!
//! This library exposes the internal modules for testing and embedding.

pub mod config;
pub mod connection;
pub mod delivery;
pub mod engine;
pub mod notifications;
pub mod persistence;
pub mod preferences;
pub mod push;
pub mod sync;

// Re-export commonly used types for convenience
pub use config::{ClientConfig, CliConfig, FileConfig};
pub use connection::ConnectionState;
pub use engine::NotificationEngine;
pub use notifications::{NotificationRecord, NotificationStore, RawNotification};
pub use preferences::{Preferences, PreferencesUpdate};

/// Client version string reported in the channel handshake, e.g.
/// "0.3.0-1a2b3c4".
pub fn client_version() -> String {
    format!("{}-{}", env!("CARGO_PKG_VERSION"), env!("GIT_HASH"))
}
