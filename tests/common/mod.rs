//! Common test infrastructure
//!
//! This module provides the mock portal server and engine helpers used by
//! the end-to-end tests. Tests should only import from this module.
#![allow(dead_code)]

mod server;

pub use server::TestServer;

use std::time::Duration;

use protocolo_notify_client::config::{ClientConfig, PollSettings, ReconnectSettings};
use protocolo_notify_client::{NotificationEngine, PreferencesUpdate, RawNotification};

pub const TEST_USER: &str = "erika";
pub const TEST_SESSION: &str = "session-1";

/// Client config against the mock portal, with timings tightened for tests.
pub fn fast_config(server: &TestServer) -> ClientConfig {
    ClientConfig {
        server_url: server.base_url.clone(),
        user_id: TEST_USER.to_string(),
        store_capacity: 100,
        request_timeout_sec: 5,
        reconnect: ReconnectSettings {
            max_attempts: 3,
            initial_delay_ms: 10,
            max_delay_ms: 40,
        },
        handshake_timeout_ms: 1000,
        heartbeat_interval_secs: 25,
        poll: PollSettings { interval_secs: 1 },
        state_db: None,
        push_relay_url: None,
        push_server_key: None,
    }
}

/// Spawns an engine with desktop and audio delivery disabled, so tests only
/// observe the banner channel and never shell out to the host OS.
pub fn quiet_engine(config: ClientConfig) -> NotificationEngine {
    let engine = NotificationEngine::init(config).expect("Failed to init engine");
    engine.update_preferences(PreferencesUpdate {
        sound_enabled: Some(false),
        desktop_enabled: Some(false),
        ..Default::default()
    });
    engine
}

pub fn raw(id: &str, created_at: i64) -> RawNotification {
    RawNotification {
        id: Some(id.to_string()),
        title: Some(format!("title {id}")),
        created_at: Some(created_at),
        ..Default::default()
    }
}

/// Polls the predicate every 10ms and panics after 5s.
pub async fn wait_until(what: &str, predicate: impl Fn() -> bool) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while !predicate() {
        if tokio::time::Instant::now() > deadline {
            panic!("timed out waiting for {what}");
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
