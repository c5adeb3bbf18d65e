//! Connection state machine and reconnect policy.
//!
//! The state is a tagged enum driven by discrete events inside the connection
//! task; the backoff delay is a pure function of the attempt count so the
//! policy is testable without network IO.

use std::time::Duration;

use serde::Serialize;

use crate::config::ReconnectSettings;

/// State of the single logical real-time channel. One instance per session,
/// never persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "state")]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting { attempt: u32 },
    /// Reconnect attempts exhausted. Terminal until an explicit `connect()`;
    /// the polling fallback keeps running and becomes the sole event source.
    Failed,
}

impl ConnectionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Reconnecting { .. } => "reconnecting",
            ConnectionState::Failed => "failed",
        }
    }

    pub fn is_connected(&self) -> bool {
        matches!(self, ConnectionState::Connected)
    }

    /// True while the channel task is alive (connecting, connected, or in a
    /// backoff sleep). `connect()` is a no-op in these states.
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            ConnectionState::Connecting
                | ConnectionState::Connected
                | ConnectionState::Reconnecting { .. }
        )
    }
}

/// Exponential backoff policy: `delay(n) = min(initial * 2^n, max)`, with a
/// hard ceiling on the number of attempts.
#[derive(Debug, Clone)]
pub struct ReconnectPolicy {
    /// Attempts before giving up and transitioning to `Failed`.
    pub max_attempts: u32,
    /// Delay before the first retry, in milliseconds.
    pub initial_delay_ms: u64,
    /// Cap for the exponential growth, in milliseconds.
    pub max_delay_ms: u64,
}

impl ReconnectPolicy {
    pub fn new(settings: &ReconnectSettings) -> Self {
        Self {
            max_attempts: settings.max_attempts,
            initial_delay_ms: settings.initial_delay_ms,
            max_delay_ms: settings.max_delay_ms,
        }
    }

    /// Backoff before retry number `attempt` (0-based).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let factor = 2u64.saturating_pow(attempt);
        let delay = self.initial_delay_ms.saturating_mul(factor);
        Duration::from_millis(delay.min(self.max_delay_ms))
    }

    /// True once `attempt` failures have been observed and no further retry
    /// should be scheduled.
    pub fn is_exhausted(&self, attempt: u32) -> bool {
        attempt >= self.max_attempts
    }
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self::new(&ReconnectSettings::default())
    }
}
