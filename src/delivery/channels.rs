//! Delivery channel implementations.
//!
//! Each presentation surface (in-app banner, OS desktop alert, audio cue) is
//! a `DeliveryChannel`; the multiplexer decides which ones fire per record.

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::broadcast;
use tracing::debug;

use crate::notifications::{NotificationKind, NotificationRecord};

/// Per-channel presentation failure. Isolated and logged by the multiplexer,
/// never aborts other channels or the ingest pipeline.
#[derive(Debug, Error)]
pub enum ChannelError {
    #[error("desktop notification failed: {0}")]
    Desktop(String),
    #[error("audio cue failed: {0}")]
    Audio(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelKind {
    Banner,
    Desktop,
    Audio,
}

impl ChannelKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChannelKind::Banner => "banner",
            ChannelKind::Desktop => "desktop",
            ChannelKind::Audio => "audio",
        }
    }
}

/// How a presented notification goes away.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dismissal {
    /// Requires an explicit user action. Used for important records.
    Explicit,
    /// Auto-closes after the given delay.
    AfterMs(u64),
    /// Stays until the surface itself is torn down.
    Never,
}

#[async_trait]
pub trait DeliveryChannel: Send + Sync {
    fn kind(&self) -> ChannelKind;

    /// Whether the channel can currently present anything (e.g. platform
    /// permission granted). Unavailable channels are skipped, not failed.
    fn available(&self) -> bool {
        true
    }

    async fn deliver(
        &self,
        record: &NotificationRecord,
        dismissal: Dismissal,
    ) -> Result<(), ChannelError>;
}

/// In-app banner event, consumed by the embedding UI (panel, toast renderer).
#[derive(Debug, Clone)]
pub struct BannerEvent {
    pub record: NotificationRecord,
    pub dismissal: Dismissal,
}

/// Always-on channel broadcasting banner events to the embedding UI.
pub struct BannerChannel {
    tx: broadcast::Sender<BannerEvent>,
}

impl BannerChannel {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<BannerEvent> {
        self.tx.subscribe()
    }
}

impl Default for BannerChannel {
    fn default() -> Self {
        Self::new(64)
    }
}

#[async_trait]
impl DeliveryChannel for BannerChannel {
    fn kind(&self) -> ChannelKind {
        ChannelKind::Banner
    }

    async fn deliver(
        &self,
        record: &NotificationRecord,
        dismissal: Dismissal,
    ) -> Result<(), ChannelError> {
        // No subscribers just means no UI is attached yet; not a failure.
        if self
            .tx
            .send(BannerEvent {
                record: record.clone(),
                dismissal,
            })
            .is_err()
        {
            debug!(id = %record.id, "no banner subscribers attached");
        }
        Ok(())
    }
}

/// OS-level desktop alert via the platform notification service.
pub struct DesktopChannel {
    app_name: String,
    permission: std::sync::atomic::AtomicBool,
}

impl DesktopChannel {
    pub fn new(app_name: impl Into<String>) -> Self {
        Self {
            app_name: app_name.into(),
            permission: std::sync::atomic::AtomicBool::new(true),
        }
    }

    /// Records the platform permission outcome; revocation mid-session
    /// degrades this channel only.
    pub fn set_permission(&self, granted: bool) {
        self.permission
            .store(granted, std::sync::atomic::Ordering::Relaxed);
    }
}

#[async_trait]
impl DeliveryChannel for DesktopChannel {
    fn kind(&self) -> ChannelKind {
        ChannelKind::Desktop
    }

    fn available(&self) -> bool {
        self.permission.load(std::sync::atomic::Ordering::Relaxed)
    }

    async fn deliver(
        &self,
        record: &NotificationRecord,
        dismissal: Dismissal,
    ) -> Result<(), ChannelError> {
        let timeout = match dismissal {
            Dismissal::Explicit | Dismissal::Never => notify_rust::Timeout::Never,
            Dismissal::AfterMs(ms) => {
                notify_rust::Timeout::Milliseconds(ms.min(u32::MAX as u64) as u32)
            }
        };

        let mut notification = notify_rust::Notification::new();
        notification
            .appname(&self.app_name)
            .summary(&record.title)
            .timeout(timeout);
        if let Some(message) = &record.message {
            notification.body(message);
        }

        notification
            .show()
            .map(|_| ())
            .map_err(|err| ChannelError::Desktop(err.to_string()))
    }
}

/// Audio cue via an OS shell-out; the record kind selects the cue.
pub struct AudioChannel;

impl AudioChannel {
    fn command_for(kind: NotificationKind) -> Option<tokio::process::Command> {
        match std::env::consts::OS {
            "macos" => {
                let sound = match kind {
                    NotificationKind::Error => "Sosumi",
                    NotificationKind::Warning => "Basso",
                    NotificationKind::Success => "Glass",
                    NotificationKind::Info | NotificationKind::Default => "Tink",
                };
                let mut cmd = tokio::process::Command::new("afplay");
                cmd.arg(format!("/System/Library/Sounds/{sound}.aiff"));
                Some(cmd)
            }
            "linux" => {
                let sound = match kind {
                    NotificationKind::Error => "dialog-error",
                    NotificationKind::Warning => "dialog-warning",
                    NotificationKind::Success => "complete",
                    NotificationKind::Info | NotificationKind::Default => "message",
                };
                let mut cmd = tokio::process::Command::new("paplay");
                cmd.arg(format!(
                    "/usr/share/sounds/freedesktop/stereo/{sound}.oga"
                ));
                Some(cmd)
            }
            _ => None,
        }
    }
}

#[async_trait]
impl DeliveryChannel for AudioChannel {
    fn kind(&self) -> ChannelKind {
        ChannelKind::Audio
    }

    async fn deliver(
        &self,
        record: &NotificationRecord,
        _dismissal: Dismissal,
    ) -> Result<(), ChannelError> {
        let Some(mut command) = Self::command_for(record.kind) else {
            return Err(ChannelError::Audio(format!(
                "no audio backend for {}",
                std::env::consts::OS
            )));
        };

        let status = command
            .status()
            .await
            .map_err(|err| ChannelError::Audio(err.to_string()))?;
        if !status.success() {
            return Err(ChannelError::Audio(format!(
                "player exited with {status}"
            )));
        }
        Ok(())
    }
}
