//! Notification data models and wire-shape normalization

use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// Severity/category of a notification, as sent by the portal server.
///
/// Unknown wire values degrade to `Default` instead of rejecting the record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NotificationKind {
    Success,
    Error,
    Warning,
    Info,
    #[serde(other)]
    Default,
}

impl Default for NotificationKind {
    fn default() -> Self {
        NotificationKind::Default
    }
}

impl NotificationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationKind::Success => "success",
            NotificationKind::Error => "error",
            NotificationKind::Warning => "warning",
            NotificationKind::Info => "info",
            NotificationKind::Default => "default",
        }
    }
}

/// Optional action attached to a record. `callback_ref` is an opaque handle
/// registered by the embedding application; this crate stores and round-trips
/// it but never resolves or executes it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationAction {
    pub label: String,
    pub callback_ref: String,
}

/// A normalized notification record as held by the store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationRecord {
    /// Creation-ordered identifier: lexicographic order equals creation order
    /// for client-assigned ids.
    pub id: String,
    pub kind: NotificationKind,
    pub title: String,
    pub message: Option<String>,
    /// Epoch milliseconds.
    pub created_at: i64,
    /// Store-owned; wire payloads cannot mark a record read at ingest.
    pub read: bool,
    /// Important records require explicit dismissal downstream.
    #[serde(default)]
    pub important: bool,
    /// Per-record audio override; `None` follows preferences.
    pub sound: Option<bool>,
    /// Per-record desktop override; `None` follows preferences.
    pub desktop: Option<bool>,
    pub action: Option<NotificationAction>,
}

/// Untrusted inbound shape accepted by ingest, from the real-time channel or
/// the poll feed. A wire `read` flag, if present, is ignored: the field is
/// owned by the local store.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawNotification {
    pub id: Option<String>,
    #[serde(default)]
    pub kind: NotificationKind,
    pub title: Option<String>,
    pub message: Option<String>,
    pub created_at: Option<i64>,
    #[serde(default)]
    pub important: bool,
    pub sound: Option<bool>,
    pub desktop: Option<bool>,
    pub action: Option<NotificationAction>,
}

/// Inbound payload rejected during normalization. Dropped and logged by the
/// caller, never propagated to the embedding application.
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("missing or empty title")]
    MissingTitle,
    #[error("malformed payload: {0}")]
    Malformed(#[from] serde_json::Error),
}

impl RawNotification {
    /// Validates and normalizes into a store record. `now_ms` supplies the
    /// id/created_at fallback when the server omitted them.
    pub fn into_record(self, now_ms: i64) -> Result<NotificationRecord, ValidationError> {
        let title = self
            .title
            .as_deref()
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .ok_or(ValidationError::MissingTitle)?
            .to_string();

        Ok(NotificationRecord {
            id: self.id.unwrap_or_else(|| generate_record_id(now_ms)),
            kind: self.kind,
            title,
            message: self.message,
            created_at: self.created_at.unwrap_or(now_ms),
            read: false,
            important: self.important,
            sound: self.sound,
            desktop: self.desktop,
            action: self.action,
        })
    }
}

/// Client-assigned record id: zero-padded millisecond timestamp plus a uuid
/// suffix, so lexicographic order matches creation order.
pub fn generate_record_id(now_ms: i64) -> String {
    format!("{:013}-{}", now_ms.max(0), Uuid::new_v4().simple())
}
