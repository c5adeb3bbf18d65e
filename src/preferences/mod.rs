//! Per-user delivery preferences
//!
//! Preferences are read on every presentation decision and overwritten
//! wholesale on update. Updates are partial: unset fields keep their current
//! value, and `auto_close_ms` is clamped to a non-negative duration.

use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::debug;

pub const DEFAULT_AUTO_CLOSE_MS: u64 = 5000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Preferences {
    pub sound_enabled: bool,
    pub desktop_enabled: bool,
    /// Auto-close delay for non-important banners. 0 means never auto-close.
    pub auto_close_ms: u64,
}

impl Default for Preferences {
    fn default() -> Self {
        Self {
            sound_enabled: true,
            desktop_enabled: true,
            auto_close_ms: DEFAULT_AUTO_CLOSE_MS,
        }
    }
}

/// Partial preferences update; `None` fields keep the current value. The
/// auto-close field is signed because client callers may pass negative
/// values, which clamp to 0.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PreferencesUpdate {
    pub sound_enabled: Option<bool>,
    pub desktop_enabled: Option<bool>,
    pub auto_close_ms: Option<i64>,
}

impl Preferences {
    pub fn apply(&self, update: PreferencesUpdate) -> Preferences {
        Preferences {
            sound_enabled: update.sound_enabled.unwrap_or(self.sound_enabled),
            desktop_enabled: update.desktop_enabled.unwrap_or(self.desktop_enabled),
            auto_close_ms: update
                .auto_close_ms
                .map(|ms| ms.max(0) as u64)
                .unwrap_or(self.auto_close_ms),
        }
    }
}

/// Holds the current preferences and schedules wholesale persistence after
/// each update.
pub struct PreferenceStore {
    current: Mutex<Preferences>,
    persist_tx: Mutex<Option<mpsc::UnboundedSender<Preferences>>>,
}

impl PreferenceStore {
    pub fn new(initial: Preferences) -> Self {
        Self {
            current: Mutex::new(initial),
            persist_tx: Mutex::new(None),
        }
    }

    pub fn set_persist_sink(&self, tx: mpsc::UnboundedSender<Preferences>) {
        *self.persist_tx.lock().unwrap() = Some(tx);
    }

    pub fn current(&self) -> Preferences {
        *self.current.lock().unwrap()
    }

    /// Merges the update, persists the whole object, returns the new value.
    pub fn update(&self, update: PreferencesUpdate) -> Preferences {
        let updated = {
            let mut current = self.current.lock().unwrap();
            *current = current.apply(update);
            *current
        };
        if let Some(tx) = self.persist_tx.lock().unwrap().as_ref() {
            if tx.send(updated).is_err() {
                debug!("persist sink closed, preferences snapshot not scheduled");
            }
        }
        updated
    }
}

impl Default for PreferenceStore {
    fn default() -> Self {
        Self::new(Preferences::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let prefs = Preferences::default();
        assert!(prefs.sound_enabled);
        assert!(prefs.desktop_enabled);
        assert_eq!(prefs.auto_close_ms, DEFAULT_AUTO_CLOSE_MS);
    }

    #[test]
    fn test_partial_update_keeps_unset_fields() {
        let prefs = Preferences::default();
        let updated = prefs.apply(PreferencesUpdate {
            sound_enabled: Some(false),
            ..Default::default()
        });

        assert!(!updated.sound_enabled);
        assert!(updated.desktop_enabled);
        assert_eq!(updated.auto_close_ms, DEFAULT_AUTO_CLOSE_MS);
    }

    #[test]
    fn test_negative_auto_close_clamps_to_zero() {
        let updated = Preferences::default().apply(PreferencesUpdate {
            auto_close_ms: Some(-250),
            ..Default::default()
        });
        assert_eq!(updated.auto_close_ms, 0);
    }

    #[test]
    fn test_store_update_returns_and_holds_new_value() {
        let store = PreferenceStore::default();
        let updated = store.update(PreferencesUpdate {
            desktop_enabled: Some(false),
            auto_close_ms: Some(1500),
            ..Default::default()
        });

        assert!(!updated.desktop_enabled);
        assert_eq!(updated.auto_close_ms, 1500);
        assert_eq!(store.current(), updated);
    }

    #[test]
    fn test_update_persists_wholesale() {
        let store = PreferenceStore::default();
        let (tx, mut rx) = mpsc::unbounded_channel();
        store.set_persist_sink(tx);

        store.update(PreferencesUpdate {
            sound_enabled: Some(false),
            ..Default::default()
        });

        let persisted = rx.try_recv().unwrap();
        assert!(!persisted.sound_enabled);
        assert!(persisted.desktop_enabled);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_wire_uses_camel_case() {
        let value = serde_json::to_value(Preferences::default()).unwrap();
        assert_eq!(value["autoCloseMs"], DEFAULT_AUTO_CLOSE_MS);
        assert_eq!(value["soundEnabled"], true);
    }

    #[test]
    fn test_partial_wire_payload_deserializes() {
        let update: PreferencesUpdate =
            serde_json::from_value(serde_json::json!({ "autoCloseMs": -1 })).unwrap();
        assert_eq!(update.auto_close_ms, Some(-1));
        assert!(update.sound_enabled.is_none());
    }
}
