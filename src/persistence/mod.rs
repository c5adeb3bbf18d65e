//! Local persistence for notification state and preferences
//!
//! Wholesale JSON payloads keyed by user and entry kind. The in-memory state
//! is authoritative: load failures degrade to defaults and save failures are
//! logged by the caller, they never surface to user-facing operations.

use std::path::Path;
use std::sync::{Arc, Mutex};

use rusqlite::{params, Connection};
use thiserror::Error;
use tracing::warn;

use crate::notifications::NotificationRecord;
use crate::preferences::Preferences;

const STATE_DB_VERSION: i64 = 1;

const KEY_NOTIFICATIONS: &str = "notifications";
const KEY_PREFERENCES: &str = "preferences";

const CREATE_STATE_TABLE: &str = "
CREATE TABLE client_state (
    user_id TEXT NOT NULL,
    entry_key TEXT NOT NULL,
    payload TEXT NOT NULL,
    updated_at INTEGER NOT NULL,
    PRIMARY KEY (user_id, entry_key)
);";

#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("state db version {0} is newer than this client supports")]
    VersionTooNew(i64),
}

/// Storage backend for per-user client state. Loads return `Ok(None)` both
/// for absent and for corrupt payloads; corrupt payloads are logged and left
/// in place for the next wholesale overwrite.
pub trait StateStore: Send + Sync {
    fn load_notifications(
        &self,
        user_id: &str,
    ) -> Result<Option<Vec<NotificationRecord>>, PersistenceError>;
    fn save_notifications(
        &self,
        user_id: &str,
        records: &[NotificationRecord],
    ) -> Result<(), PersistenceError>;
    fn load_preferences(&self, user_id: &str) -> Result<Option<Preferences>, PersistenceError>;
    fn save_preferences(
        &self,
        user_id: &str,
        preferences: &Preferences,
    ) -> Result<(), PersistenceError>;
}

#[derive(Clone)]
pub struct SqliteStateStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStateStore {
    pub fn open<P: AsRef<Path>>(db_path: P) -> Result<Self, PersistenceError> {
        let conn = Connection::open(db_path)?;
        Self::migrate_if_needed(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub fn open_in_memory() -> Result<Self, PersistenceError> {
        let conn = Connection::open_in_memory()?;
        Self::migrate_if_needed(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn migrate_if_needed(conn: &Connection) -> Result<(), PersistenceError> {
        let version: i64 = conn.query_row("PRAGMA user_version;", [], |row| row.get(0))?;
        if version > STATE_DB_VERSION {
            return Err(PersistenceError::VersionTooNew(version));
        }
        if version < 1 {
            conn.execute_batch(CREATE_STATE_TABLE)?;
        }
        conn.execute(&format!("PRAGMA user_version = {STATE_DB_VERSION}"), [])?;
        Ok(())
    }

    fn load_payload(
        &self,
        user_id: &str,
        entry_key: &str,
    ) -> Result<Option<String>, PersistenceError> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT payload FROM client_state WHERE user_id = ?1 AND entry_key = ?2",
        )?;
        let mut rows = stmt.query_map(params![user_id, entry_key], |row| row.get(0))?;
        match rows.next() {
            Some(payload) => Ok(Some(payload?)),
            None => Ok(None),
        }
    }

    fn save_payload(
        &self,
        user_id: &str,
        entry_key: &str,
        payload: &str,
    ) -> Result<(), PersistenceError> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO client_state (user_id, entry_key, payload, updated_at)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT (user_id, entry_key)
             DO UPDATE SET payload = excluded.payload, updated_at = excluded.updated_at",
            params![
                user_id,
                entry_key,
                payload,
                chrono::Utc::now().timestamp_millis()
            ],
        )?;
        Ok(())
    }
}

impl StateStore for SqliteStateStore {
    fn load_notifications(
        &self,
        user_id: &str,
    ) -> Result<Option<Vec<NotificationRecord>>, PersistenceError> {
        let Some(payload) = self.load_payload(user_id, KEY_NOTIFICATIONS)? else {
            return Ok(None);
        };
        match serde_json::from_str(&payload) {
            Ok(records) => Ok(Some(records)),
            Err(err) => {
                warn!(error = %err, "persisted notifications are corrupt, starting empty");
                Ok(None)
            }
        }
    }

    fn save_notifications(
        &self,
        user_id: &str,
        records: &[NotificationRecord],
    ) -> Result<(), PersistenceError> {
        let payload = serde_json::to_string(records)?;
        self.save_payload(user_id, KEY_NOTIFICATIONS, &payload)
    }

    fn load_preferences(&self, user_id: &str) -> Result<Option<Preferences>, PersistenceError> {
        let Some(payload) = self.load_payload(user_id, KEY_PREFERENCES)? else {
            return Ok(None);
        };
        match serde_json::from_str(&payload) {
            Ok(preferences) => Ok(Some(preferences)),
            Err(err) => {
                warn!(error = %err, "persisted preferences are corrupt, using defaults");
                Ok(None)
            }
        }
    }

    fn save_preferences(
        &self,
        user_id: &str,
        preferences: &Preferences,
    ) -> Result<(), PersistenceError> {
        let payload = serde_json::to_string(preferences)?;
        self.save_payload(user_id, KEY_PREFERENCES, &payload)
    }
}

/// No-op backend for ephemeral sessions and tests.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullStateStore;

impl StateStore for NullStateStore {
    fn load_notifications(
        &self,
        _user_id: &str,
    ) -> Result<Option<Vec<NotificationRecord>>, PersistenceError> {
        Ok(None)
    }

    fn save_notifications(
        &self,
        _user_id: &str,
        _records: &[NotificationRecord],
    ) -> Result<(), PersistenceError> {
        Ok(())
    }

    fn load_preferences(&self, _user_id: &str) -> Result<Option<Preferences>, PersistenceError> {
        Ok(None)
    }

    fn save_preferences(
        &self,
        _user_id: &str,
        _preferences: &Preferences,
    ) -> Result<(), PersistenceError> {
        Ok(())
    }
}
