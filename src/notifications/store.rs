//! Bounded, newest-first notification store
//!
//! Holds the signed-in user's notification records, enforces the retention
//! cap, owns the read flags, and fans every state change out to registered
//! subscribers. Mutations are synchronous atomic sections; subscriber
//! callbacks run after the mutation with a cloned snapshot, so callbacks may
//! re-enter the store.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use chrono::Utc;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use super::models::{NotificationRecord, RawNotification};

/// Default retention cap, matching the portal server's per-user limit.
pub const DEFAULT_CAPACITY: usize = 100;

/// Invoked with `(records, unread_count)` after every mutation that changed
/// state. No-op operations never notify.
pub type SubscriberCallback = dyn Fn(&[NotificationRecord], usize) + Send + Sync;

pub struct NotificationStore {
    records: Mutex<Vec<NotificationRecord>>,
    subscribers: Mutex<HashMap<u64, Arc<SubscriberCallback>>>,
    next_subscriber_id: AtomicU64,
    persist_tx: Mutex<Option<mpsc::UnboundedSender<Vec<NotificationRecord>>>>,
    capacity: usize,
}

impl NotificationStore {
    pub fn new(capacity: usize) -> Self {
        Self {
            records: Mutex::new(Vec::new()),
            subscribers: Mutex::new(HashMap::new()),
            next_subscriber_id: AtomicU64::new(1),
            persist_tx: Mutex::new(None),
            capacity,
        }
    }

    /// Registers the sink that receives a wholesale snapshot of the
    /// collection after every mutation. The engine drains it off the hot
    /// path, so store operations never block on IO.
    pub fn set_persist_sink(&self, tx: mpsc::UnboundedSender<Vec<NotificationRecord>>) {
        *self.persist_tx.lock().unwrap() = Some(tx);
    }

    /// Validates, normalizes and inserts an inbound payload.
    ///
    /// Returns the stored record only when it was newly inserted; duplicates
    /// (matched by id) leave the existing record untouched, including its
    /// read flag, and return `None`. Only a `Some` result may be presented
    /// downstream. A record older than everything retained under a full cap
    /// is dropped and also returns `None`.
    pub fn ingest(&self, raw: RawNotification) -> Option<NotificationRecord> {
        let now_ms = Utc::now().timestamp_millis();
        let record = match raw.into_record(now_ms) {
            Ok(record) => record,
            Err(err) => {
                warn!(error = %err, "dropping malformed notification payload");
                return None;
            }
        };

        let stored = {
            let mut records = self.records.lock().unwrap();
            if records.iter().any(|r| r.id == record.id) {
                debug!(id = %record.id, "duplicate notification ignored");
                return None;
            }

            // Newest first; ties keep the latest arrival in front.
            let position = records
                .iter()
                .position(|r| r.created_at <= record.created_at)
                .unwrap_or(records.len());
            records.insert(position, record.clone());
            if records.len() > self.capacity {
                records.truncate(self.capacity);
            }

            if records.iter().any(|r| r.id == record.id) {
                Some(record)
            } else {
                debug!(id = %record.id, "notification older than retained window, dropped");
                None
            }
        };

        if stored.is_some() {
            self.after_mutation();
        }
        stored
    }

    /// Marks a record read. Returns whether the flag flipped; re-marking a
    /// read record (or an unknown id) is a no-op that does not notify.
    pub fn mark_read(&self, id: &str) -> bool {
        let flipped = {
            let mut records = self.records.lock().unwrap();
            match records.iter_mut().find(|r| r.id == id && !r.read) {
                Some(record) => {
                    record.read = true;
                    true
                }
                None => false,
            }
        };
        if flipped {
            self.after_mutation();
        }
        flipped
    }

    /// Marks every record read. Returns how many flags flipped.
    pub fn mark_all_read(&self) -> usize {
        let flipped = {
            let mut records = self.records.lock().unwrap();
            let mut flipped = 0;
            for record in records.iter_mut().filter(|r| !r.read) {
                record.read = true;
                flipped += 1;
            }
            flipped
        };
        if flipped > 0 {
            self.after_mutation();
        }
        flipped
    }

    /// Removes a record by id. Deleting an id that is not present is a no-op:
    /// it returns `false` and subscribers are not notified.
    pub fn delete(&self, id: &str) -> bool {
        let removed = {
            let mut records = self.records.lock().unwrap();
            let before = records.len();
            records.retain(|r| r.id != id);
            records.len() != before
        };
        if removed {
            self.after_mutation();
        }
        removed
    }

    /// Removes all records. A no-op on an already empty store.
    pub fn clear(&self) {
        let cleared = {
            let mut records = self.records.lock().unwrap();
            if records.is_empty() {
                false
            } else {
                records.clear();
                true
            }
        };
        if cleared {
            self.after_mutation();
        }
    }

    /// Replaces the collection with persisted records, re-establishing order
    /// and the cap. Subscribers are notified with the restored state.
    pub fn restore(&self, mut persisted: Vec<NotificationRecord>) {
        {
            let mut records = self.records.lock().unwrap();
            persisted.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
            persisted.dedup_by(|a, b| a.id == b.id);
            persisted.truncate(self.capacity);
            *records = persisted;
        }
        self.after_mutation();
    }

    /// Current records (newest first) and unread count.
    pub fn snapshot(&self) -> (Vec<NotificationRecord>, usize) {
        let records = self.records.lock().unwrap();
        let unread = records.iter().filter(|r| !r.read).count();
        (records.clone(), unread)
    }

    /// Unread count, recomputed from the collection.
    pub fn unread_count(&self) -> usize {
        self.records.lock().unwrap().iter().filter(|r| !r.read).count()
    }

    pub fn len(&self) -> usize {
        self.records.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.lock().unwrap().is_empty()
    }

    /// Highest record id currently held, used as the poll cursor.
    pub fn latest_id(&self) -> Option<String> {
        self.records
            .lock()
            .unwrap()
            .iter()
            .map(|r| r.id.clone())
            .max()
    }

    pub fn subscribe(
        &self,
        callback: impl Fn(&[NotificationRecord], usize) + Send + Sync + 'static,
    ) -> u64 {
        let id = self.next_subscriber_id.fetch_add(1, Ordering::Relaxed);
        self.subscribers.lock().unwrap().insert(id, Arc::new(callback));
        id
    }

    pub fn unsubscribe(&self, subscriber_id: u64) {
        self.subscribers.lock().unwrap().remove(&subscriber_id);
    }

    pub fn unsubscribe_all(&self) {
        self.subscribers.lock().unwrap().clear();
    }

    fn after_mutation(&self) {
        let (records, unread) = self.snapshot();

        if let Some(tx) = self.persist_tx.lock().unwrap().as_ref() {
            if tx.send(records.clone()).is_err() {
                debug!("persist sink closed, snapshot not scheduled");
            }
        }

        let callbacks: Vec<Arc<SubscriberCallback>> =
            self.subscribers.lock().unwrap().values().cloned().collect();
        for callback in callbacks {
            callback(&records, unread);
        }
    }
}
