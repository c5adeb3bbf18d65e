//! Polling fallback sync.
//!
//! A single recurring task that pulls the notification feed while the
//! real-time channel is not connected and feeds results into the engine's
//! ingest path. The fetch happens inline in the loop, so an in-flight fetch
//! structurally suppresses the next tick; fetch failures back off with the
//! same exponential policy as the connection manager, without an attempt
//! ceiling.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::connection::{ConnectionState, ReconnectPolicy};
use crate::notifications::RawNotification;

use super::api::SyncApi;

#[derive(Debug, Clone)]
pub struct PollerSettings {
    pub user_id: String,
    pub interval: Duration,
    pub backoff: ReconnectPolicy,
}

struct PollTask {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

pub struct PollingSync {
    api: Arc<dyn SyncApi>,
    settings: PollerSettings,
    state_rx: watch::Receiver<ConnectionState>,
    ingest_tx: mpsc::UnboundedSender<RawNotification>,
    initial_cursor: Mutex<Option<String>>,
    task: Mutex<Option<PollTask>>,
}

impl PollingSync {
    pub fn new(
        api: Arc<dyn SyncApi>,
        settings: PollerSettings,
        state_rx: watch::Receiver<ConnectionState>,
        ingest_tx: mpsc::UnboundedSender<RawNotification>,
    ) -> Self {
        Self {
            api,
            settings,
            state_rx,
            ingest_tx,
            initial_cursor: Mutex::new(None),
            task: Mutex::new(None),
        }
    }

    /// Seeds the feed cursor, typically with the newest restored record id.
    /// Only affects a subsequently started task.
    pub fn seed_cursor(&self, cursor: Option<String>) {
        *self.initial_cursor.lock().unwrap() = cursor;
    }

    /// Spawns the poll task. A second start while running is a no-op.
    pub fn start(&self) {
        let mut task = self.task.lock().unwrap();
        if task.as_ref().is_some_and(|t| !t.handle.is_finished()) {
            debug!("poll task already running");
            return;
        }

        let cancel = CancellationToken::new();
        let handle = tokio::spawn(run_poll_loop(
            Arc::clone(&self.api),
            self.settings.clone(),
            self.state_rx.clone(),
            self.ingest_tx.clone(),
            self.initial_cursor.lock().unwrap().clone(),
            cancel.clone(),
        ));
        *task = Some(PollTask { cancel, handle });
    }

    /// Cancels the poll task and any pending tick.
    pub fn stop(&self) {
        if let Some(task) = self.task.lock().unwrap().take() {
            task.cancel.cancel();
        }
    }
}

impl Drop for PollingSync {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn run_poll_loop(
    api: Arc<dyn SyncApi>,
    settings: PollerSettings,
    state_rx: watch::Receiver<ConnectionState>,
    ingest_tx: mpsc::UnboundedSender<RawNotification>,
    mut cursor: Option<String>,
    cancel: CancellationToken,
) {
    let mut failures: u32 = 0;

    loop {
        let delay = if failures == 0 {
            settings.interval
        } else {
            settings.backoff.delay_for_attempt(failures - 1)
        };
        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            _ = cancel.cancelled() => return,
        }

        // The real-time channel is authoritative while connected.
        if state_rx.borrow().is_connected() {
            continue;
        }

        let fetched = tokio::select! {
            result = api.fetch_notifications(&settings.user_id, cursor.as_deref()) => result,
            _ = cancel.cancelled() => return,
        };

        match fetched {
            Ok(batch) => {
                failures = 0;
                // Advance past everything seen, duplicates included, so a
                // feed that keeps returning known records does not re-fetch
                // them forever.
                for raw in &batch {
                    if let Some(id) = &raw.id {
                        if cursor.as_deref().is_none_or(|c| c < id.as_str()) {
                            cursor = Some(id.clone());
                        }
                    }
                }
                let count = batch.len();
                for raw in batch {
                    if ingest_tx.send(raw).is_err() {
                        debug!("ingest sink closed, stopping poll task");
                        return;
                    }
                }
                if count > 0 {
                    debug!(count, cursor = cursor.as_deref().unwrap_or(""), "poll fetch merged");
                }
            }
            Err(err) => {
                failures += 1;
                warn!(error = %err, failures, "poll fetch failed, backing off");
            }
        }
    }
}
