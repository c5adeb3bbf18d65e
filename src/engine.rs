//! Engine wiring: builds every component from the resolved config, owns the
//! single ingest loop, and exposes the embedding-facing surface.
//!
//! Both event sources (real-time channel and polling fallback) feed one
//! unbounded ingest queue drained here, so store mutations and presentation
//! decisions happen on a single path regardless of where a record came from.
//! Persistence writes are also drained here, off the mutation hot path.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::ClientConfig;
use crate::connection::{
    msg_types, ConnectionManager, ConnectionSettings, ConnectionState, ReconnectPolicy,
};
use crate::delivery::{
    AudioChannel, BannerChannel, BannerEvent, DeliveryChannel, DeliveryMultiplexer, DesktopChannel,
};
use crate::notifications::{NotificationRecord, NotificationStore, RawNotification};
use crate::persistence::{NullStateStore, SqliteStateStore, StateStore};
use crate::preferences::{PreferenceStore, Preferences, PreferencesUpdate};
use crate::push::{AgentPushPlatform, PushError, PushSubscription, PushSubscriptionManager};
use crate::sync::{HttpSyncApi, PollerSettings, PollingSync, SyncApi};

pub struct NotificationEngine {
    user_id: String,
    store: Arc<NotificationStore>,
    preferences: Arc<PreferenceStore>,
    connection: Arc<ConnectionManager>,
    poller: PollingSync,
    ingest_tx: mpsc::UnboundedSender<RawNotification>,
    push: Option<PushSubscriptionManager>,
    banner: Arc<BannerChannel>,
    desktop: Arc<DesktopChannel>,
    state_store: Arc<dyn StateStore>,
    cancel: CancellationToken,
    loop_handle: Mutex<Option<JoinHandle<()>>>,
    disposed: AtomicBool,
}

impl NotificationEngine {
    /// Builds and wires every component. Restores persisted state, seeds the
    /// poll cursor, and starts the ingest loop; the real-time channel stays
    /// down until `connect()`.
    pub fn init(config: ClientConfig) -> Result<Self> {
        let user_id = config.user_id.clone();

        let state_store: Arc<dyn StateStore> = match &config.state_db {
            Some(path) => Arc::new(
                SqliteStateStore::open(path)
                    .with_context(|| format!("Failed to open state db at {:?}", path))?,
            ),
            None => Arc::new(NullStateStore),
        };

        let store = Arc::new(NotificationStore::new(config.store_capacity));
        match state_store.load_notifications(&user_id) {
            Ok(Some(records)) => {
                info!(count = records.len(), "restored persisted notifications");
                store.restore(records);
            }
            Ok(None) => {}
            Err(err) => warn!(error = %err, "notification restore failed, starting empty"),
        }

        let initial_prefs = match state_store.load_preferences(&user_id) {
            Ok(Some(preferences)) => preferences,
            Ok(None) => Preferences::default(),
            Err(err) => {
                warn!(error = %err, "preference restore failed, using defaults");
                Preferences::default()
            }
        };
        let preferences = Arc::new(PreferenceStore::new(initial_prefs));

        let (ingest_tx, ingest_rx) = mpsc::unbounded_channel::<RawNotification>();
        let (records_tx, records_rx) = mpsc::unbounded_channel::<Vec<NotificationRecord>>();
        let (prefs_tx, prefs_rx) = mpsc::unbounded_channel::<Preferences>();
        store.set_persist_sink(records_tx);
        preferences.set_persist_sink(prefs_tx);

        let api: Arc<dyn SyncApi> = Arc::new(HttpSyncApi::new(
            config.server_url.clone(),
            config.request_timeout_sec,
        )?);

        let connection = Arc::new(ConnectionManager::new(ConnectionSettings {
            url: config.websocket_url(),
            user_id: user_id.clone(),
            client_version: crate::client_version(),
            handshake_timeout: Duration::from_millis(config.handshake_timeout_ms),
            heartbeat_interval: Duration::from_secs(config.heartbeat_interval_secs),
            policy: ReconnectPolicy::new(&config.reconnect),
        }));
        let channel_ingest = ingest_tx.clone();
        connection.on_message(move |message| {
            if message.msg_type != msg_types::NOTIFICATION {
                debug!(msg_type = %message.msg_type, "ignoring non-notification message");
                return;
            }
            match serde_json::from_value::<RawNotification>(message.payload) {
                Ok(raw) => {
                    let _ = channel_ingest.send(raw);
                }
                Err(err) => debug!(error = %err, "dropping malformed notification payload"),
            }
        });

        let poller = PollingSync::new(
            Arc::clone(&api),
            PollerSettings {
                user_id: user_id.clone(),
                interval: Duration::from_secs(config.poll.interval_secs),
                backoff: ReconnectPolicy::new(&config.reconnect),
            },
            connection.watch_state(),
            ingest_tx.clone(),
        );
        poller.seed_cursor(store.latest_id());

        let push = config.push_relay_url.as_ref().map(|relay_url| {
            PushSubscriptionManager::new(
                Arc::new(AgentPushPlatform::new(relay_url.clone())),
                Arc::clone(&api),
                config.push_server_key.clone().unwrap_or_default(),
            )
        });

        let banner = Arc::new(BannerChannel::default());
        let desktop = Arc::new(DesktopChannel::new("Protocolo"));
        let channels: Vec<Arc<dyn DeliveryChannel>> = vec![
            Arc::clone(&banner) as Arc<dyn DeliveryChannel>,
            Arc::clone(&desktop) as Arc<dyn DeliveryChannel>,
            Arc::new(AudioChannel),
        ];
        let multiplexer = DeliveryMultiplexer::new(Arc::clone(&preferences), channels);

        let cancel = CancellationToken::new();
        let loop_handle = tokio::spawn(run_event_loop(
            Arc::clone(&store),
            Arc::clone(&state_store),
            user_id.clone(),
            multiplexer,
            ingest_rx,
            records_rx,
            prefs_rx,
            cancel.clone(),
        ));

        Ok(Self {
            user_id,
            store,
            preferences,
            connection,
            poller,
            ingest_tx,
            push,
            banner,
            desktop,
            state_store,
            cancel,
            loop_handle: Mutex::new(Some(loop_handle)),
            disposed: AtomicBool::new(false),
        })
    }

    /// Brings up both event sources: the real-time channel and the polling
    /// fallback (which stands down by itself while the channel is connected).
    pub fn connect(&self, session_id: &str) {
        self.connection.connect(session_id);
        self.poller.start();
    }

    pub fn disconnect(&self) {
        self.connection.disconnect();
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.connection.state()
    }

    pub fn watch_connection(&self) -> watch::Receiver<ConnectionState> {
        self.connection.watch_state()
    }

    /// The notification collection; mutations go through it directly.
    pub fn store(&self) -> &Arc<NotificationStore> {
        &self.store
    }

    /// Injects a locally generated notification into the same ingest path as
    /// server events: validation, dedup, delivery.
    pub fn notify(&self, raw: RawNotification) {
        if self.ingest_tx.send(raw).is_err() {
            debug!("ingest loop stopped, local notification dropped");
        }
    }

    /// Banner events for the embedding UI.
    pub fn banner_events(&self) -> broadcast::Receiver<BannerEvent> {
        self.banner.subscribe()
    }

    /// Forwards the platform's desktop notification permission outcome.
    pub fn set_desktop_permission(&self, granted: bool) {
        self.desktop.set_permission(granted);
    }

    pub fn preferences(&self) -> Preferences {
        self.preferences.current()
    }

    pub fn update_preferences(&self, update: PreferencesUpdate) -> Preferences {
        self.preferences.update(update)
    }

    pub async fn register_push(&self) -> Result<PushSubscription, PushError> {
        match &self.push {
            Some(push) => push.register(&self.user_id).await,
            None => Err(PushError::UnsupportedPlatform(
                "no push relay configured".to_string(),
            )),
        }
    }

    pub async fn revoke_push(&self) {
        if let Some(push) = &self.push {
            push.revoke().await;
        }
    }

    pub async fn push_subscription(&self) -> Option<PushSubscription> {
        match &self.push {
            Some(push) => push.subscription().await,
            None => None,
        }
    }

    /// Tears the engine down: stops both event sources, drops subscribers,
    /// stops the ingest loop, and writes a final wholesale state snapshot.
    /// Idempotent; a second call is a no-op.
    pub async fn dispose(&self) {
        if self.disposed.swap(true, Ordering::SeqCst) {
            return;
        }
        info!("disposing notification engine");

        self.poller.stop();
        self.connection.disconnect();
        self.store.unsubscribe_all();

        self.cancel.cancel();
        let handle = self.loop_handle.lock().unwrap().take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }

        // Final snapshot after the loop drained its queues.
        let (records, _) = self.store.snapshot();
        if let Err(err) = self.state_store.save_notifications(&self.user_id, &records) {
            warn!(error = %err, "final notification snapshot failed");
        }
        if let Err(err) = self
            .state_store
            .save_preferences(&self.user_id, &self.preferences.current())
        {
            warn!(error = %err, "final preference snapshot failed");
        }
    }
}

#[allow(clippy::too_many_arguments)]
async fn run_event_loop(
    store: Arc<NotificationStore>,
    state_store: Arc<dyn StateStore>,
    user_id: String,
    multiplexer: DeliveryMultiplexer,
    mut ingest_rx: mpsc::UnboundedReceiver<RawNotification>,
    mut records_rx: mpsc::UnboundedReceiver<Vec<NotificationRecord>>,
    mut prefs_rx: mpsc::UnboundedReceiver<Preferences>,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            Some(raw) = ingest_rx.recv() => {
                // Only newly inserted records are presented; duplicates and
                // rejected payloads end here.
                if let Some(record) = store.ingest(raw) {
                    multiplexer.present(&record).await;
                }
            }
            Some(snapshot) = records_rx.recv() => {
                if let Err(err) = state_store.save_notifications(&user_id, &snapshot) {
                    warn!(error = %err, "notification snapshot save failed");
                }
            }
            Some(preferences) = prefs_rx.recv() => {
                if let Err(err) = state_store.save_preferences(&user_id, &preferences) {
                    warn!(error = %err, "preference snapshot save failed");
                }
            }
            _ = cancel.cancelled() => {
                // Flush whatever was already queued before shutting down.
                while let Ok(snapshot) = records_rx.try_recv() {
                    if let Err(err) = state_store.save_notifications(&user_id, &snapshot) {
                        warn!(error = %err, "notification snapshot save failed");
                    }
                }
                while let Ok(preferences) = prefs_rx.try_recv() {
                    if let Err(err) = state_store.save_preferences(&user_id, &preferences) {
                        warn!(error = %err, "preference snapshot save failed");
                    }
                }
                return;
            }
        }
    }
}
