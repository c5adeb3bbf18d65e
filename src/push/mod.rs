//! Push subscription lifecycle.
//!
//! Owns the single active subscription for the session: permission check,
//! platform-side subscription, server registration, and revocation. The
//! platform side sits behind a trait so tests (and future embeddings) can
//! swap it out.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::sync::SyncApi;

/// Subscription descriptor exchanged with the portal server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PushSubscription {
    pub endpoint: String,
    pub p256dh: String,
    pub auth: String,
    pub user_id: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PermissionStatus {
    Granted,
    Denied,
}

#[derive(Debug, Error)]
pub enum PushError {
    #[error("push permission denied")]
    PermissionDenied,
    #[error("push not supported: {0}")]
    UnsupportedPlatform(String),
    #[error("push registration failed: {0}")]
    Registration(String),
    #[error("push server rejected request: {0}")]
    Server(#[source] anyhow::Error),
}

/// Platform half of the push stack: permission, worker, and the subscription
/// primitive itself.
#[cfg_attr(feature = "mock", mockall::automock)]
#[async_trait]
pub trait PushPlatform: Send + Sync {
    /// Whether this platform can deliver push at all. Checked before any
    /// permission prompt.
    fn supported(&self) -> bool;

    async fn request_permission(&self) -> Result<PermissionStatus, PushError>;

    /// Makes sure the receiving endpoint (service worker or agent relay
    /// channel) is in place before subscribing.
    async fn ensure_worker(&self) -> Result<(), PushError>;

    async fn subscription_descriptor(
        &self,
        user_id: &str,
        server_key: &str,
    ) -> Result<PushSubscription, PushError>;

    async fn unsubscribe(&self, endpoint: &str) -> Result<(), PushError>;
}

/// Owns the active subscription and drives register/revoke against both the
/// platform and the server.
pub struct PushSubscriptionManager {
    platform: Arc<dyn PushPlatform>,
    api: Arc<dyn SyncApi>,
    server_key: String,
    active: Mutex<Option<PushSubscription>>,
}

impl PushSubscriptionManager {
    pub fn new(platform: Arc<dyn PushPlatform>, api: Arc<dyn SyncApi>, server_key: String) -> Self {
        Self {
            platform,
            api,
            server_key,
            active: Mutex::new(None),
        }
    }

    pub async fn subscription(&self) -> Option<PushSubscription> {
        self.active.lock().await.clone()
    }

    /// Registers a subscription for the user. Idempotent: an already active
    /// subscription for the same user is returned as-is. A leftover
    /// subscription for a different user is revoked first.
    pub async fn register(&self, user_id: &str) -> Result<PushSubscription, PushError> {
        let mut active = self.active.lock().await;

        if let Some(existing) = active.as_ref() {
            if existing.user_id == user_id {
                debug!(user_id, "push subscription already active");
                return Ok(existing.clone());
            }
        }
        if let Some(stale) = active.take() {
            self.teardown(&stale).await;
        }

        if !self.platform.supported() {
            return Err(PushError::UnsupportedPlatform(
                std::env::consts::OS.to_string(),
            ));
        }
        match self.platform.request_permission().await? {
            PermissionStatus::Granted => {}
            PermissionStatus::Denied => return Err(PushError::PermissionDenied),
        }
        self.platform.ensure_worker().await?;

        let subscription = self
            .platform
            .subscription_descriptor(user_id, &self.server_key)
            .await?;
        self.api
            .register_push(&subscription)
            .await
            .map_err(PushError::Server)?;

        info!(user_id, endpoint = %subscription.endpoint, "push subscription registered");
        *active = Some(subscription.clone());
        Ok(subscription)
    }

    /// Drops the active subscription. Always succeeds locally; platform and
    /// server failures are logged, with one retry for the server revocation.
    pub async fn revoke(&self) {
        let Some(subscription) = self.active.lock().await.take() else {
            return;
        };
        self.teardown(&subscription).await;
    }

    async fn teardown(&self, subscription: &PushSubscription) {
        if let Err(err) = self.platform.unsubscribe(&subscription.endpoint).await {
            warn!(error = %err, "platform push unsubscribe failed");
        }

        let revoke = || {
            self.api
                .revoke_push(&subscription.user_id, &subscription.endpoint)
        };
        if let Err(first) = revoke().await {
            debug!(error = %first, "push revocation failed, retrying once");
            if let Err(err) = revoke().await {
                warn!(
                    endpoint = %subscription.endpoint,
                    error = %err,
                    "server kept a revoked push subscription"
                );
            }
        }
        info!(endpoint = %subscription.endpoint, "push subscription revoked");
    }
}

/// Push integration for the standalone agent. There is no browser push
/// service here; the agent subscribes a device-scoped endpoint on the
/// portal's push relay and receives fan-out there.
pub struct AgentPushPlatform {
    relay_url: String,
    // Rotated on unsubscribe: a revoked relay channel is gone for good, so
    // the next subscription must claim a fresh endpoint.
    device_id: std::sync::Mutex<String>,
}

impl AgentPushPlatform {
    pub fn new(relay_url: String) -> Self {
        Self {
            relay_url: relay_url.trim_end_matches('/').to_string(),
            device_id: std::sync::Mutex::new(fresh_device_id()),
        }
    }
}

fn fresh_device_id() -> String {
    Uuid::new_v4().simple().to_string()
}

#[async_trait]
impl PushPlatform for AgentPushPlatform {
    fn supported(&self) -> bool {
        !self.relay_url.is_empty()
    }

    async fn request_permission(&self) -> Result<PermissionStatus, PushError> {
        // A headless agent has no permission prompt to show.
        Ok(PermissionStatus::Granted)
    }

    async fn ensure_worker(&self) -> Result<(), PushError> {
        Ok(())
    }

    async fn subscription_descriptor(
        &self,
        user_id: &str,
        _server_key: &str,
    ) -> Result<PushSubscription, PushError> {
        let device_id = self.device_id.lock().unwrap().clone();
        Ok(PushSubscription {
            endpoint: format!("{}/v1/relay/{}", self.relay_url, device_id),
            p256dh: Uuid::new_v4().simple().to_string(),
            auth: Uuid::new_v4().simple().to_string(),
            user_id: user_id.to_string(),
        })
    }

    async fn unsubscribe(&self, _endpoint: &str) -> Result<(), PushError> {
        *self.device_id.lock().unwrap() = fresh_device_id();
        Ok(())
    }
}
