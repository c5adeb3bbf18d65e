//! HTTP client for the portal's notification endpoints.

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::notifications::RawNotification;
use crate::push::PushSubscription;

/// Server API used by the polling fallback and the push subscription
/// manager. A trait seam so tests inject fakes.
#[cfg_attr(feature = "mock", mockall::automock)]
#[async_trait]
pub trait SyncApi: Send + Sync {
    /// Fetches notifications newer than the cursor (`since` = last seen id).
    /// `None` fetches the whole retained feed.
    async fn fetch_notifications(
        &self,
        user_id: &str,
        since: Option<&str>,
    ) -> Result<Vec<RawNotification>>;

    /// Registers a push subscription descriptor with the server.
    async fn register_push(&self, subscription: &PushSubscription) -> Result<()>;

    /// Removes a previously registered push subscription.
    async fn revoke_push(&self, user_id: &str, endpoint: &str) -> Result<()>;
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct RegisterPushRequest<'a> {
    subscription: &'a PushSubscription,
    user_id: &'a str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct RevokePushRequest<'a> {
    user_id: &'a str,
    endpoint: &'a str,
}

#[derive(Debug, Deserialize)]
struct FeedResponse {
    notifications: Vec<RawNotification>,
}

/// Production implementation against the portal's REST API.
pub struct HttpSyncApi {
    client: reqwest::Client,
    base_url: String,
}

impl HttpSyncApi {
    /// # Arguments
    /// * `base_url` - Base URL of the portal API (e.g. "https://portal.example")
    /// * `timeout_sec` - Request timeout in seconds
    pub fn new(base_url: String, timeout_sec: u64) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_sec))
            .build()
            .context("Failed to create HTTP client")?;

        let base_url = base_url.trim_end_matches('/').to_string();

        Ok(Self { client, base_url })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}

#[async_trait]
impl SyncApi for HttpSyncApi {
    async fn fetch_notifications(
        &self,
        user_id: &str,
        since: Option<&str>,
    ) -> Result<Vec<RawNotification>> {
        let url = format!("{}/v1/notifications", self.base_url);
        let mut request = self.client.get(&url).query(&[("userId", user_id)]);
        if let Some(since) = since {
            request = request.query(&[("since", since)]);
        }

        let response = request
            .send()
            .await
            .context("Failed to fetch notification feed")?;

        if !response.status().is_success() {
            anyhow::bail!("Notification feed returned status {}", response.status());
        }

        let feed: FeedResponse = response
            .json()
            .await
            .context("Failed to parse notification feed")?;
        Ok(feed.notifications)
    }

    async fn register_push(&self, subscription: &PushSubscription) -> Result<()> {
        let url = format!("{}/v1/push/subscriptions", self.base_url);
        let response = self
            .client
            .post(&url)
            .json(&RegisterPushRequest {
                subscription,
                user_id: &subscription.user_id,
            })
            .send()
            .await
            .context("Failed to send push subscription")?;

        // Only the 2xx acknowledgment matters; the body is not specified.
        if !response.status().is_success() {
            anyhow::bail!(
                "Push subscription registration returned status {}",
                response.status()
            );
        }
        Ok(())
    }

    async fn revoke_push(&self, user_id: &str, endpoint: &str) -> Result<()> {
        let url = format!("{}/v1/push/subscriptions", self.base_url);
        let response = self
            .client
            .delete(&url)
            .json(&RevokePushRequest { user_id, endpoint })
            .send()
            .await
            .context("Failed to revoke push subscription")?;

        if !response.status().is_success() {
            anyhow::bail!(
                "Push subscription revocation returned status {}",
                response.status()
            );
        }
        Ok(())
    }
}
