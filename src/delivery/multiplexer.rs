//! Fan-out of newly ingested notifications to the delivery channels.

use std::sync::Arc;

use tracing::{debug, warn};

use crate::notifications::NotificationRecord;
use crate::preferences::{PreferenceStore, Preferences};

use super::channels::{ChannelKind, DeliveryChannel, Dismissal};

/// Decides which channels present a record and with what dismissal, then
/// fires them. A channel failure is logged and never stops the others.
pub struct DeliveryMultiplexer {
    preferences: Arc<PreferenceStore>,
    channels: Vec<Arc<dyn DeliveryChannel>>,
}

impl DeliveryMultiplexer {
    pub fn new(preferences: Arc<PreferenceStore>, channels: Vec<Arc<dyn DeliveryChannel>>) -> Self {
        Self {
            preferences,
            channels,
        }
    }

    pub async fn present(&self, record: &NotificationRecord) {
        let prefs = self.preferences.current();
        let dismissal = dismissal_for(record, &prefs);

        for channel in &self.channels {
            if !channel_applies(channel.as_ref(), record, &prefs) {
                continue;
            }
            if let Err(err) = channel.deliver(record, dismissal).await {
                warn!(
                    channel = channel.kind().as_str(),
                    id = %record.id,
                    error = %err,
                    "delivery channel failed"
                );
            } else {
                debug!(channel = channel.kind().as_str(), id = %record.id, "delivered");
            }
        }
    }
}

/// Per-record flags override the global preference when present; the banner
/// always fires.
fn channel_applies(
    channel: &dyn DeliveryChannel,
    record: &NotificationRecord,
    prefs: &Preferences,
) -> bool {
    match channel.kind() {
        ChannelKind::Banner => true,
        ChannelKind::Desktop => {
            record.desktop.unwrap_or(prefs.desktop_enabled) && channel.available()
        }
        ChannelKind::Audio => record.sound.unwrap_or(prefs.sound_enabled) && channel.available(),
    }
}

fn dismissal_for(record: &NotificationRecord, prefs: &Preferences) -> Dismissal {
    if record.important {
        Dismissal::Explicit
    } else if prefs.auto_close_ms == 0 {
        Dismissal::Never
    } else {
        Dismissal::AfterMs(prefs.auto_close_ms)
    }
}
