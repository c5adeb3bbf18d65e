//! Server sync: REST API client and the polling fallback.

mod api;
mod poller;

pub use api::{HttpSyncApi, SyncApi};
pub use poller::{PollerSettings, PollingSync};

#[cfg(feature = "mock")]
pub use api::MockSyncApi;
