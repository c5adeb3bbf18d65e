//! Notification records and the bounded client-side store

mod models;
mod store;

pub use models::{
    generate_record_id, NotificationAction, NotificationKind, NotificationRecord,
    RawNotification, ValidationError,
};
pub use store::{NotificationStore, SubscriberCallback, DEFAULT_CAPACITY};
