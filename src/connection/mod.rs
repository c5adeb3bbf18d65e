//! Real-time channel: state machine, wire envelopes, and the channel owner.

mod manager;
mod messages;
mod state;

pub use manager::{ConnectionError, ConnectionManager, ConnectionSettings};
pub use messages::{msg_types, system, ClientMessage, ServerMessage};
pub use state::{ConnectionState, ReconnectPolicy};
