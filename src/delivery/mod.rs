//! Presentation of newly arrived notifications across in-app, desktop and
//! audio surfaces.

mod channels;
mod multiplexer;

pub use channels::{
    AudioChannel, BannerChannel, BannerEvent, ChannelError, ChannelKind, DeliveryChannel,
    DesktopChannel, Dismissal,
};
pub use multiplexer::DeliveryMultiplexer;
