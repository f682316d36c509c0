pub mod events;
pub mod models;

pub use events::ChatEvent;
pub use models::{Channel, ChannelPair, ChannelView, Message, User};
