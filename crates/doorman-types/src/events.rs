use crate::models::Message;

/// A single notification from the chat source, decoded at the source
/// boundary. The same shape covers live events and replayed history pages;
/// unknown event subtypes are dropped before they reach this enum.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChatEvent {
    /// An ordinary text-bearing message.
    Message(Message),

    /// A channel was archived.
    ChannelArchived { channel_id: String },

    /// A channel was brought back from the archive.
    ChannelUnarchived { channel_id: String },

    /// A channel got a new display name.
    ChannelRenamed { channel_id: String, name: String },
}
