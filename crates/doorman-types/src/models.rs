use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A workspace member mirrored from the chat source.
/// Only `email` matters downstream: it decides channel classification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    pub name: String,
    pub full_name: String,
    pub email: String,
}

/// A single text message. (user_id, channel_id, created_at) is the natural
/// key; re-ingesting the same key with different text overwrites the text.
/// `created_at` carries microsecond precision.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub user_id: String,
    pub channel_id: String,
    pub created_at: DateTime<Utc>,
    pub text: String,
}

/// A channel mirrored from the chat source. `ok` is a persisted leftover of
/// an older classification scheme: sync writes preserve it and nothing in
/// the fan-out path reads it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Channel {
    pub id: String,
    pub name: String,
    pub ok: bool,
    pub archived: bool,
}

/// A channel with its most recent messages attached, newest first.
/// Built for display only; never persisted. A view is only materialized for
/// channels that have at least one stored message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelView {
    pub id: String,
    pub name: String,
    pub archived: bool,
    pub messages: Vec<Message>,
}

impl ChannelView {
    /// The channel's most recent message.
    pub fn latest(&self) -> &Message {
        &self.messages[0]
    }
}

/// The classified view delivered to watchers: channels whose latest poster
/// belongs to a recognized email domain (`ok`) and the rest (`bad`), each
/// ordered ascending by the time of the channel's most recent message.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelPair {
    pub bad: Vec<ChannelView>,
    pub ok: Vec<ChannelView>,
}
