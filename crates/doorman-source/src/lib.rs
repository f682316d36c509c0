pub mod slack;
pub mod socket;

use chrono::{DateTime, Utc};
use futures_util::stream::BoxStream;

use doorman_types::{Channel, ChatEvent, User};

pub use slack::SlackSource;

/// A chat API call failed.
#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("chat API error: {0}")]
    Api(String),
    #[error("websocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),
}

pub type Result<T> = std::result::Result<T, SourceError>;

/// Read access to the chat workspace: full snapshots of users and channels
/// plus paged message history per channel.
#[async_trait::async_trait]
pub trait ChatSource: Send + Sync {
    /// Full snapshot of every workspace member.
    async fn all_users(&self) -> Result<Vec<User>>;

    /// Full snapshot of every channel, without messages.
    async fn all_channels(&self) -> Result<Vec<Channel>>;

    /// Pages of events strictly newer than `since`. `None` means the
    /// beginning of the channel's history. The stream ends when the source
    /// reports no more pages.
    fn messages_since(
        &self,
        channel_id: &str,
        since: Option<DateTime<Utc>>,
    ) -> BoxStream<'static, Result<Vec<ChatEvent>>>;
}
