//! Slack Web API implementation of [`ChatSource`].

use async_stream::try_stream;
use chrono::{DateTime, Utc};
use futures_util::stream::BoxStream;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use tracing::debug;

use doorman_types::{Channel, ChatEvent, Message, User};

use crate::{ChatSource, Result, SourceError};

const API_BASE: &str = "https://slack.com/api";
const PAGE_LIMIT: u32 = 1000;

/// Talks to the Slack Web API with a bot token; the app token is only used
/// by the Socket Mode live feed.
#[derive(Clone)]
pub struct SlackSource {
    http: reqwest::Client,
    bot_token: String,
    pub(crate) app_token: String,
}

impl SlackSource {
    pub fn new(bot_token: String, app_token: String) -> Self {
        Self {
            http: reqwest::Client::new(),
            bot_token,
            app_token,
        }
    }

    pub(crate) async fn get<T: DeserializeOwned>(
        &self,
        method: &str,
        query: &[(&str, String)],
    ) -> Result<T> {
        let resp: ApiResponse<T> = self
            .http
            .get(format!("{API_BASE}/{method}"))
            .bearer_auth(&self.bot_token)
            .query(query)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        resp.into_body(method)
    }

    pub(crate) async fn post_app<T: DeserializeOwned>(&self, method: &str) -> Result<T> {
        let resp: ApiResponse<T> = self
            .http
            .post(format!("{API_BASE}/{method}"))
            .bearer_auth(&self.app_token)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        resp.into_body(method)
    }
}

#[async_trait::async_trait]
impl ChatSource for SlackSource {
    async fn all_users(&self) -> Result<Vec<User>> {
        let mut users = Vec::new();
        let mut cursor = String::new();
        loop {
            let mut query = vec![("limit", "200".to_string())];
            if !cursor.is_empty() {
                query.push(("cursor", cursor.clone()));
            }
            let page: UsersList = self.get("users.list", &query).await?;
            users.extend(page.members.into_iter().map(|member| User {
                id: member.id,
                name: member.name,
                full_name: member.real_name,
                email: member.profile.email,
            }));
            cursor = next_cursor(page.response_metadata);
            if cursor.is_empty() {
                break;
            }
        }
        Ok(users)
    }

    async fn all_channels(&self) -> Result<Vec<Channel>> {
        let mut channels = Vec::new();
        let mut cursor = String::new();
        loop {
            let mut query = vec![("limit", "200".to_string())];
            if !cursor.is_empty() {
                query.push(("cursor", cursor.clone()));
            }
            let page: ConversationsList = self.get("conversations.list", &query).await?;
            channels.extend(page.channels.into_iter().map(|channel| Channel {
                id: channel.id,
                name: channel.name,
                ok: false,
                archived: channel.is_archived,
            }));
            cursor = next_cursor(page.response_metadata);
            if cursor.is_empty() {
                break;
            }
        }
        Ok(channels)
    }

    fn messages_since(
        &self,
        channel_id: &str,
        since: Option<DateTime<Utc>>,
    ) -> BoxStream<'static, Result<Vec<ChatEvent>>> {
        let source = self.clone();
        let channel_id = channel_id.to_string();
        // An absent watermark means the whole history, from the epoch on.
        // Slack treats `oldest` as an exclusive bound, so catch-up never
        // re-requests the message at the watermark itself.
        let oldest = format_ts(since.unwrap_or(DateTime::UNIX_EPOCH));

        Box::pin(try_stream! {
            let mut cursor = String::new();
            loop {
                let mut query = vec![
                    ("channel", channel_id.clone()),
                    ("oldest", oldest.clone()),
                    ("limit", PAGE_LIMIT.to_string()),
                ];
                if !cursor.is_empty() {
                    query.push(("cursor", cursor.clone()));
                }
                let page: History = source.get("conversations.history", &query).await?;
                debug!("Fetched {} messages for channel {}", page.messages.len(), channel_id);

                // Slack returns newest-first within a page
                let events: Vec<ChatEvent> = page
                    .messages
                    .iter()
                    .rev()
                    .filter_map(|message| decode_message(message, &channel_id))
                    .collect();
                yield events;

                cursor = next_cursor(page.response_metadata);
                if !page.has_more || cursor.is_empty() {
                    break;
                }
            }
        })
    }
}

/// Decode one wire message into a [`ChatEvent`]. Unknown subtypes and
/// undecodable timestamps are dropped here, at the boundary.
pub(crate) fn decode_message(message: &ApiMessage, channel_id: &str) -> Option<ChatEvent> {
    if message.kind != "message" {
        return None;
    }
    let created_at = parse_ts(&message.ts)?;
    match message.subtype.as_str() {
        "" => Some(ChatEvent::Message(Message {
            user_id: message.user.clone(),
            channel_id: channel_id.to_string(),
            created_at,
            text: message.text.clone(),
        })),
        "channel_archive" => Some(ChatEvent::ChannelArchived {
            channel_id: channel_id.to_string(),
        }),
        "channel_unarchive" => Some(ChatEvent::ChannelUnarchived {
            channel_id: channel_id.to_string(),
        }),
        "channel_name" => Some(ChatEvent::ChannelRenamed {
            channel_id: channel_id.to_string(),
            name: message.name.clone(),
        }),
        other => {
            debug!("Dropping message with unhandled subtype {:?}", other);
            None
        }
    }
}

/// Slack timestamps are "seconds.microseconds" strings.
pub(crate) fn parse_ts(ts: &str) -> Option<DateTime<Utc>> {
    let (seconds, micros) = ts.split_once('.')?;
    let seconds: i64 = seconds.parse().ok()?;
    let micros: u32 = micros.parse().ok()?;
    DateTime::from_timestamp(seconds, micros.checked_mul(1_000)?)
}

pub(crate) fn format_ts(at: DateTime<Utc>) -> String {
    format!("{:010}.{:06}", at.timestamp(), at.timestamp_subsec_micros())
}

// -- Wire types --

#[derive(Deserialize)]
struct ApiResponse<T> {
    ok: bool,
    #[serde(default)]
    error: Option<String>,
    #[serde(flatten)]
    body: T,
}

impl<T> ApiResponse<T> {
    fn into_body(self, method: &str) -> Result<T> {
        if !self.ok {
            let reason = self.error.unwrap_or_else(|| "unknown error".into());
            return Err(SourceError::Api(format!("{method}: {reason}")));
        }
        Ok(self.body)
    }
}

#[derive(Deserialize)]
struct ResponseMetadata {
    #[serde(default)]
    next_cursor: String,
}

fn next_cursor(metadata: Option<ResponseMetadata>) -> String {
    metadata.map(|m| m.next_cursor).unwrap_or_default()
}

#[derive(Deserialize)]
struct UsersList {
    #[serde(default)]
    members: Vec<ApiUser>,
    #[serde(default)]
    response_metadata: Option<ResponseMetadata>,
}

#[derive(Deserialize)]
struct ApiUser {
    id: String,
    #[serde(default)]
    name: String,
    #[serde(default)]
    real_name: String,
    #[serde(default)]
    profile: ApiProfile,
}

#[derive(Default, Deserialize)]
struct ApiProfile {
    #[serde(default)]
    email: String,
}

#[derive(Deserialize)]
struct ConversationsList {
    #[serde(default)]
    channels: Vec<ApiChannel>,
    #[serde(default)]
    response_metadata: Option<ResponseMetadata>,
}

#[derive(Deserialize)]
struct ApiChannel {
    id: String,
    #[serde(default)]
    name: String,
    #[serde(default)]
    is_archived: bool,
}

#[derive(Deserialize)]
struct History {
    #[serde(default)]
    messages: Vec<ApiMessage>,
    #[serde(default)]
    has_more: bool,
    #[serde(default)]
    response_metadata: Option<ResponseMetadata>,
}

#[derive(Default, Deserialize)]
pub(crate) struct ApiMessage {
    #[serde(rename = "type", default)]
    pub(crate) kind: String,
    #[serde(default)]
    pub(crate) subtype: String,
    #[serde(default)]
    pub(crate) user: String,
    #[serde(default)]
    pub(crate) ts: String,
    #[serde(default)]
    pub(crate) text: String,
    #[serde(default)]
    pub(crate) name: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn api_message(subtype: &str) -> ApiMessage {
        ApiMessage {
            kind: "message".into(),
            subtype: subtype.into(),
            user: "U1".into(),
            ts: "1609459200.123456".into(),
            text: "hello".into(),
            name: "new-name".into(),
        }
    }

    #[test]
    fn ts_round_trips_at_microsecond_precision() {
        let at = parse_ts("1609459200.123456").unwrap();
        assert_eq!(format_ts(at), "1609459200.123456");
        assert_eq!(at.timestamp(), 1_609_459_200);
        assert_eq!(at.timestamp_subsec_micros(), 123_456);
    }

    #[test]
    fn ts_rejects_garbage() {
        assert!(parse_ts("").is_none());
        assert!(parse_ts("1609459200").is_none());
        assert!(parse_ts("not.a-timestamp").is_none());
    }

    #[test]
    fn empty_subtype_decodes_to_a_text_message() {
        let event = decode_message(&api_message(""), "C1").unwrap();
        let ChatEvent::Message(message) = event else {
            panic!("expected a text message");
        };
        assert_eq!(message.user_id, "U1");
        assert_eq!(message.channel_id, "C1");
        assert_eq!(message.text, "hello");
    }

    #[test]
    fn channel_subtypes_decode_to_channel_events() {
        assert_eq!(
            decode_message(&api_message("channel_archive"), "C1"),
            Some(ChatEvent::ChannelArchived {
                channel_id: "C1".into()
            })
        );
        assert_eq!(
            decode_message(&api_message("channel_unarchive"), "C1"),
            Some(ChatEvent::ChannelUnarchived {
                channel_id: "C1".into()
            })
        );
        assert_eq!(
            decode_message(&api_message("channel_name"), "C1"),
            Some(ChatEvent::ChannelRenamed {
                channel_id: "C1".into(),
                name: "new-name".into()
            })
        );
    }

    #[test]
    fn unknown_subtypes_and_non_messages_are_dropped() {
        assert_eq!(decode_message(&api_message("bot_message"), "C1"), None);

        let mut joined = api_message("");
        joined.kind = "member_joined_channel".into();
        assert_eq!(decode_message(&joined, "C1"), None);
    }
}
