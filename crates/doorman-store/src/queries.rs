use chrono::{DateTime, Utc};
use regex::Regex;
use rusqlite::{Connection, OptionalExtension, params};
use serde::Serialize;
use tracing::warn;

use doorman_types::{Channel, ChannelView, Message, User};

use crate::{Result, Store};

/// Storage totals, logged after each successful resync and exposed over HTTP.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct StoreStats {
    pub users: u64,
    pub channels: u64,
    pub messages: u64,
}

impl Store {
    // -- Users --

    /// Bulk upsert keyed by user_id; replaces name, full_name and email.
    pub fn upsert_users(&self, users: &[User]) -> Result<()> {
        self.with_conn(|conn| {
            let txn = conn.unchecked_transaction()?;
            {
                let mut stmt = txn.prepare(
                    "INSERT INTO users (user_id, name, full_name, email)
                     VALUES (?1, ?2, ?3, ?4)
                     ON CONFLICT(user_id) DO UPDATE SET
                         name = ?2, full_name = ?3, email = ?4",
                )?;
                for user in users {
                    stmt.execute(params![user.id, user.name, user.full_name, user.email])?;
                }
            }
            txn.commit()?;
            Ok(())
        })
    }

    /// Fetch users by ID. Rows that fail to decode are skipped.
    pub fn users_by_id(&self, ids: &[String]) -> Result<Vec<User>> {
        if ids.is_empty() {
            return Ok(vec![]);
        }

        self.with_conn(|conn| {
            let placeholders: Vec<String> = (1..=ids.len()).map(|i| format!("?{}", i)).collect();
            let sql = format!(
                "SELECT user_id, name, full_name, email FROM users WHERE user_id IN ({})",
                placeholders.join(", ")
            );

            let mut stmt = conn.prepare(&sql)?;
            let sql_params: Vec<&dyn rusqlite::types::ToSql> = ids
                .iter()
                .map(|id| id as &dyn rusqlite::types::ToSql)
                .collect();

            let rows = stmt.query_map(sql_params.as_slice(), |row| {
                Ok(User {
                    id: row.get(0)?,
                    name: row.get(1)?,
                    full_name: row.get(2)?,
                    email: row.get(3)?,
                })
            })?;

            Ok(rows
                .filter_map(|row| match row {
                    Ok(user) => Some(user),
                    Err(e) => {
                        warn!("Skipping malformed user row: {}", e);
                        None
                    }
                })
                .collect())
        })
    }

    // -- Channels --

    /// Bulk upsert keyed by channel_id; replaces name and archived flag.
    /// The `ok` column is owned by an older classification scheme and is
    /// deliberately absent from the UPDATE clause.
    pub fn upsert_channels(&self, channels: &[Channel]) -> Result<()> {
        self.with_conn(|conn| {
            let txn = conn.unchecked_transaction()?;
            {
                let mut stmt = txn.prepare(
                    "INSERT INTO channels (channel_id, name, ok, archived)
                     VALUES (?1, ?2, 0, ?3)
                     ON CONFLICT(channel_id) DO UPDATE SET
                         name = ?2, archived = ?3",
                )?;
                for channel in channels {
                    stmt.execute(params![channel.id, channel.name, channel.archived])?;
                }
            }
            txn.commit()?;
            Ok(())
        })
    }

    pub fn set_channel_archived(&self, id: &str, archived: bool) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "UPDATE channels SET archived = ?2 WHERE channel_id = ?1",
                params![id, archived],
            )?;
            Ok(())
        })
    }

    pub fn rename_channel(&self, id: &str, name: &str) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "UPDATE channels SET name = ?2 WHERE channel_id = ?1",
                params![id, name],
            )?;
            Ok(())
        })
    }

    /// Point read of a single channel.
    pub fn channel(&self, id: &str) -> Result<Option<Channel>> {
        self.with_conn(|conn| {
            let row = conn
                .query_row(
                    "SELECT channel_id, name, ok, archived FROM channels WHERE channel_id = ?1",
                    [id],
                    |row| {
                        Ok(Channel {
                            id: row.get(0)?,
                            name: row.get(1)?,
                            ok: row.get(2)?,
                            archived: row.get(3)?,
                        })
                    },
                )
                .optional()?;
            Ok(row)
        })
    }

    /// Channels whose name matches `pattern`, each with its most recent
    /// `limit` messages attached newest-first. Channels without any stored
    /// message are left out entirely. Output order is stable (by channel_id)
    /// so identical storage state serializes to identical bytes.
    pub fn channels_matching(&self, pattern: &Regex, limit: u32) -> Result<Vec<ChannelView>> {
        self.with_conn(|conn| {
            let channels = query_channels(conn)?;
            let mut views = Vec::new();
            for channel in channels {
                if !pattern.is_match(&channel.name) {
                    continue;
                }
                let messages = query_messages(conn, &channel.id, limit)?;
                if messages.is_empty() {
                    continue;
                }
                views.push(ChannelView {
                    id: channel.id,
                    name: channel.name,
                    archived: channel.archived,
                    messages,
                });
            }
            Ok(views)
        })
    }

    // -- Messages --

    /// Bulk upsert keyed by (user_id, channel_id, created_at). Re-ingesting
    /// the same key replaces the text, so edits are last-write-wins.
    pub fn upsert_messages(&self, messages: &[Message]) -> Result<()> {
        self.with_conn(|conn| {
            let txn = conn.unchecked_transaction()?;
            {
                let mut stmt = txn.prepare(
                    "INSERT INTO messages (user_id, channel_id, created_at, message_text)
                     VALUES (?1, ?2, ?3, ?4)
                     ON CONFLICT(user_id, channel_id, created_at) DO UPDATE SET
                         message_text = ?4",
                )?;
                for message in messages {
                    stmt.execute(params![
                        message.user_id,
                        message.channel_id,
                        message.created_at.timestamp_micros(),
                        message.text,
                    ])?;
                }
            }
            txn.commit()?;
            Ok(())
        })
    }

    /// Timestamp of the newest stored message in a channel, or `None` for a
    /// channel with no messages. This is the catch-up watermark.
    pub fn last_message_at(&self, channel_id: &str) -> Result<Option<DateTime<Utc>>> {
        self.with_conn(|conn| {
            let micros: Option<i64> = conn
                .query_row(
                    "SELECT created_at FROM messages
                     WHERE channel_id = ?1 ORDER BY created_at DESC LIMIT 1",
                    [channel_id],
                    |row| row.get(0),
                )
                .optional()?;
            Ok(micros.and_then(DateTime::from_timestamp_micros))
        })
    }

    pub fn messages_by_channel(&self, channel_id: &str, limit: u32) -> Result<Vec<Message>> {
        self.with_conn(|conn| query_messages(conn, channel_id, limit))
    }

    // -- Stats --

    pub fn stats(&self) -> Result<StoreStats> {
        self.with_conn(|conn| {
            let users = count(conn, "SELECT COUNT(*) FROM users")?;
            let channels = count(conn, "SELECT COUNT(*) FROM channels")?;
            let messages = count(conn, "SELECT COUNT(*) FROM messages")?;
            Ok(StoreStats {
                users,
                channels,
                messages,
            })
        })
    }
}

fn count(conn: &Connection, sql: &str) -> Result<u64> {
    let n: u64 = conn.query_row(sql, [], |row| row.get(0))?;
    Ok(n)
}

fn query_channels(conn: &Connection) -> Result<Vec<Channel>> {
    let mut stmt =
        conn.prepare("SELECT channel_id, name, ok, archived FROM channels ORDER BY channel_id")?;

    let rows = stmt.query_map([], |row| {
        Ok(Channel {
            id: row.get(0)?,
            name: row.get(1)?,
            ok: row.get(2)?,
            archived: row.get(3)?,
        })
    })?;

    Ok(rows
        .filter_map(|row| match row {
            Ok(channel) => Some(channel),
            Err(e) => {
                warn!("Skipping malformed channel row: {}", e);
                None
            }
        })
        .collect())
}

/// Most recent `limit` messages of a channel, newest first. Rows that fail
/// to decode (including out-of-range timestamps) are skipped.
fn query_messages(conn: &Connection, channel_id: &str, limit: u32) -> Result<Vec<Message>> {
    let mut stmt = conn.prepare(
        "SELECT user_id, channel_id, created_at, message_text
         FROM messages
         WHERE channel_id = ?1
         ORDER BY created_at DESC
         LIMIT ?2",
    )?;

    let rows = stmt.query_map(params![channel_id, limit], |row| {
        Ok((
            row.get::<_, String>(0)?,
            row.get::<_, String>(1)?,
            row.get::<_, i64>(2)?,
            row.get::<_, String>(3)?,
        ))
    })?;

    Ok(rows
        .filter_map(|row| {
            let (user_id, channel_id, micros, text) = match row {
                Ok(raw) => raw,
                Err(e) => {
                    warn!("Skipping malformed message row: {}", e);
                    return None;
                }
            };
            let Some(created_at) = DateTime::from_timestamp_micros(micros) else {
                warn!("Skipping message with out-of-range timestamp: {}", micros);
                return None;
            };
            Some(Message {
                user_id,
                channel_id,
                created_at,
                text,
            })
        })
        .collect())
}
