use rusqlite::Connection;
use tracing::info;

use crate::Result;

pub fn run(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS users (
            user_id     TEXT PRIMARY KEY,
            name        TEXT NOT NULL,
            full_name   TEXT NOT NULL,
            email       TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS channels (
            channel_id  TEXT PRIMARY KEY,
            name        TEXT NOT NULL,
            ok          INTEGER NOT NULL DEFAULT 0,
            archived    INTEGER NOT NULL DEFAULT 0
        );

        CREATE INDEX IF NOT EXISTS idx_channels_name
            ON channels(name);

        -- created_at holds microseconds since the Unix epoch, UTC
        CREATE TABLE IF NOT EXISTS messages (
            user_id         TEXT NOT NULL,
            channel_id      TEXT NOT NULL,
            created_at      INTEGER NOT NULL,
            message_text    TEXT NOT NULL,
            UNIQUE(user_id, channel_id, created_at)
        );

        CREATE INDEX IF NOT EXISTS idx_messages_channel
            ON messages(channel_id, created_at);
        ",
    )?;

    info!("Store migrations complete");
    Ok(())
}
