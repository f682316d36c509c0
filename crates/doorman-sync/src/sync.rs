//! Keeps the store an eventually-consistent mirror of the chat source.

use std::sync::Arc;

use futures_util::StreamExt;
use tracing::{debug, info, warn};

use doorman_source::ChatSource;
use doorman_store::Store;
use doorman_types::ChatEvent;

use crate::SyncError;

pub struct Synchronizer {
    source: Arc<dyn ChatSource>,
    store: Arc<Store>,
}

impl Synchronizer {
    pub fn new(source: Arc<dyn ChatSource>, store: Arc<Store>) -> Self {
        Self { source, store }
    }

    /// Mirror users, channels, and per-channel message history into the
    /// store. Fails only if the user or channel snapshot cannot be fetched
    /// and stored; a failed catch-up of a single channel is logged and does
    /// not abort its siblings.
    pub async fn full_resync(&self) -> Result<(), SyncError> {
        info!("Updating storage...");

        let users = self.source.all_users().await?;
        self.store.upsert_users(&users)?;
        info!("Users updated");

        let channels = self.source.all_channels().await?;
        self.store.upsert_channels(&channels)?;
        info!("Channels updated");

        // One catch-up task per channel; each page is persisted as it
        // arrives so partial progress survives a crash mid-channel
        let mut tasks = Vec::with_capacity(channels.len());
        for channel in channels {
            let source = Arc::clone(&self.source);
            let store = Arc::clone(&self.store);
            tasks.push(tokio::spawn(async move {
                if let Err(e) = catch_up(source, store, &channel.id).await {
                    warn!("Catch-up failed for channel {}: {}", channel.id, e);
                }
            }));
        }
        for task in tasks {
            let _ = task.await;
        }
        info!("Messages updated");

        match self.store.stats() {
            Ok(stats) => info!(
                "Storage updated: {} users, {} channels, {} messages",
                stats.users, stats.channels, stats.messages
            ),
            Err(e) => warn!("Cannot read storage totals: {}", e),
        }
        Ok(())
    }

    /// Apply a single live event: exactly one storage mutation.
    pub fn apply_live_event(&self, event: &ChatEvent) -> Result<(), SyncError> {
        apply_event(&self.store, event)
    }
}

/// Catch one channel up from its stored watermark. The watermark is the
/// newest stored message timestamp; the source only returns strictly newer
/// events, so the watermark can only move forward.
async fn catch_up(
    source: Arc<dyn ChatSource>,
    store: Arc<Store>,
    channel_id: &str,
) -> Result<(), SyncError> {
    let since = store.last_message_at(channel_id)?;
    let mut pages = source.messages_since(channel_id, since);
    while let Some(page) = pages.next().await {
        apply_page(&store, &page?)?;
    }
    debug!("Channel {} caught up", channel_id);
    Ok(())
}

/// Apply one history page: text messages go into a single bulk upsert,
/// channel events are applied individually. A failed channel event is
/// logged and does not sink the page.
fn apply_page(store: &Store, events: &[ChatEvent]) -> Result<(), SyncError> {
    let mut texts = Vec::with_capacity(events.len());
    for event in events {
        match event {
            ChatEvent::Message(message) => texts.push(message.clone()),
            other => {
                if let Err(e) = apply_event(store, other) {
                    warn!("Cannot apply channel event: {}", e);
                }
            }
        }
    }
    store.upsert_messages(&texts)?;
    Ok(())
}

fn apply_event(store: &Store, event: &ChatEvent) -> Result<(), SyncError> {
    match event {
        ChatEvent::Message(message) => {
            store.upsert_messages(std::slice::from_ref(message))?;
        }
        ChatEvent::ChannelArchived { channel_id } => {
            store.set_channel_archived(channel_id, true)?;
            info!("Channel {} archived", channel_id);
        }
        ChatEvent::ChannelUnarchived { channel_id } => {
            store.set_channel_archived(channel_id, false)?;
            info!("Channel {} unarchived", channel_id);
        }
        ChatEvent::ChannelRenamed { channel_id, name } => {
            store.rename_channel(channel_id, name)?;
            info!("Channel {} renamed to {}", channel_id, name);
        }
    }
    Ok(())
}
