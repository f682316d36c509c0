//! End-to-end tests of the synchronizer and engine against a scripted
//! in-memory chat source and an in-memory store.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures_util::StreamExt;
use futures_util::stream::BoxStream;
use regex::Regex;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

use doorman_gateway::Fanout;
use doorman_source::{ChatSource, Result as SourceResult, SourceError};
use doorman_store::Store;
use doorman_sync::{Classifier, Engine, Synchronizer};
use doorman_types::{Channel, ChatEvent, Message, User};

const PAGE_SIZE: usize = 2;

/// Scripted source: fixed users/channels, per-channel message history served
/// in pages, optional injected failures. Records every history request so
/// tests can assert on watermarks.
#[derive(Default)]
struct StubSource {
    users: Vec<User>,
    channels: Vec<Channel>,
    messages: HashMap<String, Vec<Message>>,
    fail_users: bool,
    fail_channels: HashSet<String>,
    history_calls: Mutex<Vec<(String, Option<DateTime<Utc>>)>>,
}

#[async_trait::async_trait]
impl ChatSource for StubSource {
    async fn all_users(&self) -> SourceResult<Vec<User>> {
        if self.fail_users {
            return Err(SourceError::Api("users.list: scripted failure".into()));
        }
        Ok(self.users.clone())
    }

    async fn all_channels(&self) -> SourceResult<Vec<Channel>> {
        Ok(self.channels.clone())
    }

    fn messages_since(
        &self,
        channel_id: &str,
        since: Option<DateTime<Utc>>,
    ) -> BoxStream<'static, SourceResult<Vec<ChatEvent>>> {
        self.history_calls
            .lock()
            .unwrap()
            .push((channel_id.to_string(), since));

        if self.fail_channels.contains(channel_id) {
            let failure = SourceError::Api("conversations.history: scripted failure".into());
            return futures_util::stream::iter(vec![Err(failure)]).boxed();
        }

        // Strictly newer than the watermark, oldest first
        let mut newer: Vec<Message> = self
            .messages
            .get(channel_id)
            .map(|messages| {
                messages
                    .iter()
                    .filter(|m| since.is_none_or(|at| m.created_at > at))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();
        newer.sort_by_key(|m| m.created_at);

        let pages: Vec<SourceResult<Vec<ChatEvent>>> = newer
            .chunks(PAGE_SIZE)
            .map(|page| Ok(page.iter().cloned().map(ChatEvent::Message).collect()))
            .collect();
        futures_util::stream::iter(pages).boxed()
    }
}

fn user(id: &str, email: &str) -> User {
    User {
        id: id.into(),
        name: format!("@{id}"),
        full_name: id.to_uppercase(),
        email: email.into(),
    }
}

fn channel(id: &str, name: &str) -> Channel {
    Channel {
        id: id.into(),
        name: name.into(),
        ok: false,
        archived: false,
    }
}

fn message(user_id: &str, channel_id: &str, micros: i64, text: &str) -> Message {
    Message {
        user_id: user_id.into(),
        channel_id: channel_id.into(),
        created_at: DateTime::from_timestamp_micros(micros).unwrap(),
        text: text.into(),
    }
}

fn classifier(store: &Arc<Store>, domains: &[&str]) -> Classifier {
    Classifier::new(
        Arc::clone(store),
        Regex::new(".*").unwrap(),
        domains.iter().map(|d| d.to_string()).collect(),
        3,
    )
}

fn populated_source() -> StubSource {
    StubSource {
        users: vec![user("U1", "alice@corp.com"), user("U2", "bob@other.com")],
        channels: vec![channel("C1", "general")],
        messages: HashMap::from([(
            "C1".to_string(),
            vec![
                message("U1", "C1", 100, "first"),
                message("U2", "C1", 200, "second"),
                message("U1", "C1", 300, "third"),
            ],
        )]),
        ..Default::default()
    }
}

#[tokio::test]
async fn full_resync_twice_yields_identical_state_and_view() {
    let store = Arc::new(Store::open_in_memory().unwrap());
    let sync = Synchronizer::new(Arc::new(populated_source()), Arc::clone(&store));
    let classifier = classifier(&store, &["corp.com"]);

    sync.full_resync().await.unwrap();
    let stats_first = store.stats().unwrap();
    let view_first = serde_json::to_vec(&classifier.channel_pair().unwrap()).unwrap();

    sync.full_resync().await.unwrap();
    let stats_second = store.stats().unwrap();
    let view_second = serde_json::to_vec(&classifier.channel_pair().unwrap()).unwrap();

    assert_eq!(stats_first.users, stats_second.users);
    assert_eq!(stats_first.channels, stats_second.channels);
    assert_eq!(stats_first.messages, stats_second.messages);
    assert_eq!(stats_second.messages, 3);
    assert_eq!(view_first, view_second);
}

#[tokio::test]
async fn catch_up_starts_at_epoch_and_then_only_requests_newer() {
    let source = Arc::new(populated_source());
    let store = Arc::new(Store::open_in_memory().unwrap());
    let sync = Synchronizer::new(Arc::clone(&source) as Arc<dyn ChatSource>, Arc::clone(&store));

    sync.full_resync().await.unwrap();
    let watermark = store.last_message_at("C1").unwrap().unwrap();
    assert_eq!(watermark.timestamp_micros(), 300);

    sync.full_resync().await.unwrap();
    let after = store.last_message_at("C1").unwrap().unwrap();
    assert!(after >= watermark);

    let calls = source.history_calls.lock().unwrap();
    assert_eq!(calls.len(), 2);
    // First catch-up has no watermark: history from the epoch, not "now"
    assert_eq!(calls[0], ("C1".to_string(), None));
    // Second catch-up requests only messages strictly newer than the stored
    // watermark
    assert_eq!(calls[1], ("C1".to_string(), Some(watermark)));
}

#[tokio::test]
async fn one_failing_channel_does_not_abort_its_siblings() {
    let mut source = populated_source();
    source.channels.push(channel("C2", "random"));
    source.messages.insert(
        "C2".to_string(),
        vec![message("U2", "C2", 400, "survives")],
    );
    source.fail_channels.insert("C1".to_string());

    let store = Arc::new(Store::open_in_memory().unwrap());
    let sync = Synchronizer::new(Arc::new(source), Arc::clone(&store));

    // Degraded, not fatal
    sync.full_resync().await.unwrap();

    assert!(store.last_message_at("C1").unwrap().is_none());
    assert_eq!(
        store
            .last_message_at("C2")
            .unwrap()
            .unwrap()
            .timestamp_micros(),
        400
    );
}

#[tokio::test]
async fn failed_startup_resync_is_fatal() {
    let source = StubSource {
        fail_users: true,
        ..Default::default()
    };
    let store = Arc::new(Store::open_in_memory().unwrap());
    let sync = Synchronizer::new(Arc::new(source), Arc::clone(&store));
    let classifier = classifier(&store, &["corp.com"]);

    let started = Engine::start(sync, classifier, Fanout::new(), Duration::from_secs(3600)).await;
    assert!(started.is_err());
}

#[tokio::test]
async fn live_archive_event_flips_only_the_archived_flag() {
    let store = Arc::new(Store::open_in_memory().unwrap());
    let sync = Synchronizer::new(Arc::new(populated_source()), Arc::clone(&store));
    sync.full_resync().await.unwrap();

    sync.apply_live_event(&ChatEvent::ChannelArchived {
        channel_id: "C1".into(),
    })
    .unwrap();

    let stored = store.channel("C1").unwrap().unwrap();
    assert!(stored.archived);
    assert_eq!(stored.name, "general");
    assert_eq!(store.stats().unwrap().messages, 3);

    sync.apply_live_event(&ChatEvent::ChannelUnarchived {
        channel_id: "C1".into(),
    })
    .unwrap();
    assert!(!store.channel("C1").unwrap().unwrap().archived);
}

#[tokio::test]
async fn live_rename_and_message_events_apply_one_mutation_each() {
    let store = Arc::new(Store::open_in_memory().unwrap());
    let sync = Synchronizer::new(Arc::new(populated_source()), Arc::clone(&store));
    sync.full_resync().await.unwrap();

    sync.apply_live_event(&ChatEvent::ChannelRenamed {
        channel_id: "C1".into(),
        name: "lounge".into(),
    })
    .unwrap();
    assert_eq!(store.channel("C1").unwrap().unwrap().name, "lounge");

    let live = ChatEvent::Message(message("U2", "C1", 400, "live"));
    sync.apply_live_event(&live).unwrap();
    assert_eq!(store.stats().unwrap().messages, 4);

    // Re-applying the same event leaves storage unchanged
    sync.apply_live_event(&live).unwrap();
    assert_eq!(store.stats().unwrap().messages, 4);
}

#[tokio::test]
async fn engine_publishes_on_change_and_suppresses_identical_views() {
    let store = Arc::new(Store::open_in_memory().unwrap());
    let sync = Synchronizer::new(Arc::new(populated_source()), Arc::clone(&store));
    let classifier = classifier(&store, &["corp.com"]);
    let fanout = Fanout::new();
    let mut sub = fanout.subscribe().await;

    let engine = Engine::start(sync, classifier, fanout.clone(), Duration::from_secs(3600))
        .await
        .unwrap();

    let (live_tx, live_rx) = mpsc::channel(16);
    let cancel = CancellationToken::new();
    let task = tokio::spawn(engine.run(live_rx, cancel.clone()));

    // Startup publishes the initial view
    let initial = timeout(Duration::from_secs(1), sub.recv())
        .await
        .expect("no initial view")
        .unwrap();

    // A new message changes the view
    let live = ChatEvent::Message(message("U2", "C1", 400, "live"));
    live_tx.send(live.clone()).await.unwrap();
    let updated = timeout(Duration::from_secs(1), sub.recv())
        .await
        .expect("no updated view")
        .unwrap();
    assert_ne!(initial, updated);

    // The same event again leaves the serialized view byte-identical, so the
    // publish is suppressed
    live_tx.send(live).await.unwrap();
    let suppressed = timeout(Duration::from_millis(300), sub.recv()).await;
    assert!(suppressed.is_err(), "identical view must not be re-published");

    cancel.cancel();
    task.await.unwrap().unwrap();
}
