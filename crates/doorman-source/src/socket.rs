//! Socket Mode live feed: a long-lived WebSocket to Slack that turns event
//! envelopes into [`ChatEvent`]s. Reconnects with a delay on failure and
//! only stops when cancelled.

use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::mpsc;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use doorman_types::ChatEvent;

use crate::slack::{ApiMessage, SlackSource, decode_message};
use crate::Result;

const RECONNECT_DELAY: Duration = Duration::from_secs(5);
const LIVE_BUFFER: usize = 256;

impl SlackSource {
    /// Spawn the Socket Mode listener. Decoded events arrive on the returned
    /// channel one at a time; the listener task runs until `cancel` fires or
    /// the receiver is dropped.
    pub fn start_live(&self, cancel: CancellationToken) -> mpsc::Receiver<ChatEvent> {
        let (tx, rx) = mpsc::channel(LIVE_BUFFER);
        let source = self.clone();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        info!("Live feed stopping");
                        return;
                    }
                    result = source.run_socket(&tx) => {
                        match result {
                            Ok(ConnectionEnd::ReceiverDropped) => return,
                            Ok(ConnectionEnd::Disconnected) => {}
                            Err(e) => warn!("Socket Mode connection failed: {}", e),
                        }
                    }
                }
                tokio::select! {
                    _ = cancel.cancelled() => return,
                    _ = tokio::time::sleep(RECONNECT_DELAY) => {}
                }
            }
        });

        rx
    }

    async fn run_socket(&self, tx: &mpsc::Sender<ChatEvent>) -> Result<ConnectionEnd> {
        let open: ConnectionsOpen = self.post_app("apps.connections.open").await?;
        let (mut ws, _) = connect_async(open.url.as_str()).await?;

        while let Some(frame) = ws.next().await {
            let text = match frame? {
                WsMessage::Text(text) => text,
                WsMessage::Close(_) => break,
                _ => continue,
            };

            let envelope: Envelope = match serde_json::from_str(text.as_str()) {
                Ok(envelope) => envelope,
                Err(e) => {
                    debug!("Skipping undecodable frame: {}", e);
                    continue;
                }
            };

            match envelope.kind.as_str() {
                "hello" => info!("Socket Mode says hello"),
                "disconnect" => {
                    info!("Socket Mode disconnect requested, reconnecting");
                    break;
                }
                "events_api" => {
                    // Ack first; Slack redelivers unacked envelopes
                    if let Some(id) = envelope.envelope_id {
                        let ack = serde_json::json!({ "envelope_id": id });
                        ws.send(WsMessage::Text(ack.to_string().into())).await?;
                    }
                    let Some(event) = envelope
                        .payload
                        .and_then(|payload| payload.event)
                        .and_then(decode_socket_event)
                    else {
                        continue;
                    };
                    if tx.send(event).await.is_err() {
                        return Ok(ConnectionEnd::ReceiverDropped);
                    }
                }
                other => debug!("Ignoring envelope type {:?}", other),
            }
        }

        Ok(ConnectionEnd::Disconnected)
    }
}

enum ConnectionEnd {
    Disconnected,
    ReceiverDropped,
}

fn decode_socket_event(event: SocketEvent) -> Option<ChatEvent> {
    let channel_id = event.channel.clone();
    let message = ApiMessage {
        kind: event.kind,
        subtype: event.subtype,
        user: event.user,
        ts: event.ts,
        text: event.text,
        name: event.name,
    };
    decode_message(&message, &channel_id)
}

#[derive(Deserialize)]
struct ConnectionsOpen {
    // Defaulted so an ok=false response still decodes and surfaces the
    // API error instead of a serde error
    #[serde(default)]
    url: String,
}

#[derive(Deserialize)]
struct Envelope {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    envelope_id: Option<String>,
    #[serde(default)]
    payload: Option<Payload>,
}

#[derive(Deserialize)]
struct Payload {
    #[serde(default)]
    event: Option<SocketEvent>,
}

#[derive(Default, Deserialize)]
struct SocketEvent {
    #[serde(rename = "type", default)]
    kind: String,
    #[serde(default)]
    subtype: String,
    #[serde(default)]
    channel: String,
    #[serde(default)]
    user: String,
    #[serde(default)]
    ts: String,
    #[serde(default)]
    text: String,
    #[serde(default)]
    name: String,
}
