//! WebSocket endpoint streaming classified-view frames to viewers.

use axum::extract::ws::{Message, WebSocket};
use axum::extract::{State, WebSocketUpgrade};
use axum::response::IntoResponse;
use futures_util::{SinkExt, StreamExt};
use tracing::info;

use crate::fanout::Fanout;

pub async fn watch(State(fanout): State<Fanout>, ws: WebSocketUpgrade) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, fanout))
}

async fn handle_socket(socket: WebSocket, fanout: Fanout) {
    let mut sub = fanout.subscribe().await;
    let (mut sender, mut receiver) = socket.split();

    info!("Viewer connected");

    loop {
        tokio::select! {
            frame = sub.recv() => {
                let Some(bytes) = frame else { break };
                // Frames are serialized JSON, always valid UTF-8
                let Ok(text) = String::from_utf8(bytes.to_vec()) else {
                    continue;
                };
                if sender.send(Message::Text(text.into())).await.is_err() {
                    break;
                }
            }
            incoming = receiver.next() => {
                match incoming {
                    Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                    _ => {}
                }
            }
        }
    }

    info!("Viewer disconnected");
    // Dropping the subscription deregisters it from the fanout
}
