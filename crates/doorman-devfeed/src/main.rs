//! Synthetic frame generator for frontend development: serves randomized
//! classified-view frames over WebSocket on a fixed interval, no Slack or
//! database required.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::extract::ws::{Message as WsMessage, WebSocket};
use axum::extract::{State, WebSocketUpgrade};
use axum::response::IntoResponse;
use axum::routing::get;
use chrono::{Duration as ChronoDuration, Utc};
use rand::Rng;
use rand::distr::Alphanumeric;
use tower_http::cors::CorsLayer;
use tracing::info;

use doorman_types::{ChannelPair, ChannelView, Message};

const CHANNEL_WORDS: &[&str] = &[
    "general", "random", "dev", "design", "support", "announce", "ops", "sales", "lounge",
    "incidents",
];

struct FeedConfig {
    delay: Duration,
    ok_channels: usize,
    bad_channels: usize,
    messages: usize,
    max_text: usize,
}

impl FeedConfig {
    fn from_env() -> anyhow::Result<Self> {
        Ok(Self {
            delay: Duration::from_secs(env_or("DOORMAN_DEVFEED_DELAY_SECS", 3)?),
            ok_channels: env_or("DOORMAN_DEVFEED_OK_CHANNELS", 25)? as usize,
            bad_channels: env_or("DOORMAN_DEVFEED_BAD_CHANNELS", 25)? as usize,
            messages: env_or("DOORMAN_DEVFEED_MESSAGES", 3)? as usize,
            max_text: env_or("DOORMAN_DEVFEED_MAX_TEXT", 256)? as usize,
        })
    }
}

fn env_or(name: &str, default: u64) -> anyhow::Result<u64> {
    match std::env::var(name) {
        Ok(value) => Ok(value.parse()?),
        Err(_) => Ok(default),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "doorman_devfeed=debug".into()),
        )
        .init();

    let config = Arc::new(FeedConfig::from_env()?);
    let bind_addr =
        std::env::var("DOORMAN_DEVFEED_ADDR").unwrap_or_else(|_| "127.0.0.1:8080".into());

    let app = Router::new()
        .route("/watch", get(feed))
        .with_state(config)
        .layer(CorsLayer::permissive());

    let addr: SocketAddr = bind_addr.parse()?;
    info!("Dev feed listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

async fn feed(State(config): State<Arc<FeedConfig>>, ws: WebSocketUpgrade) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, config))
}

async fn handle_socket(mut socket: WebSocket, config: Arc<FeedConfig>) {
    info!("Dev feed viewer connected");
    loop {
        let pair = generate_pair(&config);
        let Ok(text) = serde_json::to_string(&pair) else {
            break;
        };
        if socket.send(WsMessage::Text(text.into())).await.is_err() {
            break;
        }
        tokio::time::sleep(config.delay).await;
    }
    info!("Dev feed viewer disconnected");
}

fn generate_pair(config: &FeedConfig) -> ChannelPair {
    ChannelPair {
        bad: (0..config.bad_channels)
            .map(|_| generate_channel(config))
            .collect(),
        ok: (0..config.ok_channels)
            .map(|_| generate_channel(config))
            .collect(),
    }
}

fn generate_channel(config: &FeedConfig) -> ChannelView {
    let mut rng = rand::rng();
    let id = generate_id();
    let word = CHANNEL_WORDS[rng.random_range(0..CHANNEL_WORDS.len())];
    let name = format!("{}-{}", word, rng.random_range(1..100));

    // Newest first, like the real store returns them
    let messages = (0..config.messages.max(1))
        .map(|age| generate_message(&id, age as i64, config.max_text))
        .collect();

    ChannelView {
        id,
        name,
        archived: false,
        messages,
    }
}

fn generate_message(channel_id: &str, age_minutes: i64, max_text: usize) -> Message {
    let mut rng = rand::rng();
    let length = rng.random_range(1..=max_text.max(1));
    let text: String = (&mut rng)
        .sample_iter(Alphanumeric)
        .take(length)
        .map(char::from)
        .collect();

    Message {
        user_id: generate_id(),
        channel_id: channel_id.to_string(),
        created_at: Utc::now() - ChronoDuration::minutes(age_minutes),
        text,
    }
}

fn generate_id() -> String {
    let mut rng = rand::rng();
    (&mut rng)
        .sample_iter(Alphanumeric)
        .take(9)
        .map(char::from)
        .collect::<String>()
        .to_uppercase()
}
