mod config;

use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json};
use axum::routing::get;
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

use doorman_gateway::{Fanout, watch};
use doorman_source::SlackSource;
use doorman_store::Store;
use doorman_sync::{Classifier, Engine, Synchronizer};

use crate::config::Config;

#[derive(Clone)]
struct StatsState {
    store: Arc<Store>,
    fanout: Fanout,
}

#[derive(Serialize)]
struct ServerStats {
    users: u64,
    channels: u64,
    messages: u64,
    watchers: usize,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    // Init logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "doorman=debug,tower_http=debug".into()),
        )
        .init();

    let config = Config::from_env()?;
    info!("Recognized domains: {:?}", config.domains);

    let store = Arc::new(Store::open(&config.db_path)?);
    let source = SlackSource::new(config.slack_bot_token.clone(), config.slack_app_token.clone());

    let cancel = CancellationToken::new();
    let live_rx = source.start_live(cancel.clone());

    let fanout = Fanout::new();
    let sync = Synchronizer::new(Arc::new(source), Arc::clone(&store));
    let classifier = Classifier::new(
        Arc::clone(&store),
        config.channel_pattern.clone(),
        config.domains.clone(),
        config.message_limit,
    );

    // The startup resync is mandatory: bail out if the workspace cannot be
    // mirrored at least once
    let engine = Engine::start(sync, classifier, fanout.clone(), config.resync_interval).await?;
    tokio::spawn(async move {
        if let Err(e) = engine.run(live_rx, cancel).await {
            error!("Engine failed: {}", e);
            std::process::exit(1);
        }
    });

    // Routes
    let ws_route = Router::new()
        .route("/watch", get(watch::watch))
        .with_state(fanout.clone());

    let stats_route = Router::new()
        .route("/stats", get(stats))
        .with_state(StatsState { store, fanout });

    let app = Router::new()
        .merge(ws_route)
        .merge(stats_route)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http());

    let addr: SocketAddr = config.bind_addr.parse()?;
    info!("Doorman listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

async fn stats(State(state): State<StatsState>) -> impl IntoResponse {
    let totals = match state.store.stats() {
        Ok(totals) => totals,
        Err(e) => {
            warn!("Cannot read storage totals: {}", e);
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    };
    Json(ServerStats {
        users: totals.users,
        channels: totals.channels,
        messages: totals.messages,
        watchers: state.fanout.subscriber_count().await,
    })
    .into_response()
}
