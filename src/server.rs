use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Query, Request, State};
use axum::http::StatusCode;
use axum::middleware::{self, Next};
use axum::response::{Html, IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use futures_util::{Sink, SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::json;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tokio::time::{Instant, interval_at};
use tokio_tungstenite::accept_async;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, error, info, warn};

use crate::SEND_TIMEOUT;
use crate::broadcast::Subscription;
use crate::engine::wait_for_shutdown;
use crate::error::TrackerError;
use crate::query::{self, DEFAULT_TOP_LIMIT, RefreshView};
use crate::source::MarketSource;
use crate::state::Tracker;

const LANDING_PAGE: &str = r#"<!DOCTYPE html>
<html>
<head>
    <title>KalshiWhale</title>
</head>
<body>
    <h1>KalshiWhale backend is running.</h1>
    <p>Market data is served under /api and streamed over the WebSocket port.</p>
</body>
</html>
"#;

/// Shared state for HTTP handlers.
#[derive(Clone)]
pub struct AppState {
    pub tracker: Arc<Tracker>,
    pub source: Arc<dyn MarketSource>,
    pub api_key: Option<String>,
}

impl IntoResponse for TrackerError {
    fn into_response(self) -> Response {
        let status = match &self {
            TrackerError::RefreshFailed => StatusCode::BAD_GATEWAY,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        let body = Json(json!({ "success": false, "error": self.to_string() }));
        (status, body).into_response()
    }
}

/// Build the query API router.
///
/// When an API key is configured every `/api` route requires a matching
/// `X-API-Key` header; the landing page stays open.
pub fn router(state: AppState) -> Router {
    let api = Router::new()
        .route("/api/markets", get(get_markets))
        .route("/api/status", get(get_status))
        .route("/api/top-markets", get(get_top_markets))
        .route("/api/markets/top5", get(get_top5))
        .route("/api/whale-alerts", get(get_whale_alerts))
        .route("/api/whale-analytics", get(get_whale_analytics))
        .route("/api/refresh", post(post_refresh));

    let api = if state.api_key.is_some() {
        api.layer(middleware::from_fn_with_state(
            state.clone(),
            api_key_middleware,
        ))
    } else {
        api
    };

    api.route("/", get(landing)).with_state(state)
}

/// Serve the query API until `shutdown` flips.
pub async fn serve_http(
    listener: TcpListener,
    state: AppState,
    mut shutdown: watch::Receiver<bool>,
) -> std::io::Result<()> {
    let api_key_required = state.api_key.is_some();
    if let Ok(addr) = listener.local_addr() {
        info!(address = %addr, api_key_required, "HTTP API listening");
    }
    axum::serve(listener, router(state))
        .with_graceful_shutdown(async move {
            wait_for_shutdown(&mut shutdown).await;
            info!("HTTP API shutting down");
        })
        .await
}

async fn api_key_middleware(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Response {
    let Some(expected) = &state.api_key else {
        return next.run(request).await;
    };
    let provided = request
        .headers()
        .get("x-api-key")
        .and_then(|v| v.to_str().ok());

    match provided {
        Some(key) if key == expected => next.run(request).await,
        Some(_) => unauthorized("Invalid API key"),
        None => unauthorized("Missing X-API-Key header"),
    }
}

fn unauthorized(message: &str) -> Response {
    (
        StatusCode::UNAUTHORIZED,
        Json(json!({ "success": false, "error": message })),
    )
        .into_response()
}

async fn landing() -> Html<&'static str> {
    Html(LANDING_PAGE)
}

async fn get_markets(State(state): State<AppState>) -> impl IntoResponse {
    Json(query::snapshot(&state.tracker))
}

async fn get_status(State(state): State<AppState>) -> impl IntoResponse {
    Json(query::status(&state.tracker))
}

#[derive(Debug, Deserialize)]
struct TopParams {
    limit: Option<usize>,
}

async fn get_top_markets(
    State(state): State<AppState>,
    Query(params): Query<TopParams>,
) -> impl IntoResponse {
    let limit = params.limit.unwrap_or(DEFAULT_TOP_LIMIT);
    Json(query::top_markets(&state.tracker, limit))
}

async fn get_top5(State(state): State<AppState>) -> impl IntoResponse {
    Json(query::top5_detailed(&state.tracker))
}

async fn get_whale_alerts(State(state): State<AppState>) -> impl IntoResponse {
    Json(query::whale_alerts(&state.tracker))
}

async fn get_whale_analytics(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.tracker.analytics())
}

async fn post_refresh(State(state): State<AppState>) -> Result<Json<RefreshView>, TrackerError> {
    info!("Manual refresh requested");
    let report = state.tracker.refresh(state.source.as_ref()).await?;
    Ok(Json(RefreshView::from(&report)))
}

// ── WebSocket stream ───────────────────────────────────────────────

/// Accept stream subscribers until `shutdown` flips.
pub async fn serve_websocket(
    listener: TcpListener,
    tracker: Arc<Tracker>,
    heartbeat: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    if let Ok(addr) = listener.local_addr() {
        info!("WebSocket server bound to {addr}");
    }
    let client_shutdown = shutdown.clone();

    loop {
        tokio::select! {
            accepted = listener.accept() => match accepted {
                Ok((stream, peer_addr)) => {
                    debug!("New WebSocket connection from {peer_addr}");
                    tokio::spawn(handle_client(
                        stream,
                        peer_addr,
                        Arc::clone(&tracker),
                        heartbeat,
                        client_shutdown.clone(),
                    ));
                }
                Err(e) => warn!("Failed to accept WebSocket connection: {e}"),
            },
            _ = wait_for_shutdown(&mut shutdown) => break,
        }
    }
    info!("WebSocket server shutting down");
}

/// One subscriber connection: forwards broadcasts, sends heartbeats and
/// drains inbound frames until either side goes away.
async fn handle_client(
    stream: TcpStream,
    peer_addr: SocketAddr,
    tracker: Arc<Tracker>,
    heartbeat: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let ws_stream = match accept_async(stream).await {
        Ok(ws) => ws,
        Err(e) => {
            error!("WebSocket handshake failed for {peer_addr}: {e}");
            return;
        }
    };

    let (mut ws_sender, mut ws_receiver) = ws_stream.split();
    let Subscription { id, mut rx } = tracker.subscribe();
    let mut heartbeats = interval_at(Instant::now() + heartbeat, heartbeat);

    loop {
        tokio::select! {
            _ = wait_for_shutdown(&mut shutdown) => break,
            payload = rx.recv() => {
                // None: dropped by the broadcaster or closed on shutdown
                let Some(payload) = payload else { break };
                if !send_text(&mut ws_sender, payload.to_string(), peer_addr).await {
                    break;
                }
            }
            _ = heartbeats.tick() => {
                let Ok(json) = serde_json::to_string(&tracker.heartbeat()) else {
                    continue;
                };
                if !send_text(&mut ws_sender, json, peer_addr).await {
                    break;
                }
            }
            msg = ws_receiver.next() => match msg {
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(Message::Text(text))) => {
                    debug!("Received text from {peer_addr}: {}", text.as_str());
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    debug!("WebSocket error for {peer_addr}: {e}");
                    break;
                }
            },
        }
    }

    tracker.unsubscribe(id);
    let _ = tokio::time::timeout(SEND_TIMEOUT, ws_sender.send(Message::Close(None))).await;
    debug!("WebSocket connection closed for {peer_addr}");
}

/// Write one text frame, bounded by [`SEND_TIMEOUT`].
async fn send_text<S>(sink: &mut S, text: String, peer_addr: SocketAddr) -> bool
where
    S: Sink<Message> + Unpin,
    S::Error: std::fmt::Display,
{
    match tokio::time::timeout(SEND_TIMEOUT, sink.send(Message::Text(text.into()))).await {
        Ok(Ok(())) => true,
        Ok(Err(e)) => {
            debug!("Send to {peer_addr} failed: {e}");
            false
        }
        Err(_) => {
            warn!("Send to {peer_addr} timed out");
            false
        }
    }
}
