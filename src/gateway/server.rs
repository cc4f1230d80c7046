use axum::{
    Router,
    extract::State,
    extract::ws::{Message, WebSocket, WebSocketUpgrade},
    response::IntoResponse,
    routing::{get, post},
};
use futures::SinkExt;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use super::protocol::RpcResult;
use super::{auth, media};
use crate::chat::CompanionChat;
use crate::config::CompanionConfig;

pub struct AppState {
    pub token: Option<String>,
    pub chat: Arc<CompanionChat>,
    pub config: CompanionConfig,
    pub http: reqwest::Client,
    /// Per-session locks so sends into one session never interleave.
    pub session_locks: RwLock<HashMap<String, Arc<Mutex<()>>>>,
}

impl AppState {
    pub fn new(config: CompanionConfig, chat: Arc<CompanionChat>, token: Option<String>) -> Self {
        Self {
            token,
            chat,
            config,
            http: reqwest::Client::new(),
            session_locks: RwLock::new(HashMap::new()),
        }
    }

    pub async fn session_lock(&self, session_key: &str) -> Arc<Mutex<()>> {
        {
            let locks = self.session_locks.read().await;
            if let Some(lock) = locks.get(session_key) {
                return Arc::clone(lock);
            }
        }

        let mut locks = self.session_locks.write().await;
        Arc::clone(
            locks
                .entry(session_key.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(()))),
        )
    }
}

/// Routes served by the gateway.
pub fn app(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/ws", get(ws_handler))
        .route("/health", get(health))
        .route("/api/proxy/chat/completions", post(media::proxy_chat_completions))
        .route("/api/images", post(media::generate_image))
        .route("/api/transcribe", post(media::transcribe))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

pub async fn run(config: CompanionConfig, token: Option<String>) -> anyhow::Result<()> {
    let is_loopback = config.gateway.bind == "127.0.0.1" || config.gateway.bind == "::1";

    if !is_loopback && token.is_none() {
        anyhow::bail!(
            "Auth token required when binding to non-loopback address. \
             Set --token or COMPANION_TOKEN env var."
        );
    }

    let chat = Arc::new(CompanionChat::from_config(&config)?);
    let addr = format!("{}:{}", config.gateway.bind, config.gateway.port);
    let state = Arc::new(AppState::new(config, chat, token));

    let listener = tokio::net::TcpListener::bind(&addr).await?;

    info!("companion gateway listening on {addr}");
    if is_loopback {
        info!("bound to loopback, local access only");
    } else {
        warn!("bound to {addr}, ensure auth token is set");
    }

    axum::serve(listener, app(state)).await?;
    Ok(())
}

async fn health() -> &'static str {
    "ok"
}

async fn ws_handler(ws: WebSocketUpgrade, State(state): State<Arc<AppState>>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_connection(socket, state))
}

async fn send_json(socket: &mut WebSocket, value: &serde_json::Value) -> bool {
    let text = serde_json::to_string(value).unwrap_or_default();
    socket.send(Message::Text(text.into())).await.is_ok()
}

async fn handle_connection(mut socket: WebSocket, state: Arc<AppState>) {
    // First frame identifies the user and, when configured, carries the token.
    let user_id = match socket.recv().await {
        Some(Ok(Message::Text(msg))) => auth::verify_connect(&msg, &state.token),
        _ => None,
    };

    let Some(user_id) = user_id else {
        let _ = socket
            .send(Message::Text(
                r#"{"error":"auth_failed","code":4001}"#.into(),
            ))
            .await;
        let _ = socket.close().await;
        return;
    };

    let _ = send_json(
        &mut socket,
        &serde_json::json!({ "ok": true, "version": env!("CARGO_PKG_VERSION") }),
    )
    .await;

    info!(user_id = %user_id, "client connected");

    while let Some(Ok(msg)) = socket.recv().await {
        match msg {
            Message::Text(text) => match super::protocol::handle_rpc(&text, &user_id, &state).await {
                RpcResult::Response(resp) => {
                    let _ = socket.send(Message::Text(resp.into())).await;
                }
                RpcResult::Stream { id, mut rx, cancel } => {
                    if !stream_events(&mut socket, &id, &mut rx, &cancel).await {
                        break;
                    }
                }
            },
            Message::Close(_) => break,
            _ => {}
        }
    }

    info!(user_id = %user_id, "client disconnected");
}

/// Forward chat events as frames until the send finishes. Returns false
/// when the client went away, after cancelling the send.
async fn stream_events(
    socket: &mut WebSocket,
    id: &str,
    rx: &mut tokio::sync::mpsc::Receiver<crate::types::ChatEvent>,
    cancel: &tokio_util::sync::CancellationToken,
) -> bool {
    loop {
        tokio::select! {
            event = rx.recv() => {
                let Some(event) = event else {
                    return true;
                };
                if !send_json(socket, &event.to_frame(id)).await {
                    // Client disconnected mid-stream
                    cancel.cancel();
                    return false;
                }
            }
            incoming = socket.recv() => match incoming {
                Some(Ok(Message::Text(_))) => {
                    let busy = serde_json::json!({ "id": id, "event": "error", "data": "send in progress" });
                    let _ = send_json(socket, &busy).await;
                }
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => {
                    cancel.cancel();
                    return false;
                }
                Some(Ok(_)) => {}
            },
        }
    }
}
