use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use super::server::AppState;
use crate::chat::SendRequest;
use crate::chat::friends::FriendDraft;
use crate::chat::sessions::SessionDraft;
use crate::error::ChatError;
use crate::types::{ChatEvent, SessionDescription};

const DEFAULT_HISTORY_LIMIT: usize = 50;

#[derive(Deserialize)]
struct RpcRequest {
    id: String,
    method: String,
    #[serde(default)]
    params: serde_json::Value,
}

/// Parameters for the `chat.send` RPC method.
#[derive(Debug, Deserialize)]
pub struct ChatSendParams {
    pub session_id: String,
    pub content: String,
}

#[derive(Debug, Deserialize)]
struct FriendRef {
    friend_id: String,
}

#[derive(Debug, Deserialize)]
struct FriendUpdate {
    friend_id: String,
    #[serde(flatten)]
    draft: FriendDraft,
}

#[derive(Debug, Deserialize)]
struct FriendStatus {
    friend_id: String,
    active: bool,
}

#[derive(Debug, Deserialize)]
struct SessionRef {
    session_id: String,
}

#[derive(Debug, Deserialize)]
struct SessionUpdate {
    session_id: String,
    title: String,
    description: SessionDescription,
}

#[derive(Debug, Deserialize)]
struct HistoryParams {
    session_id: String,
    #[serde(default = "default_history_limit")]
    limit: usize,
}

fn default_history_limit() -> usize {
    DEFAULT_HISTORY_LIMIT
}

#[derive(Serialize)]
struct RpcResponse {
    id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    result: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

/// Result of handling an RPC request.
/// Either a single JSON response or a stream of chat events.
pub enum RpcResult {
    Response(String),
    Stream {
        id: String,
        rx: mpsc::Receiver<ChatEvent>,
        cancel: CancellationToken,
    },
}

fn respond(id: String, result: Result<serde_json::Value, String>) -> RpcResult {
    let resp = match result {
        Ok(value) => RpcResponse {
            id,
            result: Some(value),
            error: None,
        },
        Err(error) => RpcResponse {
            id,
            result: None,
            error: Some(error),
        },
    };
    RpcResult::Response(serde_json::to_string(&resp).unwrap_or_default())
}

fn to_value<T: Serialize>(result: Result<T, ChatError>) -> Result<serde_json::Value, String> {
    let value = result.map_err(|e| e.to_string())?;
    serde_json::to_value(value).map_err(|e| format!("serialization failed: {e}"))
}

fn params<T: DeserializeOwned>(method: &str, value: serde_json::Value) -> Result<T, String> {
    serde_json::from_value(value).map_err(|e| format!("invalid {method} params: {e}"))
}

/// Handle an incoming JSON-RPC-style message from an authenticated user.
pub async fn handle_rpc(msg: &str, user_id: &str, state: &Arc<AppState>) -> RpcResult {
    let req: RpcRequest = match serde_json::from_str(msg) {
        Ok(r) => r,
        Err(e) => {
            warn!("malformed rpc: {e}");
            return respond("0".into(), Err(format!("parse error: {e}")));
        }
    };

    let id = req.id;
    let method = req.method.as_str();
    let chat = &state.chat;

    match method {
        "ping" => respond(id, Ok(serde_json::json!("pong"))),

        "status" => respond(
            id,
            Ok(serde_json::json!({
                "version": env!("CARGO_PKG_VERSION"),
                "store": state.config.store.kind,
                "max_active_friends": state.config.friends.max_active,
            })),
        ),

        "chat.send" => match params::<ChatSendParams>(method, req.params) {
            Ok(p) => handle_chat_send(id, user_id.to_string(), p, state),
            Err(e) => respond(id, Err(e)),
        },

        "friend.list" => respond(id, to_value(chat.friends().list(user_id).await)),

        "friend.create" => match params::<FriendDraft>(method, req.params) {
            Ok(draft) => respond(id, to_value(chat.friends().create(user_id, draft).await)),
            Err(e) => respond(id, Err(e)),
        },

        "friend.update" => match params::<FriendUpdate>(method, req.params) {
            Ok(p) => respond(
                id,
                to_value(chat.friends().update(user_id, &p.friend_id, p.draft).await),
            ),
            Err(e) => respond(id, Err(e)),
        },

        "friend.set_status" => match params::<FriendStatus>(method, req.params) {
            Ok(p) => respond(
                id,
                to_value(chat.friends().set_status(user_id, &p.friend_id, p.active).await),
            ),
            Err(e) => respond(id, Err(e)),
        },

        "friend.delete" => match params::<FriendRef>(method, req.params) {
            Ok(p) => respond(id, to_value(chat.friends().delete(user_id, &p.friend_id).await)),
            Err(e) => respond(id, Err(e)),
        },

        "session.get" => match params::<SessionRef>(method, req.params) {
            Ok(p) => respond(id, to_value(chat.sessions().get(user_id, &p.session_id).await)),
            Err(e) => respond(id, Err(e)),
        },

        "session.create" => match params::<SessionDraft>(method, req.params) {
            Ok(draft) => respond(id, to_value(chat.sessions().create(user_id, draft).await)),
            Err(e) => respond(id, Err(e)),
        },

        "session.update" => match params::<SessionUpdate>(method, req.params) {
            Ok(p) => {
                let draft = SessionDraft {
                    title: p.title,
                    description: p.description,
                };
                respond(
                    id,
                    to_value(chat.sessions().update(user_id, &p.session_id, draft).await),
                )
            }
            Err(e) => respond(id, Err(e)),
        },

        "session.delete" => match params::<SessionRef>(method, req.params) {
            Ok(p) => respond(
                id,
                to_value(chat.sessions().delete(user_id, &p.session_id).await),
            ),
            Err(e) => respond(id, Err(e)),
        },

        "history.list" => match params::<HistoryParams>(method, req.params) {
            Ok(p) => respond(
                id,
                to_value(chat.sessions().history(user_id, &p.session_id, p.limit).await),
            ),
            Err(e) => respond(id, Err(e)),
        },

        _ => respond(id, Err(format!("unknown method: {method}"))),
    }
}

/// Handle chat.send: spawn the send pipeline and return its event stream.
///
/// Sends to the same session run one at a time.
fn handle_chat_send(
    request_id: String,
    user_id: String,
    params: ChatSendParams,
    state: &Arc<AppState>,
) -> RpcResult {
    let (tx, rx) = mpsc::channel::<ChatEvent>(32);
    let cancel = CancellationToken::new();
    let task_cancel = cancel.clone();
    let state = Arc::clone(state);

    tokio::spawn(async move {
        let lock = state
            .session_lock(&format!("{user_id}:{}", params.session_id))
            .await;
        let _guard = lock.lock().await;

        let result = state
            .chat
            .send(
                SendRequest {
                    user_id: &user_id,
                    session_id: &params.session_id,
                    message: &params.content,
                },
                &tx,
                &task_cancel,
            )
            .await;

        match result {
            Ok(summary) => info!(
                user_id = %user_id,
                session_id = %params.session_id,
                turns = summary.turns_played,
                cancelled = summary.cancelled,
                "chat.send finished"
            ),
            Err(e) => {
                warn!(user_id = %user_id, "chat.send failed: {e}");
                let _ = tx.send(ChatEvent::Typing(false)).await;
                let _ = tx.send(ChatEvent::Error(e.to_string())).await;
            }
        }
    });

    RpcResult::Stream {
        id: request_id,
        rx,
        cancel,
    }
}
