use axum::{
    Json,
    extract::{Multipart, State},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use super::server::AppState;

fn error(status: StatusCode, message: impl Into<String>) -> Response {
    (status, Json(serde_json::json!({ "error": message.into() }))).into_response()
}

fn config_error(message: &str) -> Response {
    warn!("{message}");
    error(StatusCode::INTERNAL_SERVER_ERROR, message)
}

/// Relay an upstream failure with its status and body. JSON bodies are
/// passed through as the error payload; anything else as a string.
async fn relay_failure(response: reqwest::Response) -> Response {
    let status =
        StatusCode::from_u16(response.status().as_u16()).unwrap_or(StatusCode::BAD_GATEWAY);
    let body = response.text().await.unwrap_or_default();
    let payload = serde_json::from_str::<serde_json::Value>(&body)
        .unwrap_or(serde_json::Value::String(body));
    (status, Json(serde_json::json!({ "error": payload }))).into_response()
}

/// `POST /api/proxy/chat/completions`: forward the body to the configured
/// upstream with the server-held key.
pub async fn proxy_chat_completions(
    State(state): State<Arc<AppState>>,
    Json(body): Json<serde_json::Value>,
) -> Response {
    let proxy = &state.config.proxy;
    let Some(base) = proxy.upstream_base_url.as_deref() else {
        return config_error("proxy upstream base URL is not configured");
    };
    let Some(key) = proxy.api_key.as_deref().filter(|k| !k.trim().is_empty()) else {
        return config_error("proxy API key is not configured");
    };

    let url = format!("{}/chat/completions", base.trim_end_matches('/'));
    let response = match state
        .http
        .post(&url)
        .header("Authorization", format!("Bearer {key}"))
        .json(&body)
        .send()
        .await
    {
        Ok(r) => r,
        Err(e) => {
            warn!(url = %url, "proxy request failed: {e}");
            return error(StatusCode::BAD_GATEWAY, format!("upstream request failed: {e}"));
        }
    };

    if !response.status().is_success() {
        warn!(status = %response.status(), "proxy upstream returned an error");
        return relay_failure(response).await;
    }

    match response.json::<serde_json::Value>().await {
        Ok(json) => Json(json).into_response(),
        Err(e) => error(StatusCode::BAD_GATEWAY, format!("malformed upstream body: {e}")),
    }
}

#[derive(Deserialize)]
pub struct ImageRequest {
    pub prompt: String,
}

/// `POST /api/images`: enhance the prompt with a chat completion, then
/// generate a base64 PNG from it.
pub async fn generate_image(
    State(state): State<Arc<AppState>>,
    Json(req): Json<ImageRequest>,
) -> Response {
    let image = &state.config.image;
    let Some(key) = image.api_key.as_deref().filter(|k| !k.trim().is_empty()) else {
        return config_error("image API key is not configured");
    };
    if req.prompt.trim().is_empty() {
        return error(StatusCode::BAD_REQUEST, "prompt cannot be empty");
    }
    let base = image.base_url.trim_end_matches('/');

    let prompt = match enhance_prompt(&state, base, key, &req.prompt).await {
        Ok(enhanced) => enhanced,
        Err(e) => {
            warn!("prompt enhancement failed, using original prompt: {e}");
            req.prompt.trim().to_string()
        }
    };

    let response = match state
        .http
        .post(format!("{base}/images/generations"))
        .bearer_auth(key)
        .json(&serde_json::json!({
            "model": image.model,
            "prompt": prompt,
            "size": image.size,
            "n": 1,
            "response_format": "b64_json",
        }))
        .send()
        .await
    {
        Ok(r) => r,
        Err(e) => return error(StatusCode::BAD_GATEWAY, format!("image request failed: {e}")),
    };
    if !response.status().is_success() {
        return relay_failure(response).await;
    }

    let body: serde_json::Value = match response.json().await {
        Ok(b) => b,
        Err(e) => return error(StatusCode::BAD_GATEWAY, format!("malformed image body: {e}")),
    };
    match body["data"][0]["b64_json"].as_str() {
        Some(b64) => {
            info!(chars = b64.len(), "image generated");
            Json(serde_json::json!({ "image": b64, "prompt": prompt })).into_response()
        }
        None => error(StatusCode::BAD_GATEWAY, "image response carried no data"),
    }
}

async fn enhance_prompt(
    state: &AppState,
    base: &str,
    key: &str,
    prompt: &str,
) -> anyhow::Result<String> {
    let response = state
        .http
        .post(format!("{base}/chat/completions"))
        .bearer_auth(key)
        .json(&serde_json::json!({
            "model": state.config.image.enhance_model,
            "messages": [
                {
                    "role": "system",
                    "content": "Rewrite the user's idea as one vivid, detailed image prompt. Reply with the prompt only.",
                },
                { "role": "user", "content": prompt },
            ],
            "max_tokens": 200,
        }))
        .send()
        .await?;
    if !response.status().is_success() {
        anyhow::bail!("enhancer returned {}", response.status());
    }
    let body: serde_json::Value = response.json().await?;
    body["choices"][0]["message"]["content"]
        .as_str()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .ok_or_else(|| anyhow::anyhow!("enhancer returned no content"))
}

#[derive(Deserialize)]
struct UploadReply {
    upload_url: String,
}

#[derive(Deserialize)]
struct TranscriptReply {
    id: String,
    status: String,
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

/// `POST /api/transcribe`: upload the multipart `audio` field, then poll
/// the transcription job until it completes or the attempts run out.
pub async fn transcribe(State(state): State<Arc<AppState>>, mut multipart: Multipart) -> Response {
    let config = &state.config.transcription;
    let Some(key) = config.api_key.as_deref().filter(|k| !k.trim().is_empty()) else {
        return config_error("transcription API key is not configured");
    };

    let mut audio = None;
    loop {
        match multipart.next_field().await {
            Ok(Some(field)) if field.name() == Some("audio") => match field.bytes().await {
                Ok(bytes) => {
                    audio = Some(bytes);
                    break;
                }
                Err(e) => return error(StatusCode::BAD_REQUEST, format!("unreadable audio: {e}")),
            },
            Ok(Some(_)) => {}
            Ok(None) => break,
            Err(e) => return error(StatusCode::BAD_REQUEST, format!("invalid multipart body: {e}")),
        }
    }
    let Some(audio) = audio.filter(|a| !a.is_empty()) else {
        return error(StatusCode::BAD_REQUEST, "missing audio field");
    };

    match run_transcription(&state, key, audio.to_vec()).await {
        Ok(text) => Json(serde_json::json!({ "text": text })).into_response(),
        Err(e) => {
            warn!("transcription failed: {e}");
            error(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
        }
    }
}

async fn run_transcription(state: &AppState, key: &str, audio: Vec<u8>) -> anyhow::Result<String> {
    let config = &state.config.transcription;
    let base = config.base_url.trim_end_matches('/');

    let upload: UploadReply = state
        .http
        .post(format!("{base}/upload"))
        .header("authorization", key)
        .body(audio)
        .send()
        .await?
        .error_for_status()?
        .json()
        .await?;

    let mut job: TranscriptReply = state
        .http
        .post(format!("{base}/transcript"))
        .header("authorization", key)
        .json(&serde_json::json!({ "audio_url": upload.upload_url }))
        .send()
        .await?
        .error_for_status()?
        .json()
        .await?;

    let interval = Duration::from_millis(config.poll_interval_ms);
    for attempt in 1..=config.poll_attempts {
        match job.status.as_str() {
            "completed" => return Ok(job.text.unwrap_or_default()),
            "error" => anyhow::bail!(
                "transcription job failed: {}",
                job.error.as_deref().unwrap_or("unknown error")
            ),
            _ => {}
        }
        tokio::time::sleep(interval).await;
        job = state
            .http
            .get(format!("{base}/transcript/{}", job.id))
            .header("authorization", key)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        tracing::debug!(attempt, status = %job.status, "transcription poll");
    }

    if job.status == "completed" {
        return Ok(job.text.unwrap_or_default());
    }
    anyhow::bail!(
        "transcription did not complete after {} attempts",
        config.poll_attempts
    )
}
