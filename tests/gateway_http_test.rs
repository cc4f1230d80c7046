use axum::body::Body;
use axum::http::{Request, StatusCode};
use companion::chat::CompanionChat;
use companion::config::CompanionConfig;
use companion::gateway::{AppState, app};
use companion::sequencer::Pacing;
use companion::store::MemoryStore;
use serde_json::json;
use std::sync::Arc;
use tokio::time::{Duration, sleep};
use tower::ServiceExt;
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn free_port() -> u16 {
    std::net::TcpListener::bind("127.0.0.1:0")
        .expect("bind ephemeral")
        .local_addr()
        .expect("local addr")
        .port()
}

fn loopback_config(port: u16) -> CompanionConfig {
    let mut config = CompanionConfig::default();
    config.gateway.bind = "127.0.0.1".to_string();
    config.gateway.port = port;
    config
}

async fn wait_for_health(port: u16) {
    let client = reqwest::Client::new();
    let url = format!("http://127.0.0.1:{port}/health");

    for _ in 0..80 {
        if let Ok(resp) = client.get(&url).send().await {
            if resp.status().is_success() {
                return;
            }
        }
        sleep(Duration::from_millis(50)).await;
    }

    panic!("gateway did not become healthy at {url}");
}

/// Serve the router for `config` on an ephemeral port and return its base URL.
async fn serve(config: CompanionConfig) -> String {
    let chat = CompanionChat::builder(Arc::new(MemoryStore::new()))
        .pacing(Pacing::none())
        .build();
    let state = Arc::new(AppState::new(config, Arc::new(chat), None));
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind ephemeral");
    let addr = listener.local_addr().expect("local addr");
    tokio::spawn(async move {
        let _ = axum::serve(listener, app(state)).await;
    });
    format!("http://{addr}")
}

#[tokio::test]
async fn run_rejects_non_loopback_without_token() {
    let mut config = CompanionConfig::default();
    config.gateway.bind = "0.0.0.0".to_string();
    config.gateway.port = free_port();

    let err = companion::gateway::run(config, None)
        .await
        .expect_err("non-loopback run without token must fail");
    assert!(err.to_string().contains("Auth token required"));
}

#[tokio::test]
async fn health_endpoint_returns_ok() {
    let port = free_port();
    let config = loopback_config(port);
    let gateway = tokio::spawn(async move {
        let _ = companion::gateway::run(config, None).await;
    });

    wait_for_health(port).await;

    let url = format!("http://127.0.0.1:{port}/health");
    let response = reqwest::get(url).await.expect("health response");
    assert_eq!(response.status(), reqwest::StatusCode::OK);
    let body = response.text().await.expect("health body");
    assert_eq!(body, "ok");

    gateway.abort();
    let _ = gateway.await;
}

#[tokio::test]
async fn router_serves_health_without_a_socket() {
    let chat = CompanionChat::builder(Arc::new(MemoryStore::new())).build();
    let state = Arc::new(AppState::new(CompanionConfig::default(), Arc::new(chat), None));

    let response = app(state)
        .oneshot(Request::get("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    assert_eq!(&body[..], b"ok");
}

#[tokio::test]
async fn proxy_without_configuration_is_a_server_error() {
    let base = serve(CompanionConfig::default()).await;
    let response = reqwest::Client::new()
        .post(format!("{base}/api/proxy/chat/completions"))
        .json(&json!({"messages": []}))
        .send()
        .await
        .expect("proxy response");

    assert_eq!(response.status(), reqwest::StatusCode::INTERNAL_SERVER_ERROR);
    let body: serde_json::Value = response.json().await.expect("json body");
    assert!(body["error"].as_str().unwrap().contains("not configured"));
}

#[tokio::test]
async fn proxy_forwards_with_server_key() {
    let upstream = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .and(header("Authorization", "Bearer sk-server"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "choices": [{ "message": { "content": "hi" } }]
        })))
        .expect(1)
        .mount(&upstream)
        .await;

    let mut config = CompanionConfig::default();
    config.proxy.upstream_base_url = Some(upstream.uri());
    config.proxy.api_key = Some("sk-server".into());
    let base = serve(config).await;

    let response = reqwest::Client::new()
        .post(format!("{base}/api/proxy/chat/completions"))
        .json(&json!({"model": "m", "messages": [{"role": "user", "content": "hey"}]}))
        .send()
        .await
        .expect("proxy response");

    assert_eq!(response.status(), reqwest::StatusCode::OK);
    let body: serde_json::Value = response.json().await.expect("json body");
    assert_eq!(body["choices"][0]["message"]["content"], "hi");
    upstream.verify().await;
}

#[tokio::test]
async fn proxy_relays_upstream_failure_status_and_body() {
    let upstream = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(429).set_body_json(json!({"message": "slow down"})))
        .mount(&upstream)
        .await;

    let mut config = CompanionConfig::default();
    config.proxy.upstream_base_url = Some(upstream.uri());
    config.proxy.api_key = Some("sk-server".into());
    let base = serve(config).await;

    let response = reqwest::Client::new()
        .post(format!("{base}/api/proxy/chat/completions"))
        .json(&json!({"messages": []}))
        .send()
        .await
        .expect("proxy response");

    assert_eq!(response.status(), reqwest::StatusCode::TOO_MANY_REQUESTS);
    let body: serde_json::Value = response.json().await.expect("json body");
    assert_eq!(body["error"]["message"], "slow down");
}

#[tokio::test]
async fn image_without_key_is_a_server_error() {
    let base = serve(CompanionConfig::default()).await;
    let response = reqwest::Client::new()
        .post(format!("{base}/api/images"))
        .json(&json!({"prompt": "a fox"}))
        .send()
        .await
        .expect("image response");
    assert_eq!(response.status(), reqwest::StatusCode::INTERNAL_SERVER_ERROR);
}

#[tokio::test]
async fn image_uses_enhanced_prompt() {
    let upstream = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "choices": [{ "message": { "content": "a red fox at dawn, watercolor" } }]
        })))
        .mount(&upstream)
        .await;
    Mock::given(method("POST"))
        .and(path("/images/generations"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": [{ "b64_json": "aGVsbG8=" }]
        })))
        .mount(&upstream)
        .await;

    let mut config = CompanionConfig::default();
    config.image.base_url = upstream.uri();
    config.image.api_key = Some("sk-image".into());
    let base = serve(config).await;

    let response = reqwest::Client::new()
        .post(format!("{base}/api/images"))
        .json(&json!({"prompt": "a fox"}))
        .send()
        .await
        .expect("image response");

    assert_eq!(response.status(), reqwest::StatusCode::OK);
    let body: serde_json::Value = response.json().await.expect("json body");
    assert_eq!(body["image"], "aGVsbG8=");
    assert_eq!(body["prompt"], "a red fox at dawn, watercolor");
}

#[tokio::test]
async fn empty_image_prompt_is_rejected() {
    let mut config = CompanionConfig::default();
    config.image.api_key = Some("sk-image".into());
    let base = serve(config).await;

    let response = reqwest::Client::new()
        .post(format!("{base}/api/images"))
        .json(&json!({"prompt": "  "}))
        .send()
        .await
        .expect("image response");
    assert_eq!(response.status(), reqwest::StatusCode::BAD_REQUEST);
}

const BOUNDARY: &str = "companion-test-boundary";

fn audio_form() -> Vec<u8> {
    format!(
        "--{BOUNDARY}\r\n\
         Content-Disposition: form-data; name=\"audio\"; filename=\"clip.webm\"\r\n\
         Content-Type: audio/webm\r\n\r\n\
         fake-audio-bytes\r\n\
         --{BOUNDARY}--\r\n"
    )
    .into_bytes()
}

#[tokio::test]
async fn transcription_polls_until_completed() {
    let upstream = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/upload"))
        .and(header("authorization", "tr-key"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({"upload_url": "https://cdn/clip"})),
        )
        .mount(&upstream)
        .await;
    Mock::given(method("POST"))
        .and(path("/transcript"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": "t1", "status": "queued"})))
        .mount(&upstream)
        .await;
    Mock::given(method("GET"))
        .and(path("/transcript/t1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": "t1",
            "status": "completed",
            "text": "hello there"
        })))
        .mount(&upstream)
        .await;

    let mut config = CompanionConfig::default();
    config.transcription.base_url = upstream.uri();
    config.transcription.api_key = Some("tr-key".into());
    config.transcription.poll_interval_ms = 10;
    let base = serve(config).await;

    let response = reqwest::Client::new()
        .post(format!("{base}/api/transcribe"))
        .header(
            "content-type",
            format!("multipart/form-data; boundary={BOUNDARY}"),
        )
        .body(audio_form())
        .send()
        .await
        .expect("transcribe response");

    assert_eq!(response.status(), reqwest::StatusCode::OK);
    let body: serde_json::Value = response.json().await.expect("json body");
    assert_eq!(body["text"], "hello there");
}

#[tokio::test]
async fn transcription_without_key_is_a_server_error() {
    let base = serve(CompanionConfig::default()).await;
    let response = reqwest::Client::new()
        .post(format!("{base}/api/transcribe"))
        .header(
            "content-type",
            format!("multipart/form-data; boundary={BOUNDARY}"),
        )
        .body(audio_form())
        .send()
        .await
        .expect("transcribe response");
    assert_eq!(response.status(), reqwest::StatusCode::INTERNAL_SERVER_ERROR);
}
