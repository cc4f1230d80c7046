use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::config::{ProviderConfig, ProvidersConfig};
use crate::error::ProviderFailure;

/// Reply used when no provider in the chain produced a completion.
pub const BUSY_REPLY: &str = "Sorry, I'm a little busy right now. Let's pick this up in a bit!";

/// One chat message in OpenAI wire format.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".into(),
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".into(),
            content: content.into(),
        }
    }
}

/// Provider-independent completion request. Unset knobs fall back to the
/// provider's configured defaults.
#[derive(Debug, Clone, Default)]
pub struct CompletionRequest {
    pub messages: Vec<ChatMessage>,
    pub max_tokens: Option<u32>,
    pub temperature: Option<f32>,
}

impl CompletionRequest {
    pub fn new(messages: Vec<ChatMessage>) -> Self {
        Self {
            messages,
            ..Self::default()
        }
    }
}

/// Result of one provider attempt.
pub type ProviderOutcome = Result<String, ProviderFailure>;

/// Trait for completion provider implementations.
#[async_trait]
pub trait CompletionProvider: Send + Sync {
    fn name(&self) -> &str;
    async fn complete(&self, request: &CompletionRequest) -> ProviderOutcome;
}

/// Vision-capable chat provider. Not wired to a backend yet: it always
/// reports busy so the chain moves on.
pub struct VisionProvider;

#[async_trait]
impl CompletionProvider for VisionProvider {
    fn name(&self) -> &str {
        "vision"
    }

    async fn complete(&self, _request: &CompletionRequest) -> ProviderOutcome {
        Err(ProviderFailure::Busy)
    }
}

/// Any endpoint speaking OpenAI chat-completions: the same-origin proxy
/// route or the upstream API itself.
pub struct OpenAiCompatibleProvider {
    name: String,
    client: Client,
    endpoint: String,
    api_key: Option<String>,
    key_required: bool,
    model: String,
    max_tokens: u32,
    temperature: f32,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    max_tokens: u32,
    temperature: f32,
}

#[derive(Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

impl OpenAiCompatibleProvider {
    pub fn new(name: &str, config: &ProviderConfig, key_required: bool) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .unwrap_or_default();
        Self {
            name: name.to_string(),
            client,
            endpoint: format!("{}/chat/completions", config.base_url.trim_end_matches('/')),
            api_key: config.api_key.clone().filter(|k| !k.trim().is_empty()),
            key_required,
            model: config.model.clone(),
            max_tokens: config.max_tokens,
            temperature: config.temperature,
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl CompletionProvider for OpenAiCompatibleProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn complete(&self, request: &CompletionRequest) -> ProviderOutcome {
        if self.key_required && self.api_key.is_none() {
            return Err(ProviderFailure::MissingCredentials);
        }

        let body = ChatRequest {
            model: &self.model,
            messages: &request.messages,
            max_tokens: request.max_tokens.unwrap_or(self.max_tokens),
            temperature: request.temperature.unwrap_or(self.temperature),
        };

        let mut builder = self.client.post(&self.endpoint).json(&body);
        if let Some(key) = &self.api_key {
            builder = builder.header("Authorization", format!("Bearer {key}"));
        }

        let response = builder
            .send()
            .await
            .map_err(|e| ProviderFailure::Transport(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(ProviderFailure::Status { status, body });
        }

        let parsed: ChatResponse = response
            .json()
            .await
            .map_err(|e| ProviderFailure::Malformed(e.to_string()))?;

        let text = parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .map(|c| c.trim().to_string())
            .unwrap_or_default();

        if text.is_empty() {
            return Err(ProviderFailure::Empty);
        }
        debug!(provider = %self.name, chars = text.len(), "completion received");
        Ok(text)
    }
}

/// A completion that came out of the chain. `provider` is `None` when
/// every provider failed and the text is [`BUSY_REPLY`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Completion {
    pub text: String,
    pub provider: Option<String>,
}

impl Completion {
    pub fn is_fallback(&self) -> bool {
        self.provider.is_none()
    }
}

/// Ordered provider fallback chain. The first successful attempt wins.
#[derive(Clone)]
pub struct ProviderChain {
    providers: Vec<Arc<dyn CompletionProvider>>,
}

impl ProviderChain {
    pub fn new(providers: Vec<Arc<dyn CompletionProvider>>) -> Self {
        Self { providers }
    }

    pub fn len(&self) -> usize {
        self.providers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }

    /// Try every provider in order. On total failure returns every
    /// provider's failure, in order.
    pub async fn try_complete(
        &self,
        request: &CompletionRequest,
    ) -> Result<(String, String), Vec<(String, ProviderFailure)>> {
        let mut failures = Vec::with_capacity(self.providers.len());
        for provider in &self.providers {
            match provider.complete(request).await {
                Ok(text) => return Ok((provider.name().to_string(), text)),
                Err(failure) => {
                    warn!(provider = provider.name(), %failure, "provider attempt failed");
                    failures.push((provider.name().to_string(), failure));
                }
            }
        }
        Err(failures)
    }

    /// Like [`ProviderChain::try_complete`], degrading to [`BUSY_REPLY`].
    pub async fn complete(&self, request: &CompletionRequest) -> Completion {
        match self.try_complete(request).await {
            Ok((provider, text)) => Completion {
                text,
                provider: Some(provider),
            },
            Err(_) => {
                warn!(attempts = self.providers.len(), "no provider responded, using busy reply");
                Completion {
                    text: BUSY_REPLY.to_string(),
                    provider: None,
                }
            }
        }
    }
}

/// Build the vision → proxy → direct chain from config, skipping disabled entries.
pub fn chain_from_config(config: &ProvidersConfig) -> ProviderChain {
    let mut providers: Vec<Arc<dyn CompletionProvider>> = Vec::new();
    if config.vision.enabled {
        providers.push(Arc::new(VisionProvider));
    }
    if config.proxy.enabled {
        providers.push(Arc::new(OpenAiCompatibleProvider::new(
            "proxy",
            &config.proxy,
            false,
        )));
    }
    if config.direct.enabled {
        providers.push(Arc::new(OpenAiCompatibleProvider::new(
            "direct",
            &config.direct,
            true,
        )));
    }
    info!(providers = providers.len(), "completion chain configured");
    ProviderChain::new(providers)
}
