use async_trait::async_trait;
use rand::Rng;
use rand::seq::IndexedRandom;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::memory::ContextAssembler;
use crate::types::{AiFriend, MODE_NORMAL, ProfileFields, RouteSource, RoutingDecision, Turn};

/// `webContent` attached to a fail-open decision.
pub const WEB_CONTENT_PLACEHOLDER: &str = "No web content available.";

/// Most friends picked when routing fails open.
const MAX_FALLBACK_RESPONDENTS: usize = 3;

/// Payload sent to the classification endpoint. Profiles only, never history
/// beyond the bounded context lines.
#[derive(Debug, Clone, Serialize)]
pub struct RouteRequest {
    pub message: String,
    #[serde(rename = "routerData")]
    pub router_data: RouterData,
    #[serde(rename = "lastConversations")]
    pub last_conversations: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RouterData {
    pub user: ProfileFields,
    #[serde(rename = "activeFriends")]
    pub active_friends: Vec<ProfileFields>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RouteReply {
    pub friends: Vec<String>,
    #[serde(default = "default_mode")]
    pub mode: String,
    #[serde(default, rename = "webContent")]
    pub web_content: Option<String>,
}

fn default_mode() -> String {
    MODE_NORMAL.into()
}

/// Decides which friends should answer a message.
#[async_trait]
pub trait RespondentClassifier: Send + Sync {
    async fn classify(&self, request: &RouteRequest) -> anyhow::Result<RouteReply>;
}

/// Classifier behind an HTTP endpoint.
pub struct HttpClassifier {
    client: Client,
    endpoint: String,
}

impl HttpClassifier {
    pub fn new(endpoint: impl Into<String>, timeout: Duration) -> Self {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_default();
        Self {
            client,
            endpoint: endpoint.into(),
        }
    }
}

#[async_trait]
impl RespondentClassifier for HttpClassifier {
    async fn classify(&self, request: &RouteRequest) -> anyhow::Result<RouteReply> {
        let response = self.client.post(&self.endpoint).json(request).send().await?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            anyhow::bail!("router returned {status}: {text}");
        }

        let reply: RouteReply = response
            .json()
            .await
            .map_err(|e| anyhow::anyhow!("malformed router reply: {e}"))?;
        Ok(reply)
    }
}

/// Stand-in when no classification endpoint is configured; every route
/// takes the random fallback.
pub struct DisabledClassifier;

#[async_trait]
impl RespondentClassifier for DisabledClassifier {
    async fn classify(&self, _request: &RouteRequest) -> anyhow::Result<RouteReply> {
        anyhow::bail!("no router endpoint configured")
    }
}

/// Inputs for routing one user message.
pub struct RouteInput<'a> {
    pub message: &'a str,
    pub user: &'a ProfileFields,
    pub active: &'a [AiFriend],
    pub context: Vec<String>,
    pub user_id: &'a str,
    pub session_id: &'a str,
}

/// Selects respondents through the classifier, failing open to a random
/// subset of active friends so a conversation never stalls on it.
pub struct RespondentRouter {
    classifier: Arc<dyn RespondentClassifier>,
    assembler: Arc<ContextAssembler>,
    window: usize,
}

impl RespondentRouter {
    pub fn new(
        classifier: Arc<dyn RespondentClassifier>,
        assembler: Arc<ContextAssembler>,
        window: usize,
    ) -> Self {
        Self {
            classifier,
            assembler,
            window,
        }
    }

    pub async fn route(&self, input: RouteInput<'_>) -> RoutingDecision {
        let context = self
            .assembler
            .supplement(input.user_id, input.session_id, input.context, self.window)
            .await;

        let request = build_request(input.message, input.user, input.active, context);

        match self.classifier.classify(&request).await {
            Ok(reply) => {
                let turns = resolve_turns(&reply.friends, input.active);
                if turns.is_empty() {
                    warn!(
                        chosen = ?reply.friends,
                        "router chose no active friend, falling back to random selection"
                    );
                    return fallback_decision(input.active);
                }
                info!(turns = turns.len(), mode = %reply.mode, "router selected respondents");
                RoutingDecision {
                    turns,
                    mode: reply.mode,
                    web_content: reply.web_content,
                    source: RouteSource::Classifier,
                }
            }
            Err(e) => {
                warn!("router classification failed, falling back to random selection: {e}");
                fallback_decision(input.active)
            }
        }
    }
}

/// Concatenate context and the new message into one prompt.
pub fn build_request(
    message: &str,
    user: &ProfileFields,
    active: &[AiFriend],
    context: Vec<String>,
) -> RouteRequest {
    let latest = format!("{}: {message}", user.name);
    let mut lines = context.clone();
    if lines.last() != Some(&latest) {
        lines.push(latest);
    }

    RouteRequest {
        message: lines.join("\n"),
        router_data: RouterData {
            user: user.clone(),
            active_friends: active.iter().map(AiFriend::profile).collect(),
        },
        last_conversations: context,
    }
}

/// Map chosen names onto active friends, keeping order and repeats.
/// Exact matches win; otherwise a trimmed, case-insensitive match is used.
fn resolve_turns(names: &[String], active: &[AiFriend]) -> Vec<Turn> {
    names
        .iter()
        .filter_map(|name| {
            let found = active.iter().find(|f| f.name == *name).or_else(|| {
                let wanted = name.trim().to_lowercase();
                active
                    .iter()
                    .find(|f| f.name.trim().to_lowercase() == wanted)
            });
            if found.is_none() {
                debug!(name = %name, "router named an unknown friend");
            }
            found.map(|f| Turn {
                friend_id: f.id.clone(),
                name: f.name.clone(),
            })
        })
        .collect()
}

/// Random 1–3 distinct active friends in normal mode.
pub fn fallback_decision(active: &[AiFriend]) -> RoutingDecision {
    let mut rng = rand::rng();
    let turns = if active.is_empty() {
        Vec::new()
    } else {
        let count = rng.random_range(1..=active.len().min(MAX_FALLBACK_RESPONDENTS));
        active
            .choose_multiple(&mut rng, count)
            .map(|f| Turn {
                friend_id: f.id.clone(),
                name: f.name.clone(),
            })
            .collect()
    };

    RoutingDecision {
        turns,
        mode: MODE_NORMAL.into(),
        web_content: Some(WEB_CONTENT_PLACEHOLDER.into()),
        source: RouteSource::Fallback,
    }
}
