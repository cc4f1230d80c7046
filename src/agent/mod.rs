pub mod descriptions;
pub mod prompt;
pub mod providers;

use std::sync::Arc;
use tracing::info;

use crate::memory::ContextAssembler;
use crate::types::{AiFriend, ProfileFields};
use descriptions::SessionDescriptions;
use prompt::PromptContext;
use providers::{ChatMessage, Completion, CompletionRequest, ProviderChain};

/// Inputs for one friend's reply.
pub struct GenerateRequest<'a> {
    pub message: &'a str,
    pub user: &'a ProfileFields,
    pub friend: &'a AiFriend,
    pub friends_summary: &'a str,
    pub user_id: &'a str,
    pub session_id: &'a str,
    pub context: Vec<String>,
    pub web_content: Option<&'a str>,
}

/// Produces one full reply for a responding friend.
///
/// Resolves the session's mode, tops up context from durable history,
/// builds the mode-specific system prompt and walks the provider chain.
pub struct ResponseGenerator {
    providers: ProviderChain,
    assembler: Arc<ContextAssembler>,
    descriptions: Arc<SessionDescriptions>,
    window: usize,
}

impl ResponseGenerator {
    pub fn new(
        providers: ProviderChain,
        assembler: Arc<ContextAssembler>,
        descriptions: Arc<SessionDescriptions>,
        window: usize,
    ) -> Self {
        Self {
            providers,
            assembler,
            descriptions,
            window,
        }
    }

    pub fn descriptions(&self) -> &Arc<SessionDescriptions> {
        &self.descriptions
    }

    /// Build the completion request without sending it.
    pub async fn build_request(&self, req: &GenerateRequest<'_>) -> CompletionRequest {
        let description = self.descriptions.resolve(req.user_id, req.session_id).await;
        let context = self
            .assembler
            .supplement(req.user_id, req.session_id, req.context.clone(), self.window)
            .await;

        let system = prompt::system_prompt(&PromptContext {
            friend: req.friend,
            user: req.user,
            friends_summary: req.friends_summary,
            description: &description,
            context: &context,
            web_content: req.web_content,
        });

        CompletionRequest::new(vec![
            ChatMessage::system(system),
            ChatMessage::user(format!("{}: {}", req.user.name, req.message)),
        ])
    }

    pub async fn generate(&self, req: GenerateRequest<'_>) -> Completion {
        let request = self.build_request(&req).await;
        let completion = self.providers.complete(&request).await;
        info!(
            friend = %req.friend.name,
            provider = completion.provider.as_deref().unwrap_or("none"),
            "reply generated"
        );
        completion
    }
}
