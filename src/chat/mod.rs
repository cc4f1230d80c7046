pub mod friends;
pub mod sessions;

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::agent::descriptions::SessionDescriptions;
use crate::agent::providers::{ProviderChain, chain_from_config};
use crate::agent::{GenerateRequest, ResponseGenerator};
use crate::cache::LocalCache;
use crate::config::{CompanionConfig, ContextConfig, MemoryConfig};
use crate::error::ChatError;
use crate::memory::ContextAssembler;
use crate::memory::daily::{ConversationAbsorber, DailyMemory, MemoryAbsorber, TriggerOutcome};
use crate::memory::short_term::ShortTermMemory;
use crate::memory::summary::{DisabledSummarizer, HttpSummarizer, PersonaSummarizer, PersonaSummaryCache};
use crate::router::{DisabledClassifier, HttpClassifier, RespondentClassifier, RespondentRouter, RouteInput};
use crate::sequencer::{Pacing, PlayOutcome, Reply, ReplySequencer};
use crate::store::{MemoryStore, RestStore, Store};
use crate::types::{AiFriend, ChatEvent, NameDecryptor, NewHistoryEntry, NoDecryption};
use friends::FriendService;
use sessions::SessionService;

/// One user message to send into a session.
pub struct SendRequest<'a> {
    pub user_id: &'a str,
    pub session_id: &'a str,
    pub message: &'a str,
}

/// What a completed or cancelled send did.
#[derive(Debug, Clone)]
pub struct SendSummary {
    pub respondents: Vec<String>,
    pub turns_played: usize,
    pub cancelled: bool,
    pub daily: Option<TriggerOutcome>,
}

/// The message-send pipeline plus the services that mutate what it reads.
///
/// A send persists the user's message, routes it, and lets each chosen
/// friend answer in turn. It aborts on a missing user, no active friends,
/// a session the user does not own, or a failure to store the user's own
/// message. Every other dependency degrades to a fallback.
pub struct CompanionChat {
    store: Arc<dyn Store>,
    cache: Arc<LocalCache>,
    decryptor: Arc<dyn NameDecryptor>,
    short_term: Arc<ShortTermMemory>,
    router: RespondentRouter,
    summaries: Arc<PersonaSummaryCache>,
    generator: ResponseGenerator,
    sequencer: ReplySequencer,
    daily: DailyMemory,
    friends: FriendService,
    sessions: SessionService,
    routing_window: usize,
}

async fn emit(events: &mpsc::Sender<ChatEvent>, event: ChatEvent) {
    if events.send(event).await.is_err() {
        debug!("event receiver dropped");
    }
}

impl CompanionChat {
    pub fn builder(store: Arc<dyn Store>) -> ChatBuilder {
        ChatBuilder::new(store)
    }

    /// Wire the pipeline from configuration.
    pub fn from_config(config: &CompanionConfig) -> anyhow::Result<Self> {
        let store: Arc<dyn Store> = match config.store.kind.as_str() {
            "rest" => {
                let url = config
                    .store
                    .url
                    .as_deref()
                    .ok_or_else(|| anyhow::anyhow!("store.url is required for the rest store"))?;
                let key = config.store.api_key.as_deref().unwrap_or_default();
                Arc::new(RestStore::new(url, key))
            }
            _ => Arc::new(MemoryStore::new()),
        };

        let classifier: Arc<dyn RespondentClassifier> = match &config.router.endpoint {
            Some(endpoint) => Arc::new(HttpClassifier::new(endpoint, config.router.timeout())),
            None => Arc::new(DisabledClassifier),
        };
        let summarizer: Arc<dyn PersonaSummarizer> = match &config.summary.endpoint {
            Some(endpoint) => Arc::new(HttpSummarizer::new(endpoint, config.summary.timeout())),
            None => Arc::new(DisabledSummarizer),
        };

        info!(store = %config.store.kind, "chat pipeline configured");
        Ok(ChatBuilder::new(store)
            .classifier(classifier)
            .summarizer(summarizer)
            .providers(chain_from_config(&config.providers))
            .pacing(Pacing::from_config(&config.pacing))
            .context(config.context.clone())
            .memory(config.memory.clone())
            .max_active(config.friends.max_active)
            .build())
    }

    pub fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }

    pub fn cache(&self) -> &Arc<LocalCache> {
        &self.cache
    }

    pub fn short_term(&self) -> &Arc<ShortTermMemory> {
        &self.short_term
    }

    pub fn summaries(&self) -> &Arc<PersonaSummaryCache> {
        &self.summaries
    }

    pub fn descriptions(&self) -> &Arc<SessionDescriptions> {
        self.generator.descriptions()
    }

    pub fn friends(&self) -> &FriendService {
        &self.friends
    }

    pub fn sessions(&self) -> &SessionService {
        &self.sessions
    }

    /// Run one send. Events stream to `events`; cancelling `cancel` stops
    /// the remaining turns and sentences.
    pub async fn send(
        &self,
        req: SendRequest<'_>,
        events: &mpsc::Sender<ChatEvent>,
        cancel: &CancellationToken,
    ) -> Result<SendSummary, ChatError> {
        let message = req.message.trim();
        if message.is_empty() {
            return Err(ChatError::validation("message", "cannot be empty"));
        }

        let user = self
            .store
            .user(req.user_id)
            .await?
            .ok_or_else(|| ChatError::NoUser(req.user_id.to_string()))?;
        let active: Vec<AiFriend> = self
            .store
            .friends(req.user_id)
            .await?
            .into_iter()
            .filter(AiFriend::is_active)
            .collect();
        if active.is_empty() {
            return Err(ChatError::NoActiveFriends);
        }
        if self.store.session(req.user_id, req.session_id).await?.is_none() {
            return Err(ChatError::not_found("session", req.session_id));
        }

        let display_name = user.display_name(self.decryptor.as_ref());
        let profile = user.profile(&display_name);

        self.store
            .append_history(NewHistoryEntry {
                user_id: req.user_id.to_string(),
                ai_friend_id: None,
                conversation_id: req.session_id.to_string(),
                sender: display_name.clone(),
                message: message.to_string(),
            })
            .await?;
        self.short_term
            .append_message(req.user_id, req.session_id, &display_name, message);

        emit(events, ChatEvent::Typing(true)).await;

        let decision = self
            .router
            .route(RouteInput {
                message,
                user: &profile,
                active: &active,
                context: self
                    .short_term
                    .recent(req.user_id, req.session_id, self.routing_window),
                user_id: req.user_id,
                session_id: req.session_id,
            })
            .await;
        emit(
            events,
            ChatEvent::Routing {
                respondents: decision.respondents(),
                mode: decision.mode.clone(),
                degraded: decision.is_degraded(),
            },
        )
        .await;

        let friends_summary = self.summaries.summarize(&active).await;

        let mut turns_played = 0;
        let mut cancelled = false;
        for turn in &decision.turns {
            if cancel.is_cancelled() {
                cancelled = true;
                break;
            }
            let Some(friend) = active.iter().find(|f| f.id == turn.friend_id) else {
                warn!(friend_id = %turn.friend_id, "routed friend is no longer active, skipping turn");
                continue;
            };

            let request = GenerateRequest {
                message,
                user: &profile,
                friend,
                friends_summary: &friends_summary,
                user_id: req.user_id,
                session_id: req.session_id,
                context: self.short_term.all(req.user_id, req.session_id),
                web_content: decision.web_context(),
            };
            let completion = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    cancelled = true;
                    break;
                }
                completion = self.generator.generate(request) => completion,
            };

            emit(
                events,
                ChatEvent::TurnStarted {
                    friend_id: friend.id.clone(),
                    sender: friend.name.clone(),
                    degraded: completion.is_fallback(),
                },
            )
            .await;

            let outcome = self
                .sequencer
                .play(
                    Reply {
                        user_id: req.user_id,
                        session_id: req.session_id,
                        friend,
                        text: &completion.text,
                    },
                    events,
                    cancel,
                )
                .await;
            if let PlayOutcome::Cancelled { .. } = outcome {
                cancelled = true;
                break;
            }
            turns_played += 1;
        }

        emit(events, ChatEvent::Typing(false)).await;
        if cancelled {
            info!(user_id = req.user_id, session_id = req.session_id, turns_played, "send cancelled");
            return Ok(SendSummary {
                respondents: decision.respondents(),
                turns_played,
                cancelled,
                daily: None,
            });
        }
        emit(events, ChatEvent::Done).await;

        let daily = if turns_played > 0 {
            Some(self.daily.maybe_run(req.user_id).await)
        } else {
            None
        };

        info!(
            user_id = req.user_id,
            session_id = req.session_id,
            turns_played,
            "send complete"
        );
        Ok(SendSummary {
            respondents: decision.respondents(),
            turns_played,
            cancelled,
            daily,
        })
    }
}

/// Assembles a [`CompanionChat`]. Unset collaborators default to the
/// offline fallbacks: no classifier, no summarizer, an empty provider chain.
pub struct ChatBuilder {
    store: Arc<dyn Store>,
    cache: Arc<LocalCache>,
    classifier: Arc<dyn RespondentClassifier>,
    summarizer: Arc<dyn PersonaSummarizer>,
    providers: ProviderChain,
    absorber: Option<Arc<dyn MemoryAbsorber>>,
    decryptor: Arc<dyn NameDecryptor>,
    pacing: Pacing,
    context: ContextConfig,
    memory: MemoryConfig,
    max_active: usize,
}

impl ChatBuilder {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self {
            store,
            cache: Arc::new(LocalCache::new()),
            classifier: Arc::new(DisabledClassifier),
            summarizer: Arc::new(DisabledSummarizer),
            providers: ProviderChain::new(Vec::new()),
            absorber: None,
            decryptor: Arc::new(NoDecryption),
            pacing: Pacing::from_config(&crate::config::PacingConfig::default()),
            context: ContextConfig::default(),
            memory: MemoryConfig::default(),
            max_active: crate::config::FriendsConfig::default().max_active,
        }
    }

    pub fn cache(mut self, cache: Arc<LocalCache>) -> Self {
        self.cache = cache;
        self
    }

    pub fn classifier(mut self, classifier: Arc<dyn RespondentClassifier>) -> Self {
        self.classifier = classifier;
        self
    }

    pub fn summarizer(mut self, summarizer: Arc<dyn PersonaSummarizer>) -> Self {
        self.summarizer = summarizer;
        self
    }

    pub fn providers(mut self, providers: ProviderChain) -> Self {
        self.providers = providers;
        self
    }

    /// Defaults to a [`ConversationAbsorber`] over the provider chain.
    pub fn absorber(mut self, absorber: Arc<dyn MemoryAbsorber>) -> Self {
        self.absorber = Some(absorber);
        self
    }

    pub fn decryptor(mut self, decryptor: Arc<dyn NameDecryptor>) -> Self {
        self.decryptor = decryptor;
        self
    }

    pub fn pacing(mut self, pacing: Pacing) -> Self {
        self.pacing = pacing;
        self
    }

    pub fn context(mut self, context: ContextConfig) -> Self {
        self.context = context;
        self
    }

    pub fn memory(mut self, memory: MemoryConfig) -> Self {
        self.memory = memory;
        self
    }

    pub fn max_active(mut self, max_active: usize) -> Self {
        self.max_active = max_active;
        self
    }

    pub fn build(self) -> CompanionChat {
        let short_term = Arc::new(ShortTermMemory::new(self.context.short_term_capacity));
        let assembler = Arc::new(ContextAssembler::new(
            Arc::clone(&short_term),
            Arc::clone(&self.store),
        ));
        let summaries = Arc::new(PersonaSummaryCache::new(
            Arc::clone(&self.cache),
            self.summarizer,
        ));
        let descriptions = Arc::new(SessionDescriptions::new(
            Arc::clone(&self.cache),
            Arc::clone(&self.store),
        ));
        let absorber = self.absorber.unwrap_or_else(|| {
            Arc::new(ConversationAbsorber::new(
                Arc::clone(&self.store),
                self.providers.clone(),
            ))
        });

        CompanionChat {
            router: RespondentRouter::new(
                self.classifier,
                Arc::clone(&assembler),
                self.context.routing_window,
            ),
            generator: ResponseGenerator::new(
                self.providers,
                assembler,
                Arc::clone(&descriptions),
                self.context.generation_window,
            ),
            sequencer: ReplySequencer::new(
                Arc::clone(&self.store),
                Arc::clone(&short_term),
                self.pacing,
            ),
            daily: DailyMemory::new(
                Arc::clone(&self.cache),
                Arc::clone(&self.store),
                absorber,
                Duration::from_secs(self.memory.local_flag_ttl_secs),
            )
            .with_enabled(self.memory.daily_enabled),
            friends: FriendService::new(
                Arc::clone(&self.store),
                Arc::clone(&summaries),
                Arc::clone(&short_term),
                self.max_active,
            ),
            sessions: SessionService::new(
                Arc::clone(&self.store),
                descriptions,
                Arc::clone(&short_term),
            ),
            routing_window: self.context.routing_window,
            summaries,
            short_term,
            decryptor: self.decryptor,
            cache: self.cache,
            store: self.store,
        }
    }
}
