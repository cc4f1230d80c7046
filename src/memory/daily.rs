use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::future::join_all;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::agent::providers::{ChatMessage, CompletionRequest, ProviderChain};
use crate::cache::LocalCache;
use crate::store::Store;
use crate::types::{AiFriend, MemoryEntry};

/// Role tag on memory entries written by the daily pass.
pub const SUMMARY_ROLE: &str = "summary";

/// Oldest entries are dropped past this many memories per friend.
const MAX_MEMORY_ENTRIES: usize = 50;

/// Most transcript lines handed to one summary request.
const MAX_TRANSCRIPT_LINES: usize = 100;

/// Local flag key, one spelling everywhere.
pub fn flag_key(user_id: &str) -> String {
    format!("todays_summary:{user_id}")
}

/// Start of the current UTC day.
pub fn start_of_day(now: DateTime<Utc>) -> DateTime<Utc> {
    now.date_naive()
        .and_hms_opt(0, 0, 0)
        .map(|midnight| midnight.and_utc())
        .unwrap_or(now)
}

/// Side effect that folds a user's conversations into friend memories.
#[async_trait]
pub trait MemoryAbsorber: Send + Sync {
    async fn absorb(&self, user_id: &str) -> anyhow::Result<()>;
}

/// Lets each active friend summarize today's conversation into one
/// memory entry.
pub struct ConversationAbsorber {
    store: Arc<dyn Store>,
    providers: ProviderChain,
}

impl ConversationAbsorber {
    pub fn new(store: Arc<dyn Store>, providers: ProviderChain) -> Self {
        Self { store, providers }
    }

    async fn absorb_friend(&self, user_id: &str, friend: &AiFriend, transcript: &str) -> anyhow::Result<()> {
        let request = CompletionRequest::new(vec![
            ChatMessage::system(format!(
                "You are {}. Persona: {}. Summarize in one or two sentences, in the first \
                 person, what you want to remember from today's conversation.",
                friend.name, friend.persona
            )),
            ChatMessage::user(transcript.to_string()),
        ]);

        let (provider, summary) = self.providers.try_complete(&request).await.map_err(|failures| {
            let reasons: Vec<String> = failures
                .iter()
                .map(|(name, failure)| format!("{name}: {failure}"))
                .collect();
            anyhow::anyhow!("no provider summarized for {}: {}", friend.name, reasons.join("; "))
        })?;

        let Some(mut current) = self.store.friend(user_id, &friend.id).await? else {
            debug!(friend_id = %friend.id, "friend removed before memory update");
            return Ok(());
        };
        current.memory.push(MemoryEntry {
            role: SUMMARY_ROLE.into(),
            content: summary,
        });
        let overflow = current.memory.len().saturating_sub(MAX_MEMORY_ENTRIES);
        current.memory.drain(..overflow);

        self.store.update_friend(user_id, &current).await?;
        debug!(friend = %friend.name, provider, "memory appended");
        Ok(())
    }
}

#[async_trait]
impl MemoryAbsorber for ConversationAbsorber {
    async fn absorb(&self, user_id: &str) -> anyhow::Result<()> {
        let rows = self
            .store
            .history_since(user_id, start_of_day(Utc::now()))
            .await?;
        if rows.is_empty() {
            debug!(user_id, "no conversation today, nothing to absorb");
            return Ok(());
        }

        let skip = rows.len().saturating_sub(MAX_TRANSCRIPT_LINES);
        let transcript: Vec<String> = rows.iter().skip(skip).map(|r| r.context_line()).collect();
        let transcript = transcript.join("\n");

        let active: Vec<AiFriend> = self
            .store
            .friends(user_id)
            .await?
            .into_iter()
            .filter(AiFriend::is_active)
            .collect();

        let results = join_all(
            active
                .iter()
                .map(|friend| self.absorb_friend(user_id, friend, &transcript)),
        )
        .await;

        let mut failed = 0usize;
        for (friend, result) in active.iter().zip(results) {
            if let Err(e) = result {
                warn!(friend = %friend.name, "daily memory update failed: {e}");
                failed += 1;
            }
        }

        if failed > 0 && failed == active.len() {
            anyhow::bail!("daily memory failed for all {failed} friends");
        }
        info!(user_id, friends = active.len(), failed, "daily memory absorbed");
        Ok(())
    }
}

/// What a trigger call did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerOutcome {
    Disabled,
    /// The local flag is still live.
    SkippedLocal,
    /// The durable flag says today's pass already ran.
    SkippedDurable,
    Ran,
    Failed,
}

/// Runs the memory pass at most once per day per user.
///
/// Checks the local TTL flag, then the user's durable flag; only when both
/// are clear does the absorber run, after which both flags are set.
pub struct DailyMemory {
    cache: Arc<LocalCache>,
    store: Arc<dyn Store>,
    absorber: Arc<dyn MemoryAbsorber>,
    ttl: Duration,
    enabled: bool,
}

impl DailyMemory {
    pub fn new(
        cache: Arc<LocalCache>,
        store: Arc<dyn Store>,
        absorber: Arc<dyn MemoryAbsorber>,
        ttl: Duration,
    ) -> Self {
        Self {
            cache,
            store,
            absorber,
            ttl,
            enabled: true,
        }
    }

    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    fn mark_local(&self, user_id: &str) {
        self.cache.set_with_ttl(&flag_key(user_id), "true", self.ttl);
    }

    /// The local flag doubles as the in-flight claim: whoever sets it first
    /// runs the pass, concurrent callers see it live and skip.
    pub async fn maybe_run(&self, user_id: &str) -> TriggerOutcome {
        if !self.enabled {
            return TriggerOutcome::Disabled;
        }
        let key = flag_key(user_id);
        if !self.cache.claim(&key, "true", self.ttl) {
            return TriggerOutcome::SkippedLocal;
        }

        match self.store.user(user_id).await {
            Ok(Some(user)) if user.todays_summary => {
                return TriggerOutcome::SkippedDurable;
            }
            Ok(Some(_)) => {}
            Ok(None) => {
                warn!(user_id, "daily memory skipped, user not found");
                self.cache.remove(&key);
                return TriggerOutcome::Failed;
            }
            Err(e) => {
                warn!(user_id, "daily memory skipped, failed to read flag: {e}");
                self.cache.remove(&key);
                return TriggerOutcome::Failed;
            }
        }

        match self.absorber.absorb(user_id).await {
            Ok(()) => {
                if let Err(e) = self.store.set_todays_summary(user_id, true).await {
                    warn!(user_id, "failed to set durable daily flag: {e}");
                }
                // Restart the TTL from completion.
                self.mark_local(user_id);
                info!(user_id, "daily memory pass complete");
                TriggerOutcome::Ran
            }
            Err(e) => {
                // Local flag only: retried after the TTL, not on every reply.
                warn!(user_id, "daily memory pass failed: {e}");
                TriggerOutcome::Failed
            }
        }
    }
}
