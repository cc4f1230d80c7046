use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::cache::LocalCache;
use crate::types::{AiFriend, ProfileFields};

/// Returned without calling out when there are no active friends.
pub const NO_FRIENDS_SUMMARY: &str = "There are no active friends in this chat yet.";
/// Returned when the summarizer fails.
pub const SUMMARY_UNAVAILABLE: &str = "A summary of your friends is unavailable right now.";

const SUMMARY_KEY: &str = "friends_summary";
const SNAPSHOT_KEY: &str = "friends_summary_snapshot";

/// Produces a natural-language summary of a set of personas.
#[async_trait]
pub trait PersonaSummarizer: Send + Sync {
    async fn summarize(&self, friends: &[ProfileFields]) -> anyhow::Result<String>;
}

/// Summarizer behind an HTTP endpoint that answers with a plain-text body.
pub struct HttpSummarizer {
    client: Client,
    endpoint: String,
}

impl HttpSummarizer {
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
impl PersonaSummarizer for HttpSummarizer {
    async fn summarize(&self, friends: &[ProfileFields]) -> anyhow::Result<String> {
        let body = serde_json::json!({ "friendsData": { "friends": friends } });
        let response = self.client.post(&self.endpoint).json(&body).send().await?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            anyhow::bail!("summarizer returned {status}: {text}");
        }

        let text = response.text().await?;
        let text = text.trim();
        if text.is_empty() {
            anyhow::bail!("summarizer returned an empty body");
        }
        Ok(text.to_string())
    }
}

/// Stand-in when no summary endpoint is configured.
pub struct DisabledSummarizer;

#[async_trait]
impl PersonaSummarizer for DisabledSummarizer {
    async fn summarize(&self, _friends: &[ProfileFields]) -> anyhow::Result<String> {
        anyhow::bail!("no summary endpoint configured")
    }
}

#[derive(Serialize)]
struct SnapshotEntry<'a> {
    id: &'a str,
    status: bool,
    #[serde(flatten)]
    profile: ProfileFields,
}

/// Serialized view of the persona set, used to detect changes.
fn snapshot(friends: &[AiFriend]) -> String {
    let entries: Vec<SnapshotEntry<'_>> = friends
        .iter()
        .map(|f| SnapshotEntry {
            id: &f.id,
            status: f.status,
            profile: f.profile(),
        })
        .collect();
    serde_json::to_string(&entries).unwrap_or_default()
}

/// Caches one summary of the active persona set.
///
/// The cached text is reused only while the persona-set snapshot is
/// unchanged and every persona in it is active. Mutations of a persona
/// must call [`PersonaSummaryCache::invalidate`].
pub struct PersonaSummaryCache {
    cache: Arc<LocalCache>,
    summarizer: Arc<dyn PersonaSummarizer>,
}

impl PersonaSummaryCache {
    pub fn new(cache: Arc<LocalCache>, summarizer: Arc<dyn PersonaSummarizer>) -> Self {
        Self { cache, summarizer }
    }

    pub async fn summarize(&self, active: &[AiFriend]) -> String {
        if active.is_empty() {
            return NO_FRIENDS_SUMMARY.to_string();
        }

        let current = snapshot(active);
        if let (Some(cached), Some(previous)) =
            (self.cache.get(SUMMARY_KEY), self.cache.get(SNAPSHOT_KEY))
        {
            if previous == current && active.iter().all(AiFriend::is_active) {
                debug!(friends = active.len(), "friend summary cache hit");
                return cached;
            }
        }

        let profiles: Vec<ProfileFields> = active.iter().map(AiFriend::profile).collect();
        match self.summarizer.summarize(&profiles).await {
            Ok(summary) => {
                info!(friends = active.len(), "friend summary refreshed");
                self.cache.set(SUMMARY_KEY, summary.clone());
                self.cache.set(SNAPSHOT_KEY, current);
                summary
            }
            Err(e) => {
                warn!("friend summarizer failed: {e}");
                SUMMARY_UNAVAILABLE.to_string()
            }
        }
    }

    pub fn invalidate(&self) {
        self.cache.remove(SUMMARY_KEY);
        self.cache.remove(SNAPSHOT_KEY);
    }

    pub fn is_cached(&self) -> bool {
        self.cache.contains(SUMMARY_KEY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn friend(id: &str, status: bool) -> AiFriend {
        AiFriend {
            id: id.into(),
            user_id: "u1".into(),
            name: format!("friend-{id}"),
            persona: "cheerful".into(),
            about: String::new(),
            knowledge_base: String::new(),
            status,
            memory: Vec::new(),
            avatar_url: None,
        }
    }

    #[test]
    fn snapshot_ignores_memory_but_tracks_status() {
        let a = friend("1", true);
        let mut with_memory = a.clone();
        with_memory.memory.push(crate::types::MemoryEntry {
            role: "assistant".into(),
            content: "remembered".into(),
        });
        assert_eq!(snapshot(&[a.clone()]), snapshot(&[with_memory]));
        assert_ne!(snapshot(&[a]), snapshot(&[friend("1", false)]));
    }
}
