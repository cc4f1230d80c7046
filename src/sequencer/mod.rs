use chrono::Utc;
use rand::Rng;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::config::PacingConfig;
use crate::memory::short_term::ShortTermMemory;
use crate::store::Store;
use crate::types::{AiFriend, ChatEvent, NewHistoryEntry};

/// Split a reply into sentences on `.`, `!` or `?` followed by whitespace.
///
/// Punctuation stays with its sentence; runs like `?!` end one sentence.
/// Text without a terminator is a single sentence.
pub fn split_sentences(text: &str) -> Vec<String> {
    let mut sentences = Vec::new();
    let mut start = 0;
    let mut chars = text.char_indices().peekable();

    while let Some((i, c)) = chars.next() {
        if !matches!(c, '.' | '!' | '?') {
            continue;
        }
        if let Some(&(_, next)) = chars.peek() {
            if next.is_whitespace() {
                let end = i + c.len_utf8();
                push_trimmed(&mut sentences, &text[start..end]);
                start = end;
            }
        }
    }
    push_trimmed(&mut sentences, &text[start..]);
    sentences
}

fn push_trimmed(out: &mut Vec<String>, piece: &str) {
    let piece = piece.trim();
    if !piece.is_empty() {
        out.push(piece.to_string());
    }
}

/// Uniform typing delay between `min` and `max`.
#[derive(Debug, Clone, Copy)]
pub struct Pacing {
    min: Duration,
    max: Duration,
}

impl Pacing {
    pub fn new(min: Duration, max: Duration) -> Self {
        Self { min, max }
    }

    /// No delay at all.
    pub fn none() -> Self {
        Self::new(Duration::ZERO, Duration::ZERO)
    }

    pub fn from_config(config: &PacingConfig) -> Self {
        Self::new(
            Duration::from_millis(config.min_delay_ms),
            Duration::from_millis(config.max_delay_ms),
        )
    }

    pub fn delay(&self) -> Duration {
        if self.max <= self.min {
            return self.min;
        }
        let min = self.min.as_millis() as u64;
        let max = self.max.as_millis() as u64;
        Duration::from_millis(rand::rng().random_range(min..=max))
    }
}

/// One full reply to play back.
pub struct Reply<'a> {
    pub user_id: &'a str,
    pub session_id: &'a str,
    pub friend: &'a AiFriend,
    pub text: &'a str,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlayOutcome {
    Completed { emitted: usize, persisted: usize },
    /// Cancelled before every sentence went out; nothing after `emitted`
    /// was shown or stored.
    Cancelled { emitted: usize },
}

impl PlayOutcome {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, PlayOutcome::Cancelled { .. })
    }
}

/// Plays a reply back sentence by sentence with typing delays.
///
/// Each sentence is emitted, stored as its own history row and appended to
/// the short-term window before the next delay starts. Storage failures are
/// logged and skipped.
pub struct ReplySequencer {
    store: Arc<dyn Store>,
    short_term: Arc<ShortTermMemory>,
    pacing: Pacing,
}

impl ReplySequencer {
    pub fn new(store: Arc<dyn Store>, short_term: Arc<ShortTermMemory>, pacing: Pacing) -> Self {
        Self {
            store,
            short_term,
            pacing,
        }
    }

    pub async fn play(
        &self,
        reply: Reply<'_>,
        events: &mpsc::Sender<ChatEvent>,
        cancel: &CancellationToken,
    ) -> PlayOutcome {
        let sentences = split_sentences(reply.text);
        let mut emitted = 0;
        let mut persisted = 0;

        for sentence in sentences {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    debug!(friend = %reply.friend.name, emitted, "reply playback cancelled");
                    return PlayOutcome::Cancelled { emitted };
                }
                _ = tokio::time::sleep(self.pacing.delay()) => {}
            }

            let event = ChatEvent::Sentence {
                friend_id: reply.friend.id.clone(),
                sender: reply.friend.name.clone(),
                text: sentence.clone(),
                created_at: Utc::now(),
            };
            if events.send(event).await.is_err() {
                debug!("event receiver dropped, sentence not delivered");
            }
            emitted += 1;

            let row = NewHistoryEntry {
                user_id: reply.user_id.to_string(),
                ai_friend_id: Some(reply.friend.id.clone()),
                conversation_id: reply.session_id.to_string(),
                sender: reply.friend.name.clone(),
                message: sentence.clone(),
            };
            match self.store.append_history(row).await {
                Ok(_) => persisted += 1,
                Err(e) => warn!(
                    friend = %reply.friend.name,
                    session_id = reply.session_id,
                    "failed to persist sentence: {e}"
                ),
            }

            self.short_term.append_message(
                reply.user_id,
                reply.session_id,
                &reply.friend.name,
                &sentence,
            );
        }

        PlayOutcome::Completed { emitted, persisted }
    }
}
