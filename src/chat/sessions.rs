use serde::Deserialize;
use std::sync::Arc;
use tracing::info;

use crate::agent::descriptions::SessionDescriptions;
use crate::error::ChatError;
use crate::memory::short_term::ShortTermMemory;
use crate::store::Store;
use crate::types::{HistoryEntry, Session, SessionDescription};

/// A session as submitted by the user. The description's variant decides
/// the session type.
#[derive(Debug, Clone, Deserialize)]
pub struct SessionDraft {
    pub title: String,
    pub description: SessionDescription,
}

impl SessionDraft {
    fn validate(&self) -> Result<(), ChatError> {
        if self.title.trim().is_empty() {
            return Err(ChatError::validation("title", "cannot be empty"));
        }
        Ok(())
    }

    fn into_session(self, id: String, user_id: &str) -> Result<Session, ChatError> {
        let description = serde_json::to_value(&self.description)
            .map_err(|e| ChatError::validation("description", e.to_string()))?;
        Ok(Session {
            id,
            user_id: user_id.to_string(),
            session_type: self.description.session_type(),
            title: self.title.trim().to_string(),
            description,
        })
    }
}

/// Session management. Updates and deletes clear the cached description.
pub struct SessionService {
    store: Arc<dyn Store>,
    descriptions: Arc<SessionDescriptions>,
    short_term: Arc<ShortTermMemory>,
}

impl SessionService {
    pub fn new(
        store: Arc<dyn Store>,
        descriptions: Arc<SessionDescriptions>,
        short_term: Arc<ShortTermMemory>,
    ) -> Self {
        Self {
            store,
            descriptions,
            short_term,
        }
    }

    pub async fn get(&self, user_id: &str, session_id: &str) -> Result<Session, ChatError> {
        self.store
            .session(user_id, session_id)
            .await?
            .ok_or_else(|| ChatError::not_found("session", session_id))
    }

    pub async fn create(&self, user_id: &str, draft: SessionDraft) -> Result<Session, ChatError> {
        draft.validate()?;
        let session = draft.into_session(uuid::Uuid::new_v4().to_string(), user_id)?;
        self.store.insert_session(&session).await?;
        info!(user_id, session_id = %session.id, kind = %session.session_type, "session created");
        Ok(session)
    }

    pub async fn update(
        &self,
        user_id: &str,
        session_id: &str,
        draft: SessionDraft,
    ) -> Result<Session, ChatError> {
        draft.validate()?;
        let session = draft.into_session(session_id.to_string(), user_id)?;
        if !self.store.update_session(user_id, &session).await? {
            return Err(ChatError::not_found("session", session_id));
        }
        self.descriptions.invalidate(user_id, session_id);
        info!(user_id, session_id, "session updated");
        Ok(session)
    }

    /// Delete a session with its history and local context window.
    pub async fn delete(&self, user_id: &str, session_id: &str) -> Result<(), ChatError> {
        if !self.store.delete_session(user_id, session_id).await? {
            return Err(ChatError::not_found("session", session_id));
        }
        self.descriptions.invalidate(user_id, session_id);
        self.short_term.clear(user_id, session_id);
        info!(user_id, session_id, "session deleted");
        Ok(())
    }

    /// Most recent `limit` rows of a session, oldest first, for reload playback.
    pub async fn history(
        &self,
        user_id: &str,
        session_id: &str,
        limit: usize,
    ) -> Result<Vec<HistoryEntry>, ChatError> {
        let mut rows = self.store.recent_history(user_id, session_id, limit).await?;
        rows.reverse();
        Ok(rows)
    }
}
