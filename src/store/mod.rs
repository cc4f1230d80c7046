pub mod rest;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use tokio::sync::RwLock;

use crate::error::StoreError;
use crate::types::{AiFriend, HistoryEntry, NewHistoryEntry, Session, UserProfile};

pub use rest::RestStore;

/// Durable storage for users, friends, sessions and conversation history.
///
/// Every read and write is scoped by the caller's `user_id`; asking for
/// another user's row yields `None`/`false`, never the row itself.
#[async_trait]
pub trait Store: Send + Sync {
    async fn user(&self, user_id: &str) -> Result<Option<UserProfile>, StoreError>;
    async fn upsert_user(&self, user: &UserProfile) -> Result<(), StoreError>;
    async fn set_todays_summary(&self, user_id: &str, done: bool) -> Result<(), StoreError>;

    async fn friends(&self, user_id: &str) -> Result<Vec<AiFriend>, StoreError>;
    async fn friend(&self, user_id: &str, friend_id: &str) -> Result<Option<AiFriend>, StoreError>;
    async fn insert_friend(&self, friend: &AiFriend) -> Result<(), StoreError>;
    async fn update_friend(&self, user_id: &str, friend: &AiFriend) -> Result<bool, StoreError>;
    /// Deletes the friend and its conversation history.
    async fn delete_friend(&self, user_id: &str, friend_id: &str) -> Result<bool, StoreError>;

    async fn session(&self, user_id: &str, session_id: &str)
    -> Result<Option<Session>, StoreError>;
    async fn insert_session(&self, session: &Session) -> Result<(), StoreError>;
    async fn update_session(&self, user_id: &str, session: &Session) -> Result<bool, StoreError>;
    /// Deletes the session and its conversation history.
    async fn delete_session(&self, user_id: &str, session_id: &str) -> Result<bool, StoreError>;

    async fn append_history(&self, entry: NewHistoryEntry) -> Result<HistoryEntry, StoreError>;
    /// Most recent `limit` rows of a conversation, newest first.
    async fn recent_history(
        &self,
        user_id: &str,
        conversation_id: &str,
        limit: usize,
    ) -> Result<Vec<HistoryEntry>, StoreError>;
    /// All of a user's rows created at or after `since`, oldest first.
    async fn history_since(
        &self,
        user_id: &str,
        since: DateTime<Utc>,
    ) -> Result<Vec<HistoryEntry>, StoreError>;
}

/// Simple in-memory store. Used for zero-config runs and tests; the hosted
/// backend is reached through [`RestStore`].
#[derive(Default)]
pub struct MemoryStore {
    tables: RwLock<Tables>,
}

#[derive(Default)]
struct Tables {
    users: HashMap<String, UserProfile>,
    friends: Vec<AiFriend>,
    sessions: Vec<Session>,
    history: Vec<HistoryEntry>,
    last_timestamp: Option<DateTime<Utc>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn history_count(&self) -> usize {
        self.tables.read().await.history.len()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn user(&self, user_id: &str) -> Result<Option<UserProfile>, StoreError> {
        Ok(self.tables.read().await.users.get(user_id).cloned())
    }

    async fn upsert_user(&self, user: &UserProfile) -> Result<(), StoreError> {
        self.tables
            .write()
            .await
            .users
            .insert(user.id.clone(), user.clone());
        Ok(())
    }

    async fn set_todays_summary(&self, user_id: &str, done: bool) -> Result<(), StoreError> {
        let mut tables = self.tables.write().await;
        let user = tables
            .users
            .get_mut(user_id)
            .ok_or_else(|| StoreError::not_found("user", user_id))?;
        user.todays_summary = done;
        Ok(())
    }

    async fn friends(&self, user_id: &str) -> Result<Vec<AiFriend>, StoreError> {
        let tables = self.tables.read().await;
        Ok(tables
            .friends
            .iter()
            .filter(|f| f.user_id == user_id)
            .cloned()
            .collect())
    }

    async fn friend(&self, user_id: &str, friend_id: &str) -> Result<Option<AiFriend>, StoreError> {
        let tables = self.tables.read().await;
        Ok(tables
            .friends
            .iter()
            .find(|f| f.id == friend_id && f.user_id == user_id)
            .cloned())
    }

    async fn insert_friend(&self, friend: &AiFriend) -> Result<(), StoreError> {
        self.tables.write().await.friends.push(friend.clone());
        Ok(())
    }

    async fn update_friend(&self, user_id: &str, friend: &AiFriend) -> Result<bool, StoreError> {
        let mut tables = self.tables.write().await;
        match tables
            .friends
            .iter_mut()
            .find(|f| f.id == friend.id && f.user_id == user_id)
        {
            Some(existing) => {
                *existing = AiFriend {
                    user_id: user_id.to_string(),
                    ..friend.clone()
                };
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn delete_friend(&self, user_id: &str, friend_id: &str) -> Result<bool, StoreError> {
        let mut tables = self.tables.write().await;
        let before = tables.friends.len();
        tables
            .friends
            .retain(|f| !(f.id == friend_id && f.user_id == user_id));
        if tables.friends.len() == before {
            return Ok(false);
        }
        tables
            .history
            .retain(|h| !(h.user_id == user_id && h.ai_friend_id.as_deref() == Some(friend_id)));
        Ok(true)
    }

    async fn session(
        &self,
        user_id: &str,
        session_id: &str,
    ) -> Result<Option<Session>, StoreError> {
        let tables = self.tables.read().await;
        Ok(tables
            .sessions
            .iter()
            .find(|s| s.id == session_id && s.user_id == user_id)
            .cloned())
    }

    async fn insert_session(&self, session: &Session) -> Result<(), StoreError> {
        self.tables.write().await.sessions.push(session.clone());
        Ok(())
    }

    async fn update_session(&self, user_id: &str, session: &Session) -> Result<bool, StoreError> {
        let mut tables = self.tables.write().await;
        match tables
            .sessions
            .iter_mut()
            .find(|s| s.id == session.id && s.user_id == user_id)
        {
            Some(existing) => {
                *existing = Session {
                    user_id: user_id.to_string(),
                    ..session.clone()
                };
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn delete_session(&self, user_id: &str, session_id: &str) -> Result<bool, StoreError> {
        let mut tables = self.tables.write().await;
        let before = tables.sessions.len();
        tables
            .sessions
            .retain(|s| !(s.id == session_id && s.user_id == user_id));
        if tables.sessions.len() == before {
            return Ok(false);
        }
        tables
            .history
            .retain(|h| !(h.user_id == user_id && h.conversation_id == session_id));
        Ok(true)
    }

    async fn append_history(&self, entry: NewHistoryEntry) -> Result<HistoryEntry, StoreError> {
        let mut tables = self.tables.write().await;
        // Server timestamps never go backwards, even if the wall clock does.
        let now = Utc::now();
        let created_at = match tables.last_timestamp {
            Some(last) if last > now => last,
            _ => now,
        };
        tables.last_timestamp = Some(created_at);

        let row = HistoryEntry {
            id: uuid::Uuid::new_v4().to_string(),
            user_id: entry.user_id,
            ai_friend_id: entry.ai_friend_id,
            conversation_id: entry.conversation_id,
            sender: entry.sender,
            message: entry.message,
            created_at,
        };
        tables.history.push(row.clone());
        Ok(row)
    }

    async fn recent_history(
        &self,
        user_id: &str,
        conversation_id: &str,
        limit: usize,
    ) -> Result<Vec<HistoryEntry>, StoreError> {
        let tables = self.tables.read().await;
        Ok(tables
            .history
            .iter()
            .rev()
            .filter(|h| h.user_id == user_id && h.conversation_id == conversation_id)
            .take(limit)
            .cloned()
            .collect())
    }

    async fn history_since(
        &self,
        user_id: &str,
        since: DateTime<Utc>,
    ) -> Result<Vec<HistoryEntry>, StoreError> {
        let tables = self.tables.read().await;
        Ok(tables
            .history
            .iter()
            .filter(|h| h.user_id == user_id && h.created_at >= since)
            .cloned()
            .collect())
    }
}
