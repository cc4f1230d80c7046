use serde::Deserialize;
use std::sync::Arc;
use tracing::info;

use crate::error::ChatError;
use crate::memory::short_term::ShortTermMemory;
use crate::memory::summary::PersonaSummaryCache;
use crate::store::Store;
use crate::types::AiFriend;

const NAME_MIN: usize = 2;
const NAME_MAX: usize = 40;

/// Editable persona fields as submitted by the user.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct FriendDraft {
    pub name: String,
    #[serde(default)]
    pub persona: String,
    #[serde(default)]
    pub about: String,
    #[serde(default)]
    pub knowledge_base: String,
    #[serde(default = "default_status")]
    pub status: bool,
    #[serde(default)]
    pub avatar_url: Option<String>,
}

fn default_status() -> bool {
    true
}

impl FriendDraft {
    fn validate(&self) -> Result<(), ChatError> {
        let name_len = self.name.trim().chars().count();
        if !(NAME_MIN..=NAME_MAX).contains(&name_len) {
            return Err(ChatError::validation(
                "name",
                format!("must be {NAME_MIN} to {NAME_MAX} characters"),
            ));
        }
        if self.persona.trim().is_empty() {
            return Err(ChatError::validation("persona", "cannot be empty"));
        }
        Ok(())
    }

    fn apply(self, friend: &mut AiFriend) {
        friend.name = self.name.trim().to_string();
        friend.persona = self.persona.trim().to_string();
        friend.about = self.about.trim().to_string();
        friend.knowledge_base = self.knowledge_base.trim().to_string();
        friend.status = self.status;
        friend.avatar_url = self.avatar_url;
    }
}

/// Persona management. Every mutation clears the persona summary cache.
pub struct FriendService {
    store: Arc<dyn Store>,
    summaries: Arc<PersonaSummaryCache>,
    short_term: Arc<ShortTermMemory>,
    max_active: usize,
}

impl FriendService {
    pub fn new(
        store: Arc<dyn Store>,
        summaries: Arc<PersonaSummaryCache>,
        short_term: Arc<ShortTermMemory>,
        max_active: usize,
    ) -> Self {
        Self {
            store,
            summaries,
            short_term,
            max_active,
        }
    }

    pub async fn list(&self, user_id: &str) -> Result<Vec<AiFriend>, ChatError> {
        Ok(self.store.friends(user_id).await?)
    }

    pub async fn active(&self, user_id: &str) -> Result<Vec<AiFriend>, ChatError> {
        let friends = self.store.friends(user_id).await?;
        Ok(friends.into_iter().filter(AiFriend::is_active).collect())
    }

    /// Fail if activating one more friend would pass the cap. `except` is
    /// the friend being changed, which does not count against it.
    async fn check_capacity(&self, user_id: &str, except: Option<&str>) -> Result<(), ChatError> {
        let active = self
            .active(user_id)
            .await?
            .into_iter()
            .filter(|f| Some(f.id.as_str()) != except)
            .count();
        if active >= self.max_active {
            return Err(ChatError::FriendLimit(self.max_active));
        }
        Ok(())
    }

    pub async fn create(&self, user_id: &str, draft: FriendDraft) -> Result<AiFriend, ChatError> {
        draft.validate()?;
        if draft.status {
            self.check_capacity(user_id, None).await?;
        }

        let mut friend = AiFriend {
            id: uuid::Uuid::new_v4().to_string(),
            user_id: user_id.to_string(),
            name: String::new(),
            persona: String::new(),
            about: String::new(),
            knowledge_base: String::new(),
            status: false,
            memory: Vec::new(),
            avatar_url: None,
        };
        draft.apply(&mut friend);

        self.store.insert_friend(&friend).await?;
        self.summaries.invalidate();
        info!(user_id, friend = %friend.name, "friend created");
        Ok(friend)
    }

    async fn existing(&self, user_id: &str, friend_id: &str) -> Result<AiFriend, ChatError> {
        self.store
            .friend(user_id, friend_id)
            .await?
            .ok_or_else(|| ChatError::not_found("friend", friend_id))
    }

    async fn save(&self, user_id: &str, friend: AiFriend) -> Result<AiFriend, ChatError> {
        if !self.store.update_friend(user_id, &friend).await? {
            return Err(ChatError::not_found("friend", &friend.id));
        }
        self.summaries.invalidate();
        Ok(friend)
    }

    /// Replace the editable fields. Memory is kept.
    pub async fn update(
        &self,
        user_id: &str,
        friend_id: &str,
        draft: FriendDraft,
    ) -> Result<AiFriend, ChatError> {
        draft.validate()?;
        let mut friend = self.existing(user_id, friend_id).await?;
        if draft.status && !friend.status {
            self.check_capacity(user_id, Some(friend_id)).await?;
        }
        draft.apply(&mut friend);
        let friend = self.save(user_id, friend).await?;
        info!(user_id, friend = %friend.name, "friend updated");
        Ok(friend)
    }

    pub async fn set_status(
        &self,
        user_id: &str,
        friend_id: &str,
        active: bool,
    ) -> Result<AiFriend, ChatError> {
        let mut friend = self.existing(user_id, friend_id).await?;
        if active && !friend.status {
            self.check_capacity(user_id, Some(friend_id)).await?;
        }
        friend.status = active;
        let friend = self.save(user_id, friend).await?;
        info!(user_id, friend = %friend.name, active, "friend status changed");
        Ok(friend)
    }

    /// Delete a friend and, through the store, its conversation history.
    /// Its lines leave the local context windows too.
    pub async fn delete(&self, user_id: &str, friend_id: &str) -> Result<(), ChatError> {
        let friend = self.existing(user_id, friend_id).await?;
        if !self.store.delete_friend(user_id, friend_id).await? {
            return Err(ChatError::not_found("friend", friend_id));
        }
        self.short_term.forget_sender(user_id, &friend.name);
        self.summaries.invalidate();
        info!(user_id, friend_id, "friend deleted");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn draft(name: &str, persona: &str) -> FriendDraft {
        FriendDraft {
            name: name.into(),
            persona: persona.into(),
            ..FriendDraft::default()
        }
    }

    #[test]
    fn name_length_is_checked_after_trim() {
        assert!(draft(" A ", "kind").validate().is_err());
        assert!(draft("Al", "kind").validate().is_ok());
        assert!(draft(&"x".repeat(41), "kind").validate().is_err());
        assert!(draft(&"x".repeat(40), "kind").validate().is_ok());
    }

    #[test]
    fn persona_is_required() {
        let err = draft("Mira", "  ").validate().unwrap_err();
        assert!(matches!(err, ChatError::Validation { field: "persona", .. }));
    }

    #[test]
    fn draft_status_defaults_to_active() {
        let d: FriendDraft = serde_json::from_str(r#"{"name":"Mira","persona":"kind"}"#).unwrap();
        assert!(d.status);
    }
}
