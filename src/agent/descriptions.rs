use std::sync::Arc;
use tracing::{debug, warn};

use crate::cache::LocalCache;
use crate::store::Store;
use crate::types::SessionDescription;

/// Per-session cache of normalized session descriptions.
///
/// Entries are dropped by [`SessionDescriptions::invalidate`] whenever the
/// session is updated or deleted.
pub struct SessionDescriptions {
    cache: Arc<LocalCache>,
    store: Arc<dyn Store>,
}

fn cache_key(user_id: &str, session_id: &str) -> String {
    format!("session_description:{user_id}:{session_id}")
}

impl SessionDescriptions {
    pub fn new(cache: Arc<LocalCache>, store: Arc<dyn Store>) -> Self {
        Self { cache, store }
    }

    /// Cached description, else the stored session's, else the General fallback.
    pub async fn resolve(&self, user_id: &str, session_id: &str) -> SessionDescription {
        let key = cache_key(user_id, session_id);
        if let Some(raw) = self.cache.get(&key) {
            match serde_json::from_str(&raw) {
                Ok(description) => return description,
                Err(e) => {
                    debug!(session_id, "dropping unreadable cached description: {e}");
                    self.cache.remove(&key);
                }
            }
        }

        match self.store.session(user_id, session_id).await {
            Ok(Some(session)) => {
                let description = session.normalized_description();
                if let Ok(raw) = serde_json::to_string(&description) {
                    self.cache.set(&key, raw);
                }
                description
            }
            Ok(None) => {
                debug!(user_id, session_id, "session not found, using default description");
                SessionDescription::fallback()
            }
            Err(e) => {
                warn!(user_id, session_id, "failed to load session: {e}");
                SessionDescription::fallback()
            }
        }
    }

    pub fn invalidate(&self, user_id: &str, session_id: &str) {
        self.cache.remove(&cache_key(user_id, session_id));
    }

    pub fn is_cached(&self, user_id: &str, session_id: &str) -> bool {
        self.cache.contains(&cache_key(user_id, session_id))
    }
}
