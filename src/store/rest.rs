use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{Client, Method, RequestBuilder};
use serde::de::DeserializeOwned;
use tracing::debug;

use super::Store;
use crate::error::StoreError;
use crate::types::{AiFriend, HistoryEntry, NewHistoryEntry, Session, UserProfile};

const USERS: &str = "users";
const FRIENDS: &str = "ai_friends";
const SESSIONS: &str = "sessions";
const HISTORY: &str = "conversation_history";

/// Store backed by a hosted backend-as-a-service REST API (PostgREST
/// conventions: `?column=eq.value` filters, `Prefer` return headers).
///
/// Every request carries an owner filter for the caller's user id.
pub struct RestStore {
    client: Client,
    base_url: String,
    api_key: String,
}

type Query = Vec<(&'static str, String)>;

fn eq(value: &str) -> String {
    format!("eq.{value}")
}

impl RestStore {
    pub fn new(base_url: &str, api_key: &str) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
        }
    }

    fn request(&self, method: Method, table: &str, query: &Query) -> RequestBuilder {
        let url = format!("{}/rest/v1/{table}", self.base_url);
        debug!(%method, table, ?query, "storage request");
        self.client
            .request(method, url)
            .header("apikey", &self.api_key)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .query(query)
    }

    async fn send(&self, builder: RequestBuilder) -> Result<reqwest::Response, StoreError> {
        let response = builder.send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(StoreError::Status {
                status: status.as_u16(),
                body,
            });
        }
        Ok(response)
    }

    async fn rows<T: DeserializeOwned>(
        &self,
        builder: RequestBuilder,
    ) -> Result<Vec<T>, StoreError> {
        let response = self.send(builder).await?;
        response
            .json::<Vec<T>>()
            .await
            .map_err(|e| StoreError::Malformed(e.to_string()))
    }

    async fn select<T: DeserializeOwned>(
        &self,
        table: &str,
        mut query: Query,
    ) -> Result<Vec<T>, StoreError> {
        query.push(("select", "*".into()));
        self.rows(self.request(Method::GET, table, &query)).await
    }

    async fn insert<B: serde::Serialize + ?Sized>(
        &self,
        table: &str,
        body: &B,
    ) -> Result<(), StoreError> {
        let builder = self
            .request(Method::POST, table, &Vec::new())
            .header("Prefer", "return=minimal")
            .json(body);
        self.send(builder).await.map(|_| ())
    }

    /// PATCH or DELETE returning the affected rows' count.
    async fn mutate(
        &self,
        method: Method,
        table: &str,
        query: Query,
        body: Option<serde_json::Value>,
    ) -> Result<usize, StoreError> {
        let mut builder = self
            .request(method, table, &query)
            .header("Prefer", "return=representation");
        if let Some(body) = body {
            builder = builder.json(&body);
        }
        let rows: Vec<serde_json::Value> = self.rows(builder).await?;
        Ok(rows.len())
    }
}

fn to_json<T: serde::Serialize>(value: &T) -> Result<serde_json::Value, StoreError> {
    serde_json::to_value(value).map_err(|e| StoreError::Malformed(e.to_string()))
}

#[async_trait]
impl Store for RestStore {
    async fn user(&self, user_id: &str) -> Result<Option<UserProfile>, StoreError> {
        let rows = self
            .select(USERS, vec![("id", eq(user_id)), ("limit", "1".into())])
            .await?;
        Ok(rows.into_iter().next())
    }

    async fn upsert_user(&self, user: &UserProfile) -> Result<(), StoreError> {
        let builder = self
            .request(Method::POST, USERS, &Vec::new())
            .header("Prefer", "resolution=merge-duplicates,return=minimal")
            .json(user);
        self.send(builder).await.map(|_| ())
    }

    async fn set_todays_summary(&self, user_id: &str, done: bool) -> Result<(), StoreError> {
        let updated = self
            .mutate(
                Method::PATCH,
                USERS,
                vec![("id", eq(user_id))],
                Some(serde_json::json!({ "todays_summary": done })),
            )
            .await?;
        if updated == 0 {
            return Err(StoreError::not_found("user", user_id));
        }
        Ok(())
    }

    async fn friends(&self, user_id: &str) -> Result<Vec<AiFriend>, StoreError> {
        self.select(FRIENDS, vec![("user_id", eq(user_id))]).await
    }

    async fn friend(&self, user_id: &str, friend_id: &str) -> Result<Option<AiFriend>, StoreError> {
        let rows = self
            .select(
                FRIENDS,
                vec![
                    ("id", eq(friend_id)),
                    ("user_id", eq(user_id)),
                    ("limit", "1".into()),
                ],
            )
            .await?;
        Ok(rows.into_iter().next())
    }

    async fn insert_friend(&self, friend: &AiFriend) -> Result<(), StoreError> {
        self.insert(FRIENDS, friend).await
    }

    async fn update_friend(&self, user_id: &str, friend: &AiFriend) -> Result<bool, StoreError> {
        let mut body = to_json(friend)?;
        body["user_id"] = serde_json::json!(user_id);
        let updated = self
            .mutate(
                Method::PATCH,
                FRIENDS,
                vec![("id", eq(&friend.id)), ("user_id", eq(user_id))],
                Some(body),
            )
            .await?;
        Ok(updated > 0)
    }

    async fn delete_friend(&self, user_id: &str, friend_id: &str) -> Result<bool, StoreError> {
        self.mutate(
            Method::DELETE,
            HISTORY,
            vec![("ai_friend_id", eq(friend_id)), ("user_id", eq(user_id))],
            None,
        )
        .await?;
        let deleted = self
            .mutate(
                Method::DELETE,
                FRIENDS,
                vec![("id", eq(friend_id)), ("user_id", eq(user_id))],
                None,
            )
            .await?;
        Ok(deleted > 0)
    }

    async fn session(
        &self,
        user_id: &str,
        session_id: &str,
    ) -> Result<Option<Session>, StoreError> {
        let rows = self
            .select(
                SESSIONS,
                vec![
                    ("id", eq(session_id)),
                    ("user_id", eq(user_id)),
                    ("limit", "1".into()),
                ],
            )
            .await?;
        Ok(rows.into_iter().next())
    }

    async fn insert_session(&self, session: &Session) -> Result<(), StoreError> {
        self.insert(SESSIONS, session).await
    }

    async fn update_session(&self, user_id: &str, session: &Session) -> Result<bool, StoreError> {
        let mut body = to_json(session)?;
        body["user_id"] = serde_json::json!(user_id);
        let updated = self
            .mutate(
                Method::PATCH,
                SESSIONS,
                vec![("id", eq(&session.id)), ("user_id", eq(user_id))],
                Some(body),
            )
            .await?;
        Ok(updated > 0)
    }

    async fn delete_session(&self, user_id: &str, session_id: &str) -> Result<bool, StoreError> {
        self.mutate(
            Method::DELETE,
            HISTORY,
            vec![("conversation_id", eq(session_id)), ("user_id", eq(user_id))],
            None,
        )
        .await?;
        let deleted = self
            .mutate(
                Method::DELETE,
                SESSIONS,
                vec![("id", eq(session_id)), ("user_id", eq(user_id))],
                None,
            )
            .await?;
        Ok(deleted > 0)
    }

    async fn append_history(&self, entry: NewHistoryEntry) -> Result<HistoryEntry, StoreError> {
        let builder = self
            .request(Method::POST, HISTORY, &Vec::new())
            .header("Prefer", "return=representation")
            .json(&entry);
        let rows: Vec<HistoryEntry> = self.rows(builder).await?;
        rows.into_iter()
            .next()
            .ok_or_else(|| StoreError::Malformed("insert returned no row".into()))
    }

    async fn recent_history(
        &self,
        user_id: &str,
        conversation_id: &str,
        limit: usize,
    ) -> Result<Vec<HistoryEntry>, StoreError> {
        self.select(
            HISTORY,
            vec![
                ("user_id", eq(user_id)),
                ("conversation_id", eq(conversation_id)),
                ("order", "created_at.desc".into()),
                ("limit", limit.to_string()),
            ],
        )
        .await
    }

    async fn history_since(
        &self,
        user_id: &str,
        since: DateTime<Utc>,
    ) -> Result<Vec<HistoryEntry>, StoreError> {
        self.select(
            HISTORY,
            vec![
                ("user_id", eq(user_id)),
                ("created_at", format!("gte.{}", since.to_rfc3339())),
                ("order", "created_at.asc".into()),
            ],
        )
        .await
    }
}
