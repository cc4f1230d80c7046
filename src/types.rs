use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Placeholder description used when a session has none, or cannot be loaded.
pub const NO_DESCRIPTION: &str = "No description available";

/// Routing mode for a plain conversational reply.
pub const MODE_NORMAL: &str = "normal";

/// Profile fields shared by users and AI friends.
///
/// This is the only shape sent to the router classifier and the persona
/// summarizer; message history never travels with it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProfileFields {
    pub name: String,
    #[serde(default)]
    pub persona: String,
    #[serde(default)]
    pub about: String,
    #[serde(default)]
    pub knowledge_base: String,
}

/// Decrypts a stored display name when no plaintext name is present.
pub trait NameDecryptor: Send + Sync {
    fn decrypt(&self, ciphertext: &str) -> Option<String>;
}

/// Decryptor for deployments that never store encrypted names.
pub struct NoDecryption;

impl NameDecryptor for NoDecryption {
    fn decrypt(&self, _ciphertext: &str) -> Option<String> {
        None
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UserProfile {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub encrypted_name: Option<String>,
    #[serde(default)]
    pub persona: String,
    #[serde(default)]
    pub about: String,
    #[serde(default)]
    pub knowledge_base: String,
    #[serde(default)]
    pub avatar_url: Option<String>,
    /// Set once the daily memory pass ran; reset by an external daily job.
    #[serde(default)]
    pub todays_summary: bool,
}

impl UserProfile {
    /// Plaintext name first, then the decrypted name, then a generic label.
    pub fn display_name(&self, decryptor: &dyn NameDecryptor) -> String {
        if let Some(name) = self.name.as_deref().map(str::trim).filter(|n| !n.is_empty()) {
            return name.to_string();
        }
        self.encrypted_name
            .as_deref()
            .and_then(|c| decryptor.decrypt(c))
            .filter(|n| !n.trim().is_empty())
            .unwrap_or_else(|| "User".to_string())
    }

    pub fn profile(&self, display_name: &str) -> ProfileFields {
        ProfileFields {
            name: display_name.to_string(),
            persona: self.persona.clone(),
            about: self.about.clone(),
            knowledge_base: self.knowledge_base.clone(),
        }
    }
}

/// One role-tagged utterance in a friend's long-term memory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemoryEntry {
    pub role: String,
    pub content: String,
}

/// A user-authored AI persona.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AiFriend {
    pub id: String,
    pub user_id: String,
    pub name: String,
    #[serde(default)]
    pub persona: String,
    #[serde(default)]
    pub about: String,
    #[serde(default)]
    pub knowledge_base: String,
    /// Only active friends take part in routing.
    #[serde(default)]
    pub status: bool,
    #[serde(default)]
    pub memory: Vec<MemoryEntry>,
    #[serde(default)]
    pub avatar_url: Option<String>,
}

impl AiFriend {
    pub fn profile(&self) -> ProfileFields {
        ProfileFields {
            name: self.name.clone(),
            persona: self.persona.clone(),
            about: self.about.clone(),
            knowledge_base: self.knowledge_base.clone(),
        }
    }

    pub fn is_active(&self) -> bool {
        self.status
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SessionType {
    General,
    StoryMode,
    ResearchCreateMode,
}

impl std::fmt::Display for SessionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionType::General => write!(f, "General"),
            SessionType::StoryMode => write!(f, "StoryMode"),
            SessionType::ResearchCreateMode => write!(f, "ResearchCreateMode"),
        }
    }
}

/// A typed conversation thread. `description` is the raw stored blob whose
/// shape depends on `session_type`; see [`SessionDescription::from_blob`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub id: String,
    pub user_id: String,
    pub session_type: SessionType,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub description: serde_json::Value,
}

impl Session {
    pub fn normalized_description(&self) -> SessionDescription {
        SessionDescription::from_blob(self.session_type, &self.description)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoryCharacter {
    pub name: String,
    #[serde(default, alias = "role")]
    pub description: String,
}

/// Normalized, mode-specific session description.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "session_type")]
pub enum SessionDescription {
    General {
        description: String,
    },
    StoryMode {
        story: String,
        characters: Vec<StoryCharacter>,
        relationships: Vec<String>,
    },
    ResearchCreateMode {
        project_description: String,
        team_members: Vec<String>,
    },
}

#[derive(Deserialize, Default)]
#[serde(default)]
struct StoryBlob {
    story: String,
    description: String,
    characters: Vec<StoryCharacter>,
    relationships: RelationshipsBlob,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RelationshipsBlob {
    List(Vec<String>),
    Text(String),
}

impl Default for RelationshipsBlob {
    fn default() -> Self {
        RelationshipsBlob::List(Vec::new())
    }
}

#[derive(Deserialize, Default)]
#[serde(default)]
struct ResearchBlob {
    project_description: String,
    description: String,
    team_members: Vec<String>,
}

impl SessionDescription {
    /// The General-mode description used when nothing better is available.
    pub fn fallback() -> Self {
        SessionDescription::General {
            description: NO_DESCRIPTION.to_string(),
        }
    }

    pub fn session_type(&self) -> SessionType {
        match self {
            SessionDescription::General { .. } => SessionType::General,
            SessionDescription::StoryMode { .. } => SessionType::StoryMode,
            SessionDescription::ResearchCreateMode { .. } => SessionType::ResearchCreateMode,
        }
    }

    /// Normalize a stored description blob. Plain strings are accepted for
    /// every mode; unreadable blobs degrade to empty fields, never an error.
    pub fn from_blob(session_type: SessionType, blob: &serde_json::Value) -> Self {
        match session_type {
            SessionType::General => {
                let text = match blob {
                    serde_json::Value::String(s) => s.trim().to_string(),
                    serde_json::Value::Object(map) => map
                        .get("description")
                        .and_then(|d| d.as_str())
                        .unwrap_or_default()
                        .trim()
                        .to_string(),
                    _ => String::new(),
                };
                if text.is_empty() {
                    Self::fallback()
                } else {
                    SessionDescription::General { description: text }
                }
            }
            SessionType::StoryMode => {
                let parsed = match blob {
                    serde_json::Value::String(s) => StoryBlob {
                        story: s.clone(),
                        ..StoryBlob::default()
                    },
                    other => serde_json::from_value(other.clone()).unwrap_or_default(),
                };
                let story = if parsed.story.trim().is_empty() {
                    parsed.description
                } else {
                    parsed.story
                };
                let relationships = match parsed.relationships {
                    RelationshipsBlob::List(list) => list,
                    RelationshipsBlob::Text(text) if text.trim().is_empty() => Vec::new(),
                    RelationshipsBlob::Text(text) => vec![text],
                };
                SessionDescription::StoryMode {
                    story: story.trim().to_string(),
                    characters: parsed.characters,
                    relationships,
                }
            }
            SessionType::ResearchCreateMode => {
                let parsed = match blob {
                    serde_json::Value::String(s) => ResearchBlob {
                        project_description: s.clone(),
                        ..ResearchBlob::default()
                    },
                    other => serde_json::from_value(other.clone()).unwrap_or_default(),
                };
                let project = if parsed.project_description.trim().is_empty() {
                    parsed.description
                } else {
                    parsed.project_description
                };
                SessionDescription::ResearchCreateMode {
                    project_description: project.trim().to_string(),
                    team_members: parsed.team_members,
                }
            }
        }
    }
}

/// One persisted history row. A single AI reply is stored as one row per sentence.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub id: String,
    pub user_id: String,
    #[serde(default)]
    pub ai_friend_id: Option<String>,
    pub conversation_id: String,
    pub sender: String,
    pub message: String,
    pub created_at: DateTime<Utc>,
}

impl HistoryEntry {
    /// `"sender: message"`, the line format used in context windows.
    pub fn context_line(&self) -> String {
        format!("{}: {}", self.sender, self.message)
    }
}

/// A history row before the store assigns its id and timestamp.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewHistoryEntry {
    pub user_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ai_friend_id: Option<String>,
    pub conversation_id: String,
    pub sender: String,
    pub message: String,
}

/// One discrete reply slot chosen by the router. The same friend may hold
/// several consecutive turns.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Turn {
    pub friend_id: String,
    pub name: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteSource {
    Classifier,
    /// The classifier was unreachable or answered nonsense; turns were drawn at random.
    Fallback,
}

/// Ephemeral routing outcome for one user message.
#[derive(Debug, Clone)]
pub struct RoutingDecision {
    pub turns: Vec<Turn>,
    pub mode: String,
    pub web_content: Option<String>,
    pub source: RouteSource,
}

impl RoutingDecision {
    pub fn respondents(&self) -> Vec<String> {
        self.turns.iter().map(|t| t.name.clone()).collect()
    }

    /// Web content is only forwarded to generation outside normal mode.
    pub fn web_context(&self) -> Option<&str> {
        if self.mode == MODE_NORMAL {
            return None;
        }
        self.web_content
            .as_deref()
            .map(str::trim)
            .filter(|c| !c.is_empty())
    }

    pub fn is_degraded(&self) -> bool {
        self.source == RouteSource::Fallback
    }
}

/// An event streamed to the chat client while a send is in flight.
///
/// Wire format: `{"id": "req-id", "event": "sentence", "data": {...}}`
#[derive(Debug, Clone)]
pub enum ChatEvent {
    Typing(bool),
    Routing {
        respondents: Vec<String>,
        mode: String,
        degraded: bool,
    },
    TurnStarted {
        friend_id: String,
        sender: String,
        degraded: bool,
    },
    Sentence {
        friend_id: String,
        sender: String,
        text: String,
        created_at: DateTime<Utc>,
    },
    Done,
    Error(String),
}

impl ChatEvent {
    /// Serialize this event as a JSON wire frame with the given request ID.
    pub fn to_frame(&self, request_id: &str) -> serde_json::Value {
        match self {
            ChatEvent::Typing(active) => serde_json::json!({
                "id": request_id,
                "event": "typing",
                "data": active,
            }),
            ChatEvent::Routing {
                respondents,
                mode,
                degraded,
            } => serde_json::json!({
                "id": request_id,
                "event": "routing",
                "data": { "respondents": respondents, "mode": mode, "degraded": degraded },
            }),
            ChatEvent::TurnStarted {
                friend_id,
                sender,
                degraded,
            } => serde_json::json!({
                "id": request_id,
                "event": "turn",
                "data": { "friend_id": friend_id, "sender": sender, "degraded": degraded },
            }),
            ChatEvent::Sentence {
                friend_id,
                sender,
                text,
                created_at,
            } => serde_json::json!({
                "id": request_id,
                "event": "sentence",
                "data": {
                    "friend_id": friend_id,
                    "sender": sender,
                    "text": text,
                    "created_at": created_at,
                },
            }),
            ChatEvent::Done => serde_json::json!({
                "id": request_id,
                "event": "done",
            }),
            ChatEvent::Error(data) => serde_json::json!({
                "id": request_id,
                "event": "error",
                "data": data,
            }),
        }
    }
}
