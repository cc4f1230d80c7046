use thiserror::Error;

/// Failure talking to the durable store.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("storage request failed: {0}")]
    Transport(String),

    #[error("storage returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("malformed storage payload: {0}")]
    Malformed(String),

    #[error("{entity} '{id}' not found")]
    NotFound { entity: &'static str, id: String },
}

impl StoreError {
    pub fn not_found(entity: &'static str, id: impl Into<String>) -> Self {
        StoreError::NotFound {
            entity,
            id: id.into(),
        }
    }
}

impl From<reqwest::Error> for StoreError {
    fn from(e: reqwest::Error) -> Self {
        StoreError::Transport(e.to_string())
    }
}

/// Why a single completion attempt produced no usable reply.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProviderFailure {
    #[error("provider is busy")]
    Busy,

    #[error("no credentials configured")]
    MissingCredentials,

    #[error("request failed: {0}")]
    Transport(String),

    #[error("upstream returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("malformed completion body: {0}")]
    Malformed(String),

    #[error("empty completion")]
    Empty,
}

/// Hard failures of the send pipeline and the management services.
///
/// External-dependency failures inside the pipeline never surface here;
/// they degrade to fallbacks instead.
#[derive(Debug, Error)]
pub enum ChatError {
    #[error("user '{0}' not found")]
    NoUser(String),

    #[error("no active friends to reply")]
    NoActiveFriends,

    #[error("at most {0} friends can be active at once")]
    FriendLimit(usize),

    #[error("invalid {field}: {reason}")]
    Validation { field: &'static str, reason: String },

    #[error("{entity} '{id}' not found")]
    NotFound { entity: &'static str, id: String },

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl ChatError {
    pub fn validation(field: &'static str, reason: impl Into<String>) -> Self {
        ChatError::Validation {
            field,
            reason: reason.into(),
        }
    }

    pub fn not_found(entity: &'static str, id: impl Into<String>) -> Self {
        ChatError::NotFound {
            entity,
            id: id.into(),
        }
    }
}
