//! Error types for the attention engine

use thiserror::Error;

/// Errors reported by a storage backend
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Meeting not found: {0}")]
    MeetingNotFound(String),

    #[error("Room already has a meeting: {0}")]
    DuplicateRoom(String),

    #[error("Participant {user_id} not found in meeting {meeting_id}")]
    ParticipantNotFound { meeting_id: String, user_id: String },

    #[error("Store lock poisoned")]
    Poisoned,

    #[error("Storage backend error: {0}")]
    Backend(String),
}

/// Errors that can occur inside the engine
#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("Invalid JSON: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("Invalid configuration: {0}")]
    ConfigError(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid attention log: {0}")]
    InvalidLog(String),
}

impl From<toml::de::Error> for EngineError {
    fn from(e: toml::de::Error) -> Self {
        EngineError::ConfigError(e.to_string())
    }
}
