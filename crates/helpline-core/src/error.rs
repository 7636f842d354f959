use thiserror::Error;
use uuid::Uuid;

use crate::types::{EscalationStatus, SessionStatus};

/// Top-level error type for the Helpline system.
///
/// Subsystem crates define their own error types and implement
/// `From<HelplineError>` so that `?` works across crate boundaries.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum HelplineError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Session not found: {0}")]
    SessionNotFound(Uuid),

    #[error("FAQ not found: {0}")]
    FaqNotFound(i64),

    #[error("Escalation not found: {0}")]
    EscalationNotFound(Uuid),

    #[error("Invalid session transition: {from} -> {to}")]
    InvalidTransition {
        from: SessionStatus,
        to: SessionStatus,
    },

    #[error("Escalation {id} is already {status}")]
    EscalationClosed { id: Uuid, status: EscalationStatus },

    #[error("Embedding backend unavailable: {0}")]
    EmbeddingUnavailable(String),

    #[error("Embedding dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },
}

impl From<toml::de::Error> for HelplineError {
    fn from(err: toml::de::Error) -> Self {
        HelplineError::Config(err.to_string())
    }
}

impl From<toml::ser::Error> for HelplineError {
    fn from(err: toml::ser::Error) -> Self {
        HelplineError::Config(err.to_string())
    }
}

impl From<serde_json::Error> for HelplineError {
    fn from(err: serde_json::Error) -> Self {
        HelplineError::Serialization(err.to_string())
    }
}

/// A specialized `Result` type for Helpline operations.
pub type Result<T> = std::result::Result<T, HelplineError>;
