//! Error types for the support chat pipeline.

use helpline_core::error::HelplineError;

/// Errors from the chat pipeline.
#[derive(Debug, thiserror::Error)]
pub enum ChatError {
    #[error("message cannot be empty")]
    EmptyMessage,
    #[error("message exceeds maximum length of {0} characters")]
    MessageTooLong(usize),
    #[error("session not found: {0}")]
    SessionNotFound(uuid::Uuid),
    #[error("session is closed: {0}")]
    SessionClosed(uuid::Uuid),
    #[error("invalid turn: {0}")]
    InvalidTurn(String),
    #[error("generation unavailable: {0}")]
    GenerationUnavailable(String),
    #[error("storage error: {0}")]
    StorageError(String),
}

impl From<HelplineError> for ChatError {
    fn from(err: HelplineError) -> Self {
        match err {
            HelplineError::SessionNotFound(id) => ChatError::SessionNotFound(id),
            other => ChatError::StorageError(other.to_string()),
        }
    }
}

impl From<reqwest::Error> for ChatError {
    fn from(err: reqwest::Error) -> Self {
        ChatError::GenerationUnavailable(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use helpline_core::types::SessionStatus;
    use uuid::Uuid;

    #[test]
    fn test_chat_error_display() {
        assert_eq!(ChatError::EmptyMessage.to_string(), "message cannot be empty");
        assert_eq!(
            ChatError::MessageTooLong(2000).to_string(),
            "message exceeds maximum length of 2000 characters"
        );

        let id = Uuid::new_v4();
        assert_eq!(
            ChatError::SessionNotFound(id).to_string(),
            format!("session not found: {}", id)
        );
        assert_eq!(
            ChatError::SessionClosed(id).to_string(),
            format!("session is closed: {}", id)
        );
        assert_eq!(
            ChatError::GenerationUnavailable("timeout".to_string()).to_string(),
            "generation unavailable: timeout"
        );
        assert_eq!(
            ChatError::StorageError("disk full".to_string()).to_string(),
            "storage error: disk full"
        );
    }

    #[test]
    fn test_from_helpline_error_preserves_session_not_found() {
        let id = Uuid::new_v4();
        let chat_err: ChatError = HelplineError::SessionNotFound(id).into();
        assert!(matches!(chat_err, ChatError::SessionNotFound(got) if got == id));
    }

    #[test]
    fn test_from_helpline_error_storage() {
        let chat_err: ChatError = HelplineError::Storage("connection lost".to_string()).into();
        assert!(matches!(chat_err, ChatError::StorageError(_)));
        assert!(chat_err.to_string().contains("connection lost"));
    }

    #[test]
    fn test_from_helpline_error_transition() {
        let chat_err: ChatError = HelplineError::InvalidTransition {
            from: SessionStatus::Closed,
            to: SessionStatus::Active,
        }
        .into();
        assert!(chat_err.to_string().contains("closed -> active"));
    }
}
