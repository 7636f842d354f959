//! Conversation context: the windowed view of a session's history.

use std::sync::Arc;

use tracing::debug;
use uuid::Uuid;

use helpline_core::repository::SupportRepository;
use helpline_core::types::{ConversationTurn, TurnRole};

use crate::error::ChatError;

/// Reads and appends conversation turns through a [`SupportRepository`].
#[derive(Clone)]
pub struct ContextWindow {
    repo: Arc<dyn SupportRepository>,
    window_size: usize,
}

impl ContextWindow {
    pub fn new(repo: Arc<dyn SupportRepository>, window_size: usize) -> Self {
        Self { repo, window_size }
    }

    pub fn window_size(&self) -> usize {
        self.window_size
    }

    /// The `limit` (default: window size) most recent turns, oldest first.
    pub fn recent_turns(
        &self,
        session_id: Uuid,
        limit: Option<usize>,
    ) -> Result<Vec<ConversationTurn>, ChatError> {
        self.ensure_session(session_id)?;
        let limit = limit.unwrap_or(self.window_size);
        if limit == 0 {
            return Ok(Vec::new());
        }
        Ok(self.repo.recent_turns(session_id, limit)?)
    }

    /// Append a turn.
    ///
    /// Only assistant turns carry a confidence, and it must be within [0, 1].
    pub fn append(
        &self,
        session_id: Uuid,
        role: TurnRole,
        content: &str,
        confidence: Option<f64>,
    ) -> Result<ConversationTurn, ChatError> {
        match (role, confidence) {
            (TurnRole::User, Some(_)) => {
                return Err(ChatError::InvalidTurn(
                    "user turns cannot carry a confidence".to_string(),
                ))
            }
            (TurnRole::Assistant, Some(c)) if !(0.0..=1.0).contains(&c) => {
                return Err(ChatError::InvalidTurn(format!(
                    "confidence {} outside [0, 1]",
                    c
                )))
            }
            _ => {}
        }

        let turn = self.repo.append_turn(session_id, role, content, confidence)?;
        debug!(session_id = %session_id, role = %role, "Appended turn");
        Ok(turn)
    }

    /// How many earlier user turns equal `text`, ignoring case.
    pub fn repeat_count(&self, session_id: Uuid, text: &str) -> Result<usize, ChatError> {
        self.ensure_session(session_id)?;
        let needle = text.to_lowercase();
        let count = self
            .repo
            .user_turns(session_id)?
            .iter()
            .filter(|turn| turn.content.to_lowercase() == needle)
            .count();
        Ok(count)
    }

    /// The full transcript, oldest first.
    pub fn history(&self, session_id: Uuid) -> Result<Vec<ConversationTurn>, ChatError> {
        self.ensure_session(session_id)?;
        Ok(self.repo.all_turns(session_id)?)
    }

    fn ensure_session(&self, session_id: Uuid) -> Result<(), ChatError> {
        match self.repo.get_session(session_id)? {
            Some(_) => Ok(()),
            None => Err(ChatError::SessionNotFound(session_id)),
        }
    }
}

impl std::fmt::Debug for ContextWindow {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContextWindow")
            .field("window_size", &self.window_size)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use helpline_storage::SqliteRepository;

    fn setup(window_size: usize) -> (ContextWindow, Uuid) {
        let repo = Arc::new(SqliteRepository::in_memory().unwrap());
        let session = repo.create_session(None).unwrap();
        (ContextWindow::new(repo, window_size), session.id)
    }

    // ---- Append ----

    #[test]
    fn test_append_returns_turn() {
        let (ctx, sid) = setup(10);
        let turn = ctx.append(sid, TurnRole::User, "hello", None).unwrap();
        assert_eq!(turn.session_id, sid);
        assert_eq!(turn.content, "hello");
        assert_eq!(turn.confidence, None);
    }

    #[test]
    fn test_append_rejects_user_confidence() {
        let (ctx, sid) = setup(10);
        let result = ctx.append(sid, TurnRole::User, "hello", Some(0.5));
        assert!(matches!(result, Err(ChatError::InvalidTurn(_))));
    }

    #[test]
    fn test_append_rejects_out_of_range_confidence() {
        let (ctx, sid) = setup(10);
        for bad in [-0.1, 1.1, f64::NAN] {
            let result = ctx.append(sid, TurnRole::Assistant, "answer", Some(bad));
            assert!(matches!(result, Err(ChatError::InvalidTurn(_))));
        }
        assert!(ctx.history(sid).unwrap().is_empty());
    }

    #[test]
    fn test_append_accepts_boundary_confidence() {
        let (ctx, sid) = setup(10);
        ctx.append(sid, TurnRole::Assistant, "a", Some(0.0)).unwrap();
        ctx.append(sid, TurnRole::Assistant, "b", Some(1.0)).unwrap();
        ctx.append(sid, TurnRole::Assistant, "c", None).unwrap();
        assert_eq!(ctx.history(sid).unwrap().len(), 3);
    }

    #[test]
    fn test_append_unknown_session() {
        let (ctx, _) = setup(10);
        let result = ctx.append(Uuid::new_v4(), TurnRole::User, "hi", None);
        assert!(matches!(result, Err(ChatError::SessionNotFound(_))));
    }

    #[test]
    fn test_timestamps_non_decreasing() {
        let (ctx, sid) = setup(10);
        for i in 0..20 {
            ctx.append(sid, TurnRole::User, &format!("m{}", i), None)
                .unwrap();
        }
        let history = ctx.history(sid).unwrap();
        assert!(history.windows(2).all(|w| w[0].timestamp <= w[1].timestamp));
        assert_eq!(history[0].content, "m0");
        assert_eq!(history[19].content, "m19");
    }

    // ---- Window ----

    #[test]
    fn test_recent_turns_bounded_and_chronological() {
        let (ctx, sid) = setup(4);
        for i in 0..9 {
            ctx.append(sid, TurnRole::User, &format!("m{}", i), None)
                .unwrap();
        }

        let window = ctx.recent_turns(sid, None).unwrap();
        let contents: Vec<&str> = window.iter().map(|t| t.content.as_str()).collect();
        assert_eq!(contents, vec!["m5", "m6", "m7", "m8"]);

        let two = ctx.recent_turns(sid, Some(2)).unwrap();
        assert_eq!(two.len(), 2);
        assert_eq!(two[1].content, "m8");

        assert!(ctx.recent_turns(sid, Some(0)).unwrap().is_empty());
        assert_eq!(ctx.recent_turns(sid, Some(100)).unwrap().len(), 9);
    }

    #[test]
    fn test_recent_turns_unknown_session() {
        let (ctx, _) = setup(10);
        let result = ctx.recent_turns(Uuid::new_v4(), None);
        assert!(matches!(result, Err(ChatError::SessionNotFound(_))));
    }

    // ---- Repetition ----

    #[test]
    fn test_repeat_count_new_message_is_zero() {
        let (ctx, sid) = setup(10);
        assert_eq!(ctx.repeat_count(sid, "How do I reset?").unwrap(), 0);
    }

    #[test]
    fn test_repeat_count_case_insensitive() {
        let (ctx, sid) = setup(10);
        ctx.append(sid, TurnRole::User, "How do I reset?", None)
            .unwrap();
        ctx.append(sid, TurnRole::User, "HOW DO I RESET?", None)
            .unwrap();
        assert_eq!(ctx.repeat_count(sid, "how do i reset?").unwrap(), 2);
    }

    #[test]
    fn test_repeat_count_ignores_assistant_and_near_duplicates() {
        let (ctx, sid) = setup(10);
        ctx.append(sid, TurnRole::Assistant, "how do i reset?", Some(0.85))
            .unwrap();
        ctx.append(sid, TurnRole::User, "how do i reset", None)
            .unwrap();
        assert_eq!(ctx.repeat_count(sid, "how do i reset?").unwrap(), 0);
    }

    #[test]
    fn test_repeat_count_monotone() {
        let (ctx, sid) = setup(10);
        let mut last = 0;
        for msg in ["a", "b", "a", "c", "a"] {
            ctx.append(sid, TurnRole::User, msg, None).unwrap();
            let count = ctx.repeat_count(sid, "a").unwrap();
            assert!(count >= last);
            last = count;
        }
        assert_eq!(last, 3);
    }

    #[test]
    fn test_repeat_count_unicode_lowercase() {
        let (ctx, sid) = setup(10);
        ctx.append(sid, TurnRole::User, "ÜBER", None).unwrap();
        assert_eq!(ctx.repeat_count(sid, "über").unwrap(), 1);
    }
}
