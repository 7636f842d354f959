//! Persistence contract consumed by the decision core.
//!
//! The chat pipeline never talks to a database directly; it goes through
//! this trait so storage can be swapped (SQLite in production, whatever a
//! test needs elsewhere).

use uuid::Uuid;

use crate::error::Result;
use crate::types::{
    ConversationTurn, EscalationRecord, FaqEntry, Session, SessionStatus, TurnRole,
};

/// Storage operations over sessions, turns, FAQs, and escalations.
pub trait SupportRepository: Send + Sync {
    /// Create a new active session.
    fn create_session(&self, user_id: Option<&str>) -> Result<Session>;

    /// Look up a session. `Ok(None)` when it does not exist.
    fn get_session(&self, session_id: Uuid) -> Result<Option<Session>>;

    /// Move a session to `status`, enforcing the status state machine.
    fn set_session_status(&self, session_id: Uuid, status: SessionStatus) -> Result<Session>;

    /// Store a conversation summary on a session.
    fn set_session_summary(&self, session_id: Uuid, summary: &str) -> Result<()>;

    /// Append a turn. Timestamps are non-decreasing within a session and ties
    /// keep insertion order.
    fn append_turn(
        &self,
        session_id: Uuid,
        role: TurnRole,
        content: &str,
        confidence: Option<f64>,
    ) -> Result<ConversationTurn>;

    /// The `limit` most recent turns, oldest first.
    fn recent_turns(&self, session_id: Uuid, limit: usize) -> Result<Vec<ConversationTurn>>;

    /// Every user turn of a session, oldest first.
    fn user_turns(&self, session_id: Uuid) -> Result<Vec<ConversationTurn>>;

    /// The full transcript of a session, oldest first.
    fn all_turns(&self, session_id: Uuid) -> Result<Vec<ConversationTurn>>;

    /// All FAQ entries, ordered by id.
    fn faq_entries(&self) -> Result<Vec<FaqEntry>>;

    /// Persist a derived embedding for an FAQ entry, tagged with the id of
    /// the embedder that produced it.
    fn store_faq_embedding(&self, faq_id: i64, model: &str, embedding: &[f32]) -> Result<()>;

    /// Transition a session to escalated. Idempotent for escalated sessions.
    fn mark_escalated(&self, session_id: Uuid) -> Result<()>;

    /// Create a pending escalation record.
    fn create_escalation(&self, session_id: Uuid, reason: &str) -> Result<EscalationRecord>;

    /// Create a pending escalation record and mark the session escalated as
    /// one atomic write. Nothing is stored when either step fails.
    fn escalate(&self, session_id: Uuid, reason: &str) -> Result<EscalationRecord>;
}
