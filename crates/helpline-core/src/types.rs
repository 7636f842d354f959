use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::HelplineError;

// =============================================================================
// Enums
// =============================================================================

/// Author of a conversation turn.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnRole {
    User,
    Assistant,
}

impl TurnRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            TurnRole::User => "user",
            TurnRole::Assistant => "assistant",
        }
    }
}

impl fmt::Display for TurnRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TurnRole {
    type Err = HelplineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "user" => Ok(TurnRole::User),
            "assistant" => Ok(TurnRole::Assistant),
            other => Err(HelplineError::Serialization(format!(
                "unknown turn role: {}",
                other
            ))),
        }
    }
}

/// Role of a message sent to the generator.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageRole {
    System,
    User,
    Assistant,
}

impl From<TurnRole> for MessageRole {
    fn from(role: TurnRole) -> Self {
        match role {
            TurnRole::User => MessageRole::User,
            TurnRole::Assistant => MessageRole::Assistant,
        }
    }
}

/// Lifecycle status of a support session.
///
/// Valid transitions:
/// - Active -> Escalated
/// - Active -> Closed
/// - Escalated -> Escalated (repeat escalation, no-op)
/// - Escalated -> Closed
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    #[default]
    Active,
    Escalated,
    Closed,
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::Active => "active",
            SessionStatus::Escalated => "escalated",
            SessionStatus::Closed => "closed",
        }
    }

    /// Whether moving from `self` to `to` is permitted.
    pub fn can_transition_to(&self, to: SessionStatus) -> bool {
        matches!(
            (self, to),
            (SessionStatus::Active, SessionStatus::Escalated)
                | (SessionStatus::Active, SessionStatus::Closed)
                | (SessionStatus::Escalated, SessionStatus::Escalated)
                | (SessionStatus::Escalated, SessionStatus::Closed)
        )
    }

    /// Validate a transition, returning the target status on success.
    pub fn transition(self, to: SessionStatus) -> Result<SessionStatus, HelplineError> {
        if self.can_transition_to(to) {
            Ok(to)
        } else {
            Err(HelplineError::InvalidTransition { from: self, to })
        }
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SessionStatus {
    type Err = HelplineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(SessionStatus::Active),
            "escalated" => Ok(SessionStatus::Escalated),
            "closed" => Ok(SessionStatus::Closed),
            other => Err(HelplineError::Serialization(format!(
                "unknown session status: {}",
                other
            ))),
        }
    }
}

/// Status of an escalation record handed to human agents.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EscalationStatus {
    #[default]
    Pending,
    Resolved,
    Cancelled,
}

impl EscalationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            EscalationStatus::Pending => "pending",
            EscalationStatus::Resolved => "resolved",
            EscalationStatus::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for EscalationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EscalationStatus {
    type Err = HelplineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(EscalationStatus::Pending),
            "resolved" => Ok(EscalationStatus::Resolved),
            "cancelled" => Ok(EscalationStatus::Cancelled),
            other => Err(HelplineError::Serialization(format!(
                "unknown escalation status: {}",
                other
            ))),
        }
    }
}

// =============================================================================
// Records
// =============================================================================

/// A frequently-asked question with its canonical answer.
///
/// `embedding` is derived from `question` and `answer` and is cleared by the
/// repository whenever either text changes.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FaqEntry {
    pub id: i64,
    pub question: String,
    pub answer: String,
    pub category: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embedding: Option<Vec<f32>>,
    /// Id of the embedder that produced `embedding`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embedding_model: Option<String>,
}

impl FaqEntry {
    /// Text fed to the embedding model for this entry.
    pub fn embedding_text(&self) -> String {
        format!("{} {}", self.question, self.answer)
    }
}

/// Fields for a new FAQ entry. Also the item shape of FAQ import files.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct NewFaq {
    pub question: String,
    pub answer: String,
    #[serde(default)]
    pub category: Option<String>,
}

/// Partial update to an FAQ entry. `None` leaves a field untouched.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct FaqUpdate {
    pub question: Option<String>,
    pub answer: Option<String>,
    pub category: Option<String>,
}

/// A single turn in a support conversation.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ConversationTurn {
    pub id: Uuid,
    pub session_id: Uuid,
    pub role: TurnRole,
    pub content: String,
    pub timestamp: DateTime<Utc>,
    /// Only set on assistant turns; always within [0, 1].
    pub confidence: Option<f64>,
}

/// A support session.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub id: Uuid,
    pub user_id: Option<String>,
    pub status: SessionStatus,
    pub summary: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A queued request for human attention.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EscalationRecord {
    pub id: Uuid,
    pub session_id: Uuid,
    pub reason: String,
    pub status: EscalationStatus,
    pub created_at: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
}

/// Outcome of the escalation engine. Not persisted.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct EscalationDecision {
    pub should_escalate: bool,
    pub reason: Option<String>,
}

impl EscalationDecision {
    pub fn escalate(reason: impl Into<String>) -> Self {
        Self {
            should_escalate: true,
            reason: Some(reason.into()),
        }
    }

    pub fn proceed() -> Self {
        Self::default()
    }
}

/// One message of a generator prompt.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: MessageRole,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::Assistant,
            content: content.into(),
        }
    }
}

impl From<&ConversationTurn> for ChatMessage {
    fn from(turn: &ConversationTurn) -> Self {
        Self {
            role: turn.role.into(),
            content: turn.content.clone(),
        }
    }
}
