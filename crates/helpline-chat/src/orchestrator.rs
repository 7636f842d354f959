//! Support orchestrator: runs one user message through retrieval,
//! generation, scoring and escalation.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use uuid::Uuid;

use helpline_core::config::{HelplineConfig, RetrievalConfig};
use helpline_core::repository::SupportRepository;
use helpline_core::types::{ChatMessage, FaqEntry, SessionStatus, TurnRole};
use helpline_vector::EmbeddingIndex;

use crate::confidence::ConfidenceEstimator;
use crate::context::ContextWindow;
use crate::error::ChatError;
use crate::escalation::{EscalationEngine, EscalationInputs};
use crate::generator::{CompletionOptions, Generator};
use crate::prompt;

/// Returned by [`SupportOrchestrator::summarize_session`] when no summary
/// could be produced.
pub const SUMMARY_UNAVAILABLE: &str = "Summary unavailable";

/// Confidence assigned to the keyword acknowledgement.
const ACKNOWLEDGEMENT_CONFIDENCE: f64 = 0.85;

/// Sampling used for conversation summaries.
const SUMMARY_OPTIONS: CompletionOptions = CompletionOptions {
    temperature: Some(0.5),
    max_tokens: Some(150),
};

/// An incoming user message.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChatRequest {
    /// Existing session to continue; a new one is created when absent.
    pub session_id: Option<Uuid>,
    pub user_id: Option<String>,
    pub message: String,
}

impl ChatRequest {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            ..Self::default()
        }
    }

    pub fn in_session(mut self, session_id: Uuid) -> Self {
        self.session_id = Some(session_id);
        self
    }
}

/// The assistant's answer to a [`ChatRequest`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatReply {
    pub session_id: Uuid,
    pub message: String,
    pub confidence: f64,
    pub escalated: bool,
    pub escalation_reason: Option<String>,
    pub timestamp: DateTime<Utc>,
}

/// Coordinates context, retrieval, generation and escalation for a
/// support conversation.
pub struct SupportOrchestrator {
    repo: Arc<dyn SupportRepository>,
    index: Arc<EmbeddingIndex>,
    generator: Arc<dyn Generator>,
    context: ContextWindow,
    confidence: ConfidenceEstimator,
    escalation: EscalationEngine,
    retrieval: RetrievalConfig,
    max_message_chars: usize,
    generation_timeout: Duration,
    support_contact: String,
}

impl SupportOrchestrator {
    pub fn new(
        repo: Arc<dyn SupportRepository>,
        index: Arc<EmbeddingIndex>,
        generator: Arc<dyn Generator>,
        config: &HelplineConfig,
    ) -> Self {
        Self {
            context: ContextWindow::new(Arc::clone(&repo), config.context.window_size),
            repo,
            index,
            generator,
            confidence: ConfidenceEstimator::new(config.confidence.clone()),
            escalation: EscalationEngine::new(config.escalation.clone()),
            retrieval: config.retrieval.clone(),
            max_message_chars: config.context.max_message_chars,
            generation_timeout: Duration::from_secs(config.generation.timeout_secs),
            support_contact: config.generation.support_contact.clone(),
        }
    }

    pub fn context(&self) -> &ContextWindow {
        &self.context
    }

    /// The answer used when generation fails or times out.
    pub fn fallback_answer(&self) -> String {
        format!(
            "I apologize, but I'm having trouble processing your request right now. \
             Please try again or contact support at {}",
            self.support_contact
        )
    }

    /// Answer one user message.
    ///
    /// The user turn is persisted before any generation is attempted, so it
    /// survives generator failures.
    pub async fn handle_message(&self, request: ChatRequest) -> Result<ChatReply, ChatError> {
        let started = Instant::now();
        let message = request.message.as_str();

        if message.trim().is_empty() {
            return Err(ChatError::EmptyMessage);
        }
        if message.chars().count() > self.max_message_chars {
            return Err(ChatError::MessageTooLong(self.max_message_chars));
        }

        let session_id = self.resolve_session(&request)?;

        // Both read before the current message is stored.
        let repeat_count = self.context.repeat_count(session_id, message)?;
        let history = self.context.recent_turns(session_id, None)?;

        self.context.append(session_id, TurnRole::User, message, None)?;

        let (answer, confidence) = match self.escalation.detect_keyword(message) {
            Some(keyword) => {
                debug!(session_id = %session_id, keyword, "Escalation keyword, skipping generation");
                (
                    self.escalation.policy().acknowledgement.clone(),
                    ACKNOWLEDGEMENT_CONFIDENCE,
                )
            }
            None => {
                let faqs = self.retrieve(session_id, message).await;
                let messages = prompt::build_answer_prompt(&history, &faqs, message);
                match self.generate(session_id, &messages, None).await {
                    Some(answer) => {
                        let confidence = self.confidence.score(&answer);
                        (answer, confidence)
                    }
                    None => (self.fallback_answer(), 0.0),
                }
            }
        };

        let decision = self.escalation.decide(&EscalationInputs {
            user_message: message,
            answer: &answer,
            confidence,
            repeat_count,
        });

        let final_answer = match decision.reason.as_deref() {
            Some(reason) if decision.should_escalate => {
                let record = self.repo.escalate(session_id, reason)?;
                info!(
                    session_id = %session_id,
                    escalation_id = %record.id,
                    reason,
                    "Session escalated"
                );
                self.escalation.with_notice(&answer)
            }
            _ => answer,
        };

        let turn = self.context.append(
            session_id,
            TurnRole::Assistant,
            &final_answer,
            Some(confidence),
        )?;

        debug!(
            session_id = %session_id,
            confidence,
            repeat_count,
            escalated = decision.should_escalate,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Message handled"
        );

        Ok(ChatReply {
            session_id,
            message: final_answer,
            confidence,
            escalated: decision.should_escalate,
            escalation_reason: decision.reason,
            timestamp: turn.timestamp,
        })
    }

    /// Summarize a session's transcript in 1-2 sentences and store it.
    ///
    /// Returns [`SUMMARY_UNAVAILABLE`] (not stored) when the transcript is
    /// empty or generation fails.
    pub async fn summarize_session(&self, session_id: Uuid) -> Result<String, ChatError> {
        let transcript = self.context.history(session_id)?;
        if transcript.is_empty() {
            return Ok(SUMMARY_UNAVAILABLE.to_string());
        }

        let messages = prompt::build_summary_prompt(&transcript);
        let summary = match self
            .generate(session_id, &messages, Some(SUMMARY_OPTIONS))
            .await
        {
            Some(text) if !text.trim().is_empty() => text.trim().to_string(),
            _ => return Ok(SUMMARY_UNAVAILABLE.to_string()),
        };

        self.repo.set_session_summary(session_id, &summary)?;
        info!(session_id = %session_id, "Session summary stored");
        Ok(summary)
    }

    fn resolve_session(&self, request: &ChatRequest) -> Result<Uuid, ChatError> {
        match request.session_id {
            Some(id) => {
                let session = self
                    .repo
                    .get_session(id)?
                    .ok_or(ChatError::SessionNotFound(id))?;
                if session.status == SessionStatus::Closed {
                    return Err(ChatError::SessionClosed(id));
                }
                Ok(id)
            }
            None => {
                let session = self.repo.create_session(request.user_id.as_deref())?;
                info!(session_id = %session.id, "Session created");
                Ok(session.id)
            }
        }
    }

    /// Relevant FAQs for `message`. Any failure degrades to no context.
    async fn retrieve(&self, session_id: Uuid, message: &str) -> Vec<FaqEntry> {
        let timeout = Duration::from_secs(self.retrieval.embed_timeout_secs);
        let query = self.index.query(
            message,
            self.retrieval.top_k,
            self.retrieval.similarity_floor,
        );

        match tokio::time::timeout(timeout, query).await {
            Ok(Ok(hits)) => {
                debug!(session_id = %session_id, faq_count = hits.len(), "FAQs retrieved");
                hits.into_iter().map(|hit| hit.entry).collect()
            }
            Ok(Err(e)) => {
                warn!(session_id = %session_id, error = %e, "FAQ retrieval unavailable");
                Vec::new()
            }
            Err(_) => {
                warn!(
                    session_id = %session_id,
                    timeout_secs = self.retrieval.embed_timeout_secs,
                    "FAQ retrieval timed out"
                );
                Vec::new()
            }
        }
    }

    /// Run the generator under the configured timeout. `None` on failure.
    async fn generate(
        &self,
        session_id: Uuid,
        messages: &[ChatMessage],
        options: Option<CompletionOptions>,
    ) -> Option<String> {
        let call = async {
            match options {
                Some(options) => self.generator.complete_with(messages, options).await,
                None => self.generator.complete(messages).await,
            }
        };

        match tokio::time::timeout(self.generation_timeout, call).await {
            Ok(Ok(text)) => Some(text),
            Ok(Err(e)) => {
                warn!(session_id = %session_id, error = %e, "Generation failed");
                None
            }
            Err(_) => {
                warn!(
                    session_id = %session_id,
                    timeout_secs = self.generation_timeout.as_secs(),
                    "Generation timed out"
                );
                None
            }
        }
    }
}

impl std::fmt::Debug for SupportOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SupportOrchestrator")
            .field("context", &self.context)
            .field("index", &self.index)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    use async_trait::async_trait;
    use helpline_storage::SqliteRepository;
    use helpline_vector::MockEmbedding;

    const GOOD_ANSWER: &str =
        "You can reset your password from the login page by clicking the forgot password link.";

    /// Replies with queued answers and records every prompt.
    #[derive(Default)]
    struct ScriptedGenerator {
        replies: Mutex<Vec<Result<String, ChatError>>>,
        prompts: Mutex<Vec<Vec<ChatMessage>>>,
    }

    impl ScriptedGenerator {
        fn replying(mut replies: Vec<Result<String, ChatError>>) -> Self {
            replies.reverse();
            Self {
                replies: Mutex::new(replies),
                prompts: Mutex::new(Vec::new()),
            }
        }

        fn calls(&self) -> usize {
            self.prompts.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl Generator for ScriptedGenerator {
        async fn complete(&self, messages: &[ChatMessage]) -> Result<String, ChatError> {
            self.prompts.lock().unwrap().push(messages.to_vec());
            self.replies
                .lock()
                .unwrap()
                .pop()
                .unwrap_or_else(|| Ok(GOOD_ANSWER.to_string()))
        }
    }

    struct Harness {
        repo: SqliteRepository,
        generator: Arc<ScriptedGenerator>,
        orchestrator: SupportOrchestrator,
    }

    fn harness(generator: ScriptedGenerator) -> Harness {
        harness_with(generator, HelplineConfig::default())
    }

    fn harness_with(generator: ScriptedGenerator, config: HelplineConfig) -> Harness {
        let repo = SqliteRepository::in_memory().unwrap();
        let generator = Arc::new(generator);
        let index = Arc::new(EmbeddingIndex::new(MockEmbedding::with_dimensions(16)));
        let orchestrator = SupportOrchestrator::new(
            Arc::new(repo.clone()),
            index,
            generator.clone(),
            &config,
        );
        Harness {
            repo,
            generator,
            orchestrator,
        }
    }

    // ---- Validation ----

    #[tokio::test]
    async fn test_empty_message_rejected() {
        let h = harness(ScriptedGenerator::default());
        let result = h.orchestrator.handle_message(ChatRequest::new("   ")).await;
        assert!(matches!(result, Err(ChatError::EmptyMessage)));
        assert!(h.repo.list_sessions(None, 0, 10).unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_message_length_limit_counts_chars() {
        let h = harness(ScriptedGenerator::default());
        let at_limit = "é".repeat(2000);
        assert!(h
            .orchestrator
            .handle_message(ChatRequest::new(at_limit))
            .await
            .is_ok());

        let result = h
            .orchestrator
            .handle_message(ChatRequest::new("a".repeat(2001)))
            .await;
        assert!(matches!(result, Err(ChatError::MessageTooLong(2000))));
    }

    #[tokio::test]
    async fn test_unknown_session() {
        let h = harness(ScriptedGenerator::default());
        let result = h
            .orchestrator
            .handle_message(ChatRequest::new("hello").in_session(Uuid::new_v4()))
            .await;
        assert!(matches!(result, Err(ChatError::SessionNotFound(_))));
    }

    #[tokio::test]
    async fn test_closed_session_rejected() {
        let h = harness(ScriptedGenerator::default());
        let session = h.repo.create_session(None).unwrap();
        h.repo
            .set_session_status(session.id, SessionStatus::Closed)
            .unwrap();

        let result = h
            .orchestrator
            .handle_message(ChatRequest::new("hello").in_session(session.id))
            .await;
        assert!(matches!(result, Err(ChatError::SessionClosed(id)) if id == session.id));
        assert!(h.repo.all_turns(session.id).unwrap().is_empty());
    }

    // ---- Flow ----

    #[tokio::test]
    async fn test_confident_answer_not_escalated() {
        let h = harness(ScriptedGenerator::default());
        let reply = h
            .orchestrator
            .handle_message(ChatRequest {
                user_id: Some("u-1".to_string()),
                ..ChatRequest::new("How do I reset my password?")
            })
            .await
            .unwrap();

        assert_eq!(reply.message, GOOD_ANSWER);
        assert_eq!(reply.confidence, 0.85);
        assert!(!reply.escalated);
        assert_eq!(reply.escalation_reason, None);

        let session = h.repo.get_session(reply.session_id).unwrap().unwrap();
        assert_eq!(session.user_id.as_deref(), Some("u-1"));
        assert_eq!(session.status, SessionStatus::Active);

        let turns = h.repo.all_turns(reply.session_id).unwrap();
        assert_eq!(turns.len(), 2);
        assert_eq!(turns[1].confidence, Some(0.85));
        assert_eq!(turns[1].timestamp, reply.timestamp);
    }

    #[tokio::test]
    async fn test_prompt_excludes_current_message_from_history() {
        let h = harness(ScriptedGenerator::default());
        let first = h
            .orchestrator
            .handle_message(ChatRequest::new("first question here"))
            .await
            .unwrap();
        h.orchestrator
            .handle_message(ChatRequest::new("second question here").in_session(first.session_id))
            .await
            .unwrap();

        let prompts = h.generator.prompts.lock().unwrap();
        let second = &prompts[1];
        let occurrences = second
            .iter()
            .filter(|m| m.content == "second question here")
            .count();
        assert_eq!(occurrences, 1);
        assert_eq!(second.last().unwrap().content, "second question here");
        // system prompt, first user turn, first answer, current message
        assert_eq!(second.len(), 4);
    }

    #[tokio::test]
    async fn test_keyword_skips_generation() {
        let h = harness(ScriptedGenerator::default());
        let reply = h
            .orchestrator
            .handle_message(ChatRequest::new("I want to speak to a manager"))
            .await
            .unwrap();

        assert_eq!(h.generator.calls(), 0);
        assert!(reply.escalated);
        assert_eq!(reply.confidence, 0.85);
        assert_eq!(
            reply.escalation_reason.as_deref(),
            Some("User requested human assistance (keyword: 'manager')")
        );
        assert!(reply.message.starts_with(
            "I understand you'd like to speak with a human representative. Let me connect you right away."
        ));
        assert!(reply.message.ends_with(
            "\n\n[This conversation has been escalated to a human agent who will assist you shortly.]"
        ));
    }

    #[tokio::test]
    async fn test_generation_failure_uses_fallback() {
        let h = harness(ScriptedGenerator::replying(vec![Err(
            ChatError::GenerationUnavailable("down".to_string()),
        )]));
        let reply = h
            .orchestrator
            .handle_message(ChatRequest::new("Where is my order?"))
            .await
            .unwrap();

        assert_eq!(reply.confidence, 0.0);
        assert!(reply.message.starts_with(&h.orchestrator.fallback_answer()));
        assert!(reply.message.contains("support@example.com"));
        assert!(reply.escalated);
        assert_eq!(
            reply.escalation_reason.as_deref(),
            Some("Low confidence response (score: 0.00)")
        );

        let turns = h.repo.all_turns(reply.session_id).unwrap();
        assert_eq!(turns[0].content, "Where is my order?");
    }

    #[tokio::test(start_paused = true)]
    async fn test_generation_timeout_uses_fallback() {
        struct Stalled;

        #[async_trait]
        impl Generator for Stalled {
            async fn complete(&self, _messages: &[ChatMessage]) -> Result<String, ChatError> {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Ok(GOOD_ANSWER.to_string())
            }
        }

        let repo = SqliteRepository::in_memory().unwrap();
        let orchestrator = SupportOrchestrator::new(
            Arc::new(repo.clone()),
            Arc::new(EmbeddingIndex::new(MockEmbedding::with_dimensions(16))),
            Arc::new(Stalled),
            &HelplineConfig::default(),
        );

        let reply = orchestrator
            .handle_message(ChatRequest::new("Where is my order?"))
            .await
            .unwrap();
        assert_eq!(reply.confidence, 0.0);
        assert!(reply.escalated);
    }

    #[tokio::test]
    async fn test_escalated_session_keeps_accepting_messages() {
        let h = harness(ScriptedGenerator::default());
        let first = h
            .orchestrator
            .handle_message(ChatRequest::new("get me a supervisor"))
            .await
            .unwrap();
        let second = h
            .orchestrator
            .handle_message(ChatRequest::new("still need a supervisor").in_session(first.session_id))
            .await
            .unwrap();

        assert!(second.escalated);
        let session = h.repo.get_session(first.session_id).unwrap().unwrap();
        assert_eq!(session.status, SessionStatus::Escalated);
        let records = h.repo.list_escalations(None, 0, 10).unwrap();
        assert_eq!(records.len(), 2);
    }

    // ---- Summaries ----

    #[tokio::test]
    async fn test_summarize_stores_summary() {
        let h = harness(ScriptedGenerator::replying(vec![
            Ok(GOOD_ANSWER.to_string()),
            Ok("  User asked about password resets.  ".to_string()),
        ]));
        let reply = h
            .orchestrator
            .handle_message(ChatRequest::new("How do I reset my password?"))
            .await
            .unwrap();

        let summary = h
            .orchestrator
            .summarize_session(reply.session_id)
            .await
            .unwrap();
        assert_eq!(summary, "User asked about password resets.");

        let session = h.repo.get_session(reply.session_id).unwrap().unwrap();
        assert_eq!(session.summary.as_deref(), Some("User asked about password resets."));

        let prompts = h.generator.prompts.lock().unwrap();
        assert!(prompts[1][0].content.contains("USER: How do I reset my password?"));
    }

    #[tokio::test]
    async fn test_summarize_failure_not_stored() {
        let h = harness(ScriptedGenerator::replying(vec![
            Ok(GOOD_ANSWER.to_string()),
            Err(ChatError::GenerationUnavailable("down".to_string())),
        ]));
        let reply = h
            .orchestrator
            .handle_message(ChatRequest::new("How do I reset my password?"))
            .await
            .unwrap();

        let summary = h
            .orchestrator
            .summarize_session(reply.session_id)
            .await
            .unwrap();
        assert_eq!(summary, SUMMARY_UNAVAILABLE);
        let session = h.repo.get_session(reply.session_id).unwrap().unwrap();
        assert_eq!(session.summary, None);
    }

    #[tokio::test]
    async fn test_summarize_unknown_session() {
        let h = harness(ScriptedGenerator::default());
        let result = h.orchestrator.summarize_session(Uuid::new_v4()).await;
        assert!(matches!(result, Err(ChatError::SessionNotFound(_))));
    }

    #[tokio::test]
    async fn test_custom_support_contact() {
        let mut config = HelplineConfig::default();
        config.generation.support_contact = "help@acme.test".to_string();
        let h = harness_with(ScriptedGenerator::default(), config);
        assert!(h.orchestrator.fallback_answer().ends_with("help@acme.test"));
    }
}
