//! Escalation policy: decides when a conversation goes to a human.
//!
//! [`EscalationEngine::decide`] walks [`ESCALATION_RULES`] in order and the
//! first rule that fires produces the decision. It performs no I/O; the
//! orchestrator applies the side effects.

use helpline_core::config::EscalationConfig;
use helpline_core::types::EscalationDecision;

use crate::confidence::word_count;

/// Everything the policy looks at for one exchange.
#[derive(Debug, Clone, Copy)]
pub struct EscalationInputs<'a> {
    pub user_message: &'a str,
    pub answer: &'a str,
    pub confidence: f64,
    /// Earlier user turns identical to `user_message`.
    pub repeat_count: usize,
}

/// A single escalation rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EscalationRule {
    ExplicitIntent,
    LowConfidence,
    Repetition,
    DegenerateAnswer,
}

/// Rules in evaluation order.
pub const ESCALATION_RULES: &[EscalationRule] = &[
    EscalationRule::ExplicitIntent,
    EscalationRule::LowConfidence,
    EscalationRule::Repetition,
    EscalationRule::DegenerateAnswer,
];

impl EscalationRule {
    /// The escalation reason when this rule fires, or `None`.
    fn evaluate(&self, inputs: &EscalationInputs<'_>, policy: &EscalationConfig) -> Option<String> {
        match self {
            EscalationRule::ExplicitIntent => detect_keyword(inputs.user_message, &policy.keywords)
                .map(|kw| format!("User requested human assistance (keyword: '{}')", kw)),
            EscalationRule::LowConfidence => (inputs.confidence < policy.confidence_threshold)
                .then(|| format!("Low confidence response (score: {:.2})", inputs.confidence)),
            EscalationRule::Repetition => (inputs.repeat_count >= policy.repeat_threshold)
                .then(|| format!("User asked similar question {} times", inputs.repeat_count)),
            EscalationRule::DegenerateAnswer => (word_count(inputs.answer) < policy.min_word_count)
                .then(|| "Response too brief, may be unhelpful".to_string()),
        }
    }
}

/// The first keyword contained in `message`, compared case-insensitively.
pub fn detect_keyword<'k>(message: &str, keywords: &'k [String]) -> Option<&'k str> {
    let lower = message.to_lowercase();
    keywords
        .iter()
        .find(|kw| !kw.is_empty() && lower.contains(&kw.to_lowercase()))
        .map(String::as_str)
}

/// Applies an [`EscalationConfig`] to exchanges.
#[derive(Debug, Clone, Default)]
pub struct EscalationEngine {
    policy: EscalationConfig,
}

impl EscalationEngine {
    pub fn new(policy: EscalationConfig) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> &EscalationConfig {
        &self.policy
    }

    /// Keyword in the user message that requests a human, if any.
    pub fn detect_keyword(&self, message: &str) -> Option<&str> {
        detect_keyword(message, &self.policy.keywords)
    }

    pub fn decide(&self, inputs: &EscalationInputs<'_>) -> EscalationDecision {
        ESCALATION_RULES
            .iter()
            .find_map(|rule| rule.evaluate(inputs, &self.policy))
            .map_or_else(EscalationDecision::proceed, EscalationDecision::escalate)
    }

    /// `answer` with the escalation notice appended.
    pub fn with_notice(&self, answer: &str) -> String {
        format!("{}\n\n{}", answer, self.policy.notice)
    }
}
