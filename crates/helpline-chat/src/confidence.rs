//! Lexical confidence heuristic for generated answers.
//!
//! Rules are checked in [`CONFIDENCE_RULES`] order and the first match sets
//! the score. An answer matching no rule gets [`DEFAULT_CONFIDENCE`].

use helpline_core::config::ConfidenceConfig;

/// Score for an answer no rule flags.
pub const DEFAULT_CONFIDENCE: f64 = 0.85;

/// A single confidence rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfidenceRule {
    /// The answer contains a hedging phrase.
    LowConfidencePhrase,
    /// The answer has fewer words than the configured floor.
    TooShort,
    /// The answer asks more clarifying questions than allowed.
    TooManyQuestions,
}

/// Rules in evaluation order.
pub const CONFIDENCE_RULES: &[ConfidenceRule] = &[
    ConfidenceRule::LowConfidencePhrase,
    ConfidenceRule::TooShort,
    ConfidenceRule::TooManyQuestions,
];

impl ConfidenceRule {
    pub fn score(&self) -> f64 {
        match self {
            ConfidenceRule::LowConfidencePhrase => 0.3,
            ConfidenceRule::TooShort => 0.6,
            ConfidenceRule::TooManyQuestions => 0.65,
        }
    }

    fn matches(&self, answer: &str, lower: &str, config: &ConfidenceConfig) -> bool {
        match self {
            ConfidenceRule::LowConfidencePhrase => config
                .low_confidence_phrases
                .iter()
                .any(|phrase| lower.contains(&phrase.to_lowercase())),
            ConfidenceRule::TooShort => word_count(answer) < config.min_word_count,
            ConfidenceRule::TooManyQuestions => {
                answer.matches('?').count() > config.max_question_marks
            }
        }
    }
}

/// Whitespace-delimited word count.
pub fn word_count(text: &str) -> usize {
    text.split_whitespace().count()
}

/// Scores answers with the configured rule table.
#[derive(Debug, Clone, Default)]
pub struct ConfidenceEstimator {
    config: ConfidenceConfig,
}

impl ConfidenceEstimator {
    pub fn new(config: ConfidenceConfig) -> Self {
        Self { config }
    }

    /// The first rule `answer` trips, if any.
    pub fn matching_rule(&self, answer: &str) -> Option<ConfidenceRule> {
        let lower = answer.to_lowercase();
        CONFIDENCE_RULES
            .iter()
            .copied()
            .find(|rule| rule.matches(answer, &lower, &self.config))
    }

    /// Confidence in [0, 1] for a generated answer.
    pub fn score(&self, answer: &str) -> f64 {
        self.matching_rule(answer)
            .map_or(DEFAULT_CONFIDENCE, |rule| rule.score())
    }
}
