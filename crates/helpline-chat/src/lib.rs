//! Support conversation pipeline for Helpline.
//!
//! Provides the context window over stored turns, the confidence heuristic,
//! the escalation policy, prompt construction, text generation backends,
//! and the orchestrator that runs a user message through all of them.

pub mod confidence;
pub mod context;
pub mod error;
pub mod escalation;
pub mod generator;
pub mod orchestrator;
pub mod prompt;

pub use confidence::{ConfidenceEstimator, ConfidenceRule, CONFIDENCE_RULES};
pub use context::ContextWindow;
pub use error::ChatError;
pub use escalation::{EscalationEngine, EscalationInputs, EscalationRule, ESCALATION_RULES};
pub use generator::{CompletionOptions, Generator, OpenAiCompatGenerator};
pub use orchestrator::{ChatReply, ChatRequest, SupportOrchestrator, SUMMARY_UNAVAILABLE};
