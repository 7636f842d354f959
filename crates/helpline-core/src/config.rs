use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::{HelplineError, Result};

/// Top-level configuration for the Helpline application.
///
/// Loaded from `~/.helpline/config.toml` by default. Each section corresponds
/// to one stage of the per-message pipeline.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HelplineConfig {
    #[serde(default)]
    pub general: GeneralConfig,
    #[serde(default)]
    pub context: ContextConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub confidence: ConfidenceConfig,
    #[serde(default)]
    pub escalation: EscalationConfig,
    #[serde(default)]
    pub generation: GenerationConfig,
}

impl HelplineConfig {
    /// Load configuration from a TOML file.
    ///
    /// Returns an error if the file cannot be read, parsed, or fails validation.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: HelplineConfig = toml::from_str(&content)?;
        config.validate()?;
        info!("Configuration loaded from {}", path.display());
        Ok(config)
    }

    /// Load configuration from a TOML file, falling back to defaults if the
    /// file does not exist or cannot be parsed.
    pub fn load_or_default(path: &Path) -> Self {
        match Self::load(path) {
            Ok(config) => config,
            Err(e) => {
                warn!(
                    "Failed to load config from {}: {}. Using defaults.",
                    path.display(),
                    e
                );
                Self::default()
            }
        }
    }

    /// Save the current configuration to a TOML file.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        info!("Configuration saved to {}", path.display());
        Ok(())
    }

    /// Reject values the pipeline cannot operate with.
    pub fn validate(&self) -> Result<()> {
        if self.context.window_size == 0 {
            return Err(HelplineError::Config(
                "context.window_size must be at least 1".to_string(),
            ));
        }
        if self.retrieval.top_k == 0 {
            return Err(HelplineError::Config(
                "retrieval.top_k must be at least 1".to_string(),
            ));
        }
        if self.retrieval.dimensions == 0 {
            return Err(HelplineError::Config(
                "retrieval.dimensions must be at least 1".to_string(),
            ));
        }
        check_unit_interval("retrieval.similarity_floor", self.retrieval.similarity_floor)?;
        check_unit_interval(
            "escalation.confidence_threshold",
            self.escalation.confidence_threshold,
        )?;
        Ok(())
    }

    /// Data directory with a leading `~` expanded to the home directory.
    pub fn data_dir(&self) -> PathBuf {
        expand_home(&self.general.data_dir)
    }
}

fn check_unit_interval(name: &str, value: f64) -> Result<()> {
    if (0.0..=1.0).contains(&value) {
        Ok(())
    } else {
        Err(HelplineError::Config(format!(
            "{} must be within [0, 1], got {}",
            name, value
        )))
    }
}

/// Expand `~/` to the user's home directory.
pub fn expand_home(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/").or_else(|| path.strip_prefix("~\\")) {
        #[cfg(target_os = "windows")]
        let home = std::env::var("USERPROFILE").unwrap_or_else(|_| ".".to_string());
        #[cfg(not(target_os = "windows"))]
        let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
        PathBuf::from(home).join(rest)
    } else {
        PathBuf::from(path)
    }
}

/// General application settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Directory holding the SQLite database.
    pub data_dir: String,
    /// Log level: trace, debug, info, warn, error.
    pub log_level: String,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            data_dir: "~/.helpline/data".to_string(),
            log_level: "info".to_string(),
        }
    }
}

/// Conversation context window settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ContextConfig {
    /// Number of prior turns supplied to the generator.
    pub window_size: usize,
    /// Maximum accepted length of a user message, in characters.
    pub max_message_chars: usize,
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            window_size: 10,
            max_message_chars: 2000,
        }
    }
}

/// FAQ retrieval settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrievalConfig {
    /// Maximum FAQ entries added to a prompt.
    pub top_k: usize,
    /// Entries at or below this cosine similarity are dropped.
    pub similarity_floor: f64,
    /// Embedding dimensionality.
    pub dimensions: usize,
    /// Directory containing `model.onnx` and `tokenizer.json`.
    /// When unset the deterministic mock embedder is used.
    pub model_dir: Option<String>,
    /// Timeout for embedding a single query.
    pub embed_timeout_secs: u64,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: 3,
            similarity_floor: 0.5,
            dimensions: 384,
            model_dir: None,
            embed_timeout_secs: 10,
        }
    }
}

/// Lexical confidence heuristic settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConfidenceConfig {
    /// Phrases that mark an answer as uncertain (case-insensitive).
    pub low_confidence_phrases: Vec<String>,
    /// Answers with fewer words score as short.
    pub min_word_count: usize,
    /// Answers with more question marks score as clarifying.
    pub max_question_marks: usize,
}

impl Default for ConfidenceConfig {
    fn default() -> Self {
        Self {
            low_confidence_phrases: [
                "i don't know",
                "i'm not sure",
                "i cannot",
                "i can't help",
                "outside my knowledge",
                "beyond my capability",
                "i don't have information",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
            min_word_count: 10,
            max_question_marks: 2,
        }
    }
}

/// Escalation policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EscalationConfig {
    /// Phrases in a user message that request a human (case-insensitive).
    pub keywords: Vec<String>,
    /// Answers scoring below this escalate.
    pub confidence_threshold: f64,
    /// Prior identical questions needed to escalate.
    pub repeat_threshold: usize,
    /// Answers with fewer words escalate.
    pub min_word_count: usize,
    /// Appended to the answer when a session is escalated.
    pub notice: String,
    /// Reply used when a keyword short-circuits generation.
    pub acknowledgement: String,
}

impl Default for EscalationConfig {
    fn default() -> Self {
        Self {
            keywords: [
                "speak to human",
                "speak to a human",
                "talk to human",
                "talk to a human",
                "human agent",
                "real person",
                "actual person",
                "live person",
                "manager",
                "supervisor",
                "escalate",
                "not helpful",
                "this isn't working",
                "frustrated",
                "angry",
                "speak with someone",
                "talk to someone",
                "connect me to",
                "transfer me to",
                "representative",
                "support person",
                "customer service",
                "live chat",
                "human help",
                "real help",
                "actual help",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
            confidence_threshold: 0.7,
            repeat_threshold: 3,
            min_word_count: 5,
            notice: "[This conversation has been escalated to a human agent who will assist you shortly.]"
                .to_string(),
            acknowledgement: "I understand you'd like to speak with a human representative. Let me connect you right away."
                .to_string(),
        }
    }
}

/// Text generation provider settings (OpenAI-compatible endpoint).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GenerationConfig {
    pub base_url: String,
    pub model: String,
    /// Name of the environment variable holding the API key.
    pub api_key_env: String,
    pub temperature: f64,
    pub max_tokens: u32,
    pub timeout_secs: u64,
    /// Contact offered to the user when generation fails.
    pub support_contact: String,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.groq.com/openai/v1".to_string(),
            model: "llama-3.3-70b-versatile".to_string(),
            api_key_env: "GROQ_API_KEY".to_string(),
            temperature: 0.7,
            max_tokens: 1024,
            timeout_secs: 30,
            support_contact: "support@example.com".to_string(),
        }
    }
}
