//! Text generation backends.
//!
//! [`OpenAiCompatGenerator`] talks to any OpenAI-compatible
//! `/chat/completions` endpoint (Groq by default).

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use helpline_core::config::GenerationConfig;
use helpline_core::types::ChatMessage;

use crate::error::ChatError;

/// Per-call overrides of the generator's sampling settings.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct CompletionOptions {
    pub temperature: Option<f64>,
    pub max_tokens: Option<u32>,
}

/// Produces an assistant reply for a prompt.
#[async_trait]
pub trait Generator: Send + Sync {
    async fn complete(&self, messages: &[ChatMessage]) -> Result<String, ChatError>;

    /// Like [`Generator::complete`], honouring `options` where supported.
    async fn complete_with(
        &self,
        messages: &[ChatMessage],
        _options: CompletionOptions,
    ) -> Result<String, ChatError> {
        self.complete(messages).await
    }
}

#[derive(Serialize)]
struct CompletionRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    temperature: f64,
    max_tokens: u32,
    top_p: f64,
    stream: bool,
}

#[derive(Deserialize)]
struct CompletionResponse {
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Deserialize)]
struct ResponseMessage {
    content: Option<String>,
}

/// Generator for OpenAI-compatible chat completion APIs.
#[derive(Clone)]
pub struct OpenAiCompatGenerator {
    client: reqwest::Client,
    base_url: String,
    model: String,
    api_key: Option<String>,
    temperature: f64,
    max_tokens: u32,
}

impl std::fmt::Debug for OpenAiCompatGenerator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenAiCompatGenerator")
            .field("base_url", &self.base_url)
            .field("model", &self.model)
            .field("has_api_key", &self.api_key.is_some())
            .finish()
    }
}

impl OpenAiCompatGenerator {
    pub fn new(
        base_url: impl Into<String>,
        model: impl Into<String>,
        api_key: Option<String>,
        timeout: Duration,
    ) -> Result<Self, ChatError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ChatError::GenerationUnavailable(format!("HTTP client: {}", e)))?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            model: model.into(),
            api_key,
            temperature: 0.7,
            max_tokens: 1024,
        })
    }

    /// Build from config, reading the API key from `api_key_env`.
    ///
    /// A missing key is not an error here; completions fail until it is set.
    pub fn from_config(config: &GenerationConfig) -> Result<Self, ChatError> {
        let api_key = std::env::var(&config.api_key_env)
            .ok()
            .filter(|key| !key.is_empty());
        Ok(Self::new(
            &config.base_url,
            &config.model,
            api_key,
            Duration::from_secs(config.timeout_secs),
        )?
        .with_sampling(config.temperature, config.max_tokens))
    }

    pub fn with_sampling(mut self, temperature: f64, max_tokens: u32) -> Self {
        self.temperature = temperature;
        self.max_tokens = max_tokens;
        self
    }

    pub fn has_api_key(&self) -> bool {
        self.api_key.is_some()
    }
}

#[async_trait]
impl Generator for OpenAiCompatGenerator {
    async fn complete(&self, messages: &[ChatMessage]) -> Result<String, ChatError> {
        self.complete_with(messages, CompletionOptions::default()).await
    }

    async fn complete_with(
        &self,
        messages: &[ChatMessage],
        options: CompletionOptions,
    ) -> Result<String, ChatError> {
        let api_key = self
            .api_key
            .as_deref()
            .ok_or_else(|| ChatError::GenerationUnavailable("API key not configured".into()))?;

        let payload = CompletionRequest {
            model: &self.model,
            messages,
            temperature: options.temperature.unwrap_or(self.temperature),
            max_tokens: options.max_tokens.unwrap_or(self.max_tokens),
            top_p: 1.0,
            stream: false,
        };

        let url = format!("{}/chat/completions", self.base_url);
        let resp = self
            .client
            .post(url)
            .bearer_auth(api_key)
            .json(&payload)
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(ChatError::GenerationUnavailable(format!(
                "provider returned {}: {}",
                status, body
            )));
        }

        let parsed: CompletionResponse = resp
            .json()
            .await
            .map_err(|e| ChatError::GenerationUnavailable(format!("malformed response: {}", e)))?;

        let content = parsed
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .ok_or_else(|| ChatError::GenerationUnavailable("response has no content".into()))?;

        debug!(model = %self.model, chars = content.len(), "Completion received");
        Ok(content)
    }
}
