//! AI backend abstractions for cce-runtime.
//!
//! This module defines the [`AiClient`] trait every backend implements and
//! the shared request/response types. Upper layers only see `dyn AiClient`;
//! backend-specific types stay inside their modules.
//!
//! ## Security
//!
//! Cloud backends hold their API keys as [`ApiCredential`], which never
//! shows the key in `Debug` or `Display` output.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};
use thiserror::Error;

use crate::resilience::RetryPolicy;
use crate::ErrorKind;

mod cached;
mod factory;
pub mod secrets;

#[cfg(any(feature = "anthropic", feature = "openai", feature = "local"))]
mod http;

#[cfg(feature = "anthropic")]
mod anthropic;
#[cfg(feature = "local")]
mod local;
#[cfg(feature = "openai")]
mod openai;

pub use cached::CachedClient;
pub use factory::AiClientFactory;
pub use secrets::{ApiCredential, CredentialSource};

#[cfg(feature = "anthropic")]
pub use anthropic::{AnthropicClient, ANTHROPIC_API_KEY_ENV};
#[cfg(feature = "local")]
pub use local::{LocalModel, OllamaClient};
#[cfg(feature = "openai")]
pub use openai::{OpenAiClient, OPENAI_API_KEY_ENV};

/// Errors from AI backends, already translated into the shared taxonomy.
#[derive(Error, Debug)]
pub enum AiClientError {
    #[error("Connection failed: {0}")]
    Connection(String),

    #[error("Request timed out after {0:?}")]
    Timeout(Duration),

    #[error("Rate limit exceeded, retry after {retry_after:?}")]
    RateLimited { retry_after: Option<Duration> },

    #[error("Malformed response: {0}")]
    Response(String),

    #[error("API error: {status} - {message}")]
    Api { status: u16, message: String },

    #[error("Client error: {0}")]
    Client(String),

    #[error("Provider not configured: {0}")]
    NotConfigured(String),
}

impl AiClientError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            AiClientError::Connection(_) => ErrorKind::Connection,
            AiClientError::Timeout(_) => ErrorKind::Timeout,
            AiClientError::RateLimited { .. } => ErrorKind::RateLimit,
            AiClientError::Response(_) => ErrorKind::Response,
            AiClientError::Api { .. } | AiClientError::Client(_) => ErrorKind::Client,
            AiClientError::NotConfigured(_) => ErrorKind::Configuration,
        }
    }
}

/// Identifies a backend variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ProviderKind {
    #[serde(rename = "anthropic")]
    Anthropic,
    #[serde(rename = "openai")]
    OpenAi,
    #[serde(rename = "local_llm", alias = "local")]
    LocalLlm,
}

impl ProviderKind {
    pub const ALL: [ProviderKind; 3] = [
        ProviderKind::Anthropic,
        ProviderKind::OpenAi,
        ProviderKind::LocalLlm,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            ProviderKind::Anthropic => "anthropic",
            ProviderKind::OpenAi => "openai",
            ProviderKind::LocalLlm => "local_llm",
        }
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProviderKind {
    type Err = AiClientError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_lowercase().as_str() {
            "anthropic" => Ok(ProviderKind::Anthropic),
            "openai" => Ok(ProviderKind::OpenAi),
            "local_llm" | "local" => Ok(ProviderKind::LocalLlm),
            other => Err(AiClientError::NotConfigured(format!(
                "Unknown provider '{}'. Available: anthropic, openai, local_llm",
                other
            ))),
        }
    }
}

/// Per-client model parameters and transport limits.
#[derive(Debug, Clone, PartialEq)]
pub struct ClientSettings {
    pub model: String,

    /// Default sampling temperature when a request does not set one
    pub temperature: f32,

    /// Default output cap when a request does not set one
    pub max_tokens: u32,

    /// Per-request transport timeout
    pub timeout: Duration,

    pub retry: RetryPolicy,
}

impl ClientSettings {
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            temperature: 0.1,
            max_tokens: 4096,
            timeout: Duration::from_secs(120),
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// A chat message sent to a backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    /// Role: "system", "user", or "assistant"
    pub role: String,

    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".to_string(),
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }
}

/// One generation request.
#[derive(Debug, Clone, PartialEq)]
pub struct GenerateRequest {
    pub prompt: String,
    pub system_prompt: Option<String>,
    /// Overrides the client's default temperature
    pub temperature: Option<f32>,
    /// Overrides the client's default output cap
    pub max_tokens: Option<u32>,
}

impl GenerateRequest {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            system_prompt: None,
            temperature: None,
            max_tokens: None,
        }
    }

    pub fn with_system_prompt(mut self, system_prompt: impl Into<String>) -> Self {
        self.system_prompt = Some(system_prompt.into());
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    /// Messages in chat order: optional system message, then the prompt.
    pub fn messages(&self) -> Vec<ChatMessage> {
        let mut messages = Vec::with_capacity(2);
        if let Some(system) = &self.system_prompt {
            messages.push(ChatMessage::system(system.clone()));
        }
        messages.push(ChatMessage::user(self.prompt.clone()));
        messages
    }
}

/// Token usage of one call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub input_tokens: u32,
    pub output_tokens: u32,
    pub total_tokens: u32,
}

impl TokenUsage {
    /// Usage with `total_tokens = input + output`.
    pub fn new(input_tokens: u32, output_tokens: u32) -> Self {
        Self {
            input_tokens,
            output_tokens,
            total_tokens: input_tokens.saturating_add(output_tokens),
        }
    }
}

/// A backend's answer, normalized across providers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AiResponse {
    pub content: String,

    /// Model that actually served the request
    pub model: String,

    pub usage: TokenUsage,

    pub finish_reason: Option<String>,

    /// Provider payload as received
    #[serde(default)]
    pub raw: JsonValue,
}

/// Static and best-effort dynamic facts about the configured model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelInfo {
    pub provider: ProviderKind,
    pub model: String,
    pub temperature: f32,
    pub max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context_window: Option<u64>,
    /// Provider-specific extras (family, tier, api details, ...)
    #[serde(flatten)]
    pub details: Map<String, JsonValue>,
}

impl ModelInfo {
    pub fn new(provider: ProviderKind, settings: &ClientSettings) -> Self {
        Self {
            provider,
            model: settings.model.clone(),
            temperature: settings.temperature,
            max_tokens: settings.max_tokens,
            context_window: None,
            details: Map::new(),
        }
    }

    pub fn with_detail(mut self, key: &str, value: impl Into<JsonValue>) -> Self {
        self.details.insert(key.to_string(), value.into());
        self
    }
}

/// Backend abstraction every stage talks to.
///
/// Implementations retry `generate` internally under their [`RetryPolicy`];
/// each retry re-issues the request.
#[async_trait]
pub trait AiClient: Send + Sync {
    /// Generate a completion. Errors are already translated and retried.
    async fn generate(&self, request: &GenerateRequest) -> Result<AiResponse, AiClientError>;

    /// Issue a minimal request. Never fails; any error means `false`.
    async fn validate_connection(&self) -> bool;

    /// Model metadata. Failures fetching dynamic details are swallowed.
    async fn model_info(&self) -> ModelInfo;

    fn provider(&self) -> ProviderKind;

    fn model(&self) -> &str;

    /// Forget any stored answer for `request` after a caller rejected it.
    async fn discard(&self, _request: &GenerateRequest) {}
}
