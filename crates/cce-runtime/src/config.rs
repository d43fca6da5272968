//! Runtime settings.
//!
//! Layered as built-in defaults, then an optional YAML file, then
//! environment overrides. Durations in the file accept integer seconds or
//! humantime strings such as `"2m"` or `"500ms"`.
//!
//! ```yaml
//! provider: anthropic
//! anthropic:
//!   model: claude-3-5-sonnet-20241022
//! transport:
//!   timeout: 2m
//!   max_retries: 3
//! cache:
//!   ttl: 24h
//! ```

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Deserializer};
use thiserror::Error;

use crate::providers::{ApiCredential, ClientSettings, CredentialSource, ProviderKind};
use crate::resilience::RetryPolicy;

pub const ANTHROPIC_BASE_URL: &str = "https://api.anthropic.com/v1";
pub const OPENAI_BASE_URL: &str = "https://api.openai.com/v1";
pub const LOCAL_LLM_URL: &str = "http://localhost:11434";

/// Errors loading or validating settings.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read settings file {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse settings YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("Invalid value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    #[error("{0}")]
    Invalid(String),
}

impl ConfigError {
    fn invalid_value(key: &str, message: impl Into<String>) -> Self {
        ConfigError::InvalidValue {
            key: key.to_string(),
            message: message.into(),
        }
    }
}

/// Parse integer seconds or a humantime duration.
pub fn parse_duration(text: &str) -> Result<Duration, String> {
    let text = text.trim();
    if let Ok(seconds) = text.parse::<u64>() {
        return Ok(Duration::from_secs(seconds));
    }
    humantime::parse_duration(text).map_err(|e| e.to_string())
}

fn deserialize_duration<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Seconds(u64),
        Text(String),
    }

    match Raw::deserialize(deserializer)? {
        Raw::Seconds(seconds) => Ok(Duration::from_secs(seconds)),
        Raw::Text(text) => parse_duration(&text).map_err(serde::de::Error::custom),
    }
}

fn parse_bool(key: &str, value: &str) -> Result<bool, ConfigError> {
    match value.trim().to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Ok(true),
        "false" | "0" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::invalid_value(key, format!("'{value}' is not a boolean"))),
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct AnthropicSettings {
    pub model: String,
    pub temperature: f32,
    pub max_tokens: u32,
    pub base_url: String,
    pub api_key: Option<ApiCredential>,
}

impl Default for AnthropicSettings {
    fn default() -> Self {
        Self {
            model: "claude-3-5-sonnet-20241022".to_string(),
            temperature: 0.1,
            max_tokens: 4096,
            base_url: ANTHROPIC_BASE_URL.to_string(),
            api_key: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct OpenAiSettings {
    pub model: String,
    pub temperature: f32,
    pub max_tokens: u32,
    pub base_url: String,
    pub api_key: Option<ApiCredential>,
}

impl Default for OpenAiSettings {
    fn default() -> Self {
        Self {
            model: "gpt-4-turbo-preview".to_string(),
            temperature: 0.1,
            max_tokens: 4096,
            base_url: OPENAI_BASE_URL.to_string(),
            api_key: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct LocalSettings {
    pub url: String,
    pub model: String,
    pub temperature: f32,
    pub max_tokens: u32,
}

impl Default for LocalSettings {
    fn default() -> Self {
        Self {
            url: LOCAL_LLM_URL.to_string(),
            model: "llama3.1:latest".to_string(),
            temperature: 0.1,
            max_tokens: 4096,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct TransportSettings {
    #[serde(deserialize_with = "deserialize_duration")]
    pub timeout: Duration,

    /// Total attempts per request, including the first
    pub max_retries: u32,

    /// Delay before the first retry; doubles afterwards
    #[serde(deserialize_with = "deserialize_duration")]
    pub retry_delay: Duration,
}

impl Default for TransportSettings {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(120),
            max_retries: 3,
            retry_delay: Duration::from_secs(2),
        }
    }
}

impl TransportSettings {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.max_retries, self.retry_delay)
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct CacheSettings {
    pub enabled: bool,
    pub dir: PathBuf,
    #[serde(deserialize_with = "deserialize_duration")]
    pub ttl: Duration,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            dir: PathBuf::from("./.cache"),
            ttl: Duration::from_secs(24 * 60 * 60),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct PipelineSettings {
    /// Holds `templates/prompts/*.txt` and `config/*.json`
    pub reference_dir: PathBuf,

    /// Reject criteria mappings that omit or double-count baseline checks
    pub enforce_criteria_coverage: bool,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            reference_dir: PathBuf::from("."),
            enforce_criteria_coverage: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct OutputSettings {
    pub dir: PathBuf,
}

impl Default for OutputSettings {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("./output"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    pub level: String,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

/// All runtime settings.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub provider: ProviderKind,
    pub anthropic: AnthropicSettings,
    pub openai: OpenAiSettings,
    pub local: LocalSettings,
    pub transport: TransportSettings,
    pub cache: CacheSettings,
    pub pipeline: PipelineSettings,
    pub output: OutputSettings,
    pub logging: LoggingSettings,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            provider: ProviderKind::Anthropic,
            anthropic: AnthropicSettings::default(),
            openai: OpenAiSettings::default(),
            local: LocalSettings::default(),
            transport: TransportSettings::default(),
            cache: CacheSettings::default(),
            pipeline: PipelineSettings::default(),
            output: OutputSettings::default(),
            logging: LoggingSettings::default(),
        }
    }
}

impl Settings {
    /// Defaults, then `path` if given, then the process environment.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut settings = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        settings.apply_env()?;
        Ok(settings)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let settings = Self::from_yaml(&contents)?;
        tracing::info!(path = %path.display(), "loaded settings file");
        Ok(settings)
    }

    /// Parse a YAML document; an empty document yields the defaults.
    pub fn from_yaml(yaml: &str) -> Result<Self, ConfigError> {
        if yaml.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(serde_yaml::from_str(yaml)?)
    }

    pub fn apply_env(&mut self) -> Result<(), ConfigError> {
        self.apply_env_with(|key| std::env::var(key).ok())
    }

    /// Apply overrides from `lookup`, which maps a variable name to its value.
    pub fn apply_env_with<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let duration = |key: &str, value: &str| {
            parse_duration(value).map_err(|message| ConfigError::invalid_value(key, message))
        };

        if let Some(value) = get("CCE_AI_PROVIDER") {
            self.provider = value
                .parse()
                .map_err(|e| ConfigError::invalid_value("CCE_AI_PROVIDER", format!("{e}")))?;
        }
        if let Some(value) = get("ANTHROPIC_API_KEY") {
            self.anthropic.api_key = Some(ApiCredential::new(
                value,
                CredentialSource::Environment,
                "Anthropic API key",
            ));
        }
        if let Some(value) = get("ANTHROPIC_MODEL") {
            self.anthropic.model = value;
        }
        if let Some(value) = get("OPENAI_API_KEY") {
            self.openai.api_key = Some(ApiCredential::new(
                value,
                CredentialSource::Environment,
                "OpenAI API key",
            ));
        }
        if let Some(value) = get("OPENAI_MODEL") {
            self.openai.model = value;
        }
        if let Some(value) = get("LOCAL_LLM_URL") {
            self.local.url = value;
        }
        if let Some(value) = get("LOCAL_LLM_MODEL") {
            self.local.model = value;
        }
        if let Some(value) = get("CCE_API_TIMEOUT") {
            self.transport.timeout = duration("CCE_API_TIMEOUT", &value)?;
        }
        if let Some(value) = get("CCE_MAX_RETRIES") {
            self.transport.max_retries = value.trim().parse().map_err(|_| {
                ConfigError::invalid_value("CCE_MAX_RETRIES", format!("'{value}' is not a count"))
            })?;
        }
        if let Some(value) = get("CCE_RETRY_DELAY") {
            self.transport.retry_delay = duration("CCE_RETRY_DELAY", &value)?;
        }
        if let Some(value) = get("CCE_ENABLE_CACHE") {
            self.cache.enabled = parse_bool("CCE_ENABLE_CACHE", &value)?;
        }
        if let Some(value) = get("CCE_CACHE_DIR") {
            self.cache.dir = PathBuf::from(value);
        }
        if let Some(value) = get("CCE_CACHE_TTL") {
            self.cache.ttl = duration("CCE_CACHE_TTL", &value)?;
        }
        if let Some(value) = get("CCE_OUTPUT_DIR") {
            self.output.dir = PathBuf::from(value);
        }
        if let Some(value) = get("CCE_REFERENCE_DIR") {
            self.pipeline.reference_dir = PathBuf::from(value);
        }
        if let Some(value) = get("CCE_LOG_LEVEL") {
            self.logging.level = value;
        }
        Ok(())
    }

    /// Check ranges and that the selected provider is usable.
    pub fn validate(&self) -> Result<(), ConfigError> {
        check_temperature("anthropic.temperature", self.anthropic.temperature, 1.0)?;
        check_temperature("openai.temperature", self.openai.temperature, 2.0)?;
        check_temperature("local.temperature", self.local.temperature, 2.0)?;

        for (key, max_tokens) in [
            ("anthropic.max_tokens", self.anthropic.max_tokens),
            ("openai.max_tokens", self.openai.max_tokens),
            ("local.max_tokens", self.local.max_tokens),
        ] {
            if max_tokens == 0 {
                return Err(ConfigError::invalid_value(key, "must be positive"));
            }
        }

        if self.transport.timeout.is_zero() {
            return Err(ConfigError::invalid_value("transport.timeout", "must be positive"));
        }
        if self.transport.max_retries == 0 {
            return Err(ConfigError::invalid_value("transport.max_retries", "must be at least 1"));
        }
        if self.cache.ttl.is_zero() {
            return Err(ConfigError::invalid_value("cache.ttl", "must be positive"));
        }

        let missing_key = match self.provider {
            ProviderKind::Anthropic => self.anthropic.api_key.as_ref().map_or(true, |k| k.is_empty()),
            ProviderKind::OpenAi => self.openai.api_key.as_ref().map_or(true, |k| k.is_empty()),
            ProviderKind::LocalLlm => false,
        };
        if missing_key {
            let env = match self.provider {
                ProviderKind::OpenAi => "OPENAI_API_KEY",
                _ => "ANTHROPIC_API_KEY",
            };
            return Err(ConfigError::Invalid(format!(
                "{} provider selected but no API key configured: set '{}.api_key' or {}",
                self.provider,
                self.provider.as_str(),
                env
            )));
        }
        Ok(())
    }

    /// Model parameters and transport limits for `provider`.
    pub fn client_settings(&self, provider: ProviderKind) -> ClientSettings {
        let (model, temperature, max_tokens) = match provider {
            ProviderKind::Anthropic => (
                &self.anthropic.model,
                self.anthropic.temperature,
                self.anthropic.max_tokens,
            ),
            ProviderKind::OpenAi => (
                &self.openai.model,
                self.openai.temperature,
                self.openai.max_tokens,
            ),
            ProviderKind::LocalLlm => (&self.local.model, self.local.temperature, self.local.max_tokens),
        };

        ClientSettings {
            model: model.clone(),
            temperature,
            max_tokens,
            timeout: self.transport.timeout,
            retry: self.transport.retry_policy(),
        }
    }
}

fn check_temperature(key: &str, value: f32, max: f32) -> Result<(), ConfigError> {
    if (0.0..=max).contains(&value) {
        Ok(())
    } else {
        Err(ConfigError::invalid_value(key, format!("{value} is outside [0, {max}]")))
    }
}
