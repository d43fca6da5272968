//! Anthropic Claude client.
//!
//! The API key is held as an [`ApiCredential`] and only exposed when the
//! `x-api-key` header is set.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use super::http::{build_client, read_json, transport_error};
use super::secrets::ApiCredential;
use crate::config::ANTHROPIC_BASE_URL;
use super::{
    AiClient, AiClientError, AiResponse, ClientSettings, GenerateRequest, ModelInfo, ProviderKind,
    TokenUsage,
};

/// Environment variable name for the Anthropic API key.
pub const ANTHROPIC_API_KEY_ENV: &str = "ANTHROPIC_API_KEY";

const API_VERSION: &str = "2023-06-01";

/// Anthropic Claude client.
pub struct AnthropicClient {
    credential: ApiCredential,
    base_url: String,
    settings: ClientSettings,
    client: reqwest::Client,
}

impl std::fmt::Debug for AnthropicClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AnthropicClient")
            .field("credential", &self.credential)
            .field("base_url", &self.base_url)
            .field("model", &self.settings.model)
            .finish()
    }
}

impl AnthropicClient {
    pub fn new(credential: ApiCredential, settings: ClientSettings) -> Result<Self, AiClientError> {
        let client = build_client(settings.timeout)?;
        Ok(Self {
            credential: credential.with_name("Anthropic API key"),
            base_url: ANTHROPIC_BASE_URL.to_string(),
            settings,
            client,
        })
    }

    /// Set custom base URL.
    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into().trim_end_matches('/').to_string();
        self
    }

    fn messages_body(&self, request: &GenerateRequest) -> AnthropicRequest {
        AnthropicRequest {
            model: self.settings.model.clone(),
            max_tokens: request.max_tokens.unwrap_or(self.settings.max_tokens),
            system: request.system_prompt.clone(),
            messages: vec![AnthropicMessage {
                role: "user",
                content: request.prompt.clone(),
            }],
            temperature: request.temperature.unwrap_or(self.settings.temperature),
        }
    }

    async fn send(&self, body: &AnthropicRequest) -> Result<AiResponse, AiClientError> {
        let timeout = self.settings.timeout;
        // SECURITY: Only expose the credential here, at the point of use
        let response = self
            .client
            .post(format!("{}/messages", self.base_url))
            .header("x-api-key", self.credential.expose())
            .header("anthropic-version", API_VERSION)
            .header("content-type", "application/json")
            .json(body)
            .send()
            .await
            .map_err(|e| transport_error(e, timeout))?;

        let (parsed, raw): (AnthropicResponse, JsonValue) = read_json(response, timeout).await?;

        let content = parsed
            .content
            .into_iter()
            .filter_map(|block| block.text)
            .collect::<Vec<_>>()
            .join("");
        if content.is_empty() {
            return Err(AiClientError::Response(
                "Anthropic response has no text content".to_string(),
            ));
        }

        Ok(AiResponse {
            content,
            model: parsed.model,
            usage: TokenUsage::new(parsed.usage.input_tokens, parsed.usage.output_tokens),
            finish_reason: parsed.stop_reason,
            raw,
        })
    }

    /// Static facts by model name.
    fn known_model(&self, info: ModelInfo) -> ModelInfo {
        let model = self.settings.model.as_str();
        let tier = if model.contains("opus") {
            Some(("opus", "Most capable Claude model"))
        } else if model.contains("sonnet") {
            Some(("sonnet", "Balanced performance and speed"))
        } else if model.contains("haiku") {
            Some(("haiku", "Fastest Claude model"))
        } else {
            None
        };

        match tier {
            Some((tier, description)) => {
                let family = model
                    .split(tier)
                    .next()
                    .unwrap_or("claude")
                    .trim_end_matches('-');
                ModelInfo {
                    context_window: Some(200_000),
                    ..info
                }
                .with_detail("model_family", family)
                .with_detail("tier", tier)
                .with_detail("description", description)
            }
            None => info,
        }
    }

    async fn fetch_model_details(&self) -> Result<JsonValue, AiClientError> {
        let timeout = self.settings.timeout;
        let response = self
            .client
            .get(format!("{}/models/{}", self.base_url, self.settings.model))
            .header("x-api-key", self.credential.expose())
            .header("anthropic-version", API_VERSION)
            .send()
            .await
            .map_err(|e| transport_error(e, timeout))?;
        let (details, _raw): (JsonValue, JsonValue) = read_json(response, timeout).await?;
        Ok(details)
    }
}

/// Anthropic API request format.
#[derive(Debug, Serialize)]
struct AnthropicRequest {
    model: String,
    max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<String>,
    messages: Vec<AnthropicMessage>,
    temperature: f32,
}

#[derive(Debug, Serialize)]
struct AnthropicMessage {
    role: &'static str,
    content: String,
}

/// Anthropic API response format.
#[derive(Debug, Deserialize)]
struct AnthropicResponse {
    content: Vec<ContentBlockResponse>,
    model: String,
    stop_reason: Option<String>,
    usage: AnthropicUsage,
}

#[derive(Debug, Deserialize)]
struct ContentBlockResponse {
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct AnthropicUsage {
    input_tokens: u32,
    output_tokens: u32,
}

#[async_trait]
impl AiClient for AnthropicClient {
    async fn generate(&self, request: &GenerateRequest) -> Result<AiResponse, AiClientError> {
        let body = self.messages_body(request);
        let response = self.settings.retry.retry(|| self.send(&body)).await?;

        tracing::debug!(
            provider = "anthropic",
            model = %response.model,
            tokens = response.usage.total_tokens,
            "generation complete"
        );
        Ok(response)
    }

    async fn validate_connection(&self) -> bool {
        let probe = self.messages_body(&GenerateRequest::new("test").with_max_tokens(10));
        match self.send(&probe).await {
            Ok(_) => true,
            Err(e) => {
                tracing::warn!(provider = "anthropic", error = %e, "connection check failed");
                false
            }
        }
    }

    async fn model_info(&self) -> ModelInfo {
        let info = self.known_model(ModelInfo::new(ProviderKind::Anthropic, &self.settings));
        match self.fetch_model_details().await {
            Ok(details) => info.with_detail("api_details", details),
            Err(e) => {
                tracing::debug!(error = %e, "model details unavailable");
                info
            }
        }
    }

    fn provider(&self) -> ProviderKind {
        ProviderKind::Anthropic
    }

    fn model(&self) -> &str {
        &self.settings.model
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::CredentialSource;

    fn client(model: &str) -> AnthropicClient {
        AnthropicClient::new(
            ApiCredential::new("sk-ant-REDACTED", CredentialSource::Programmatic, "k"),
            ClientSettings::new(model),
        )
        .unwrap()
    }

    #[test]
    fn test_api_key_not_in_debug_output() {
        let debug_output = format!("{:?}", client("claude-3-5-sonnet-20241022"));
        assert!(
            !debug_output.contains("sk-ant-REDACTED"),
            "API key was exposed in Debug output!"
        );
        assert!(debug_output.contains("[REDACTED]"));
    }

    #[test]
    fn test_request_body_uses_defaults_and_overrides() {
        let client = client("claude-3-5-sonnet-20241022");
        let body = client.messages_body(&GenerateRequest::new("hi").with_system_prompt("sys"));
        let value = serde_json::to_value(&body).unwrap();
        assert_eq!(value["max_tokens"], 4096);
        assert_eq!(value["system"], "sys");
        assert_eq!(value["messages"][0]["role"], "user");

        let body = client.messages_body(&GenerateRequest::new("hi").with_max_tokens(10));
        let value = serde_json::to_value(&body).unwrap();
        assert_eq!(value["max_tokens"], 10);
        assert!(value.get("system").is_none());
    }

    #[test]
    fn test_known_model_tiers() {
        let sonnet = client("claude-3-5-sonnet-20241022");
        let info = sonnet.known_model(ModelInfo::new(ProviderKind::Anthropic, &sonnet.settings));
        assert_eq!(info.context_window, Some(200_000));
        assert_eq!(info.details["tier"], "sonnet");
        assert_eq!(info.details["model_family"], "claude-3-5");

        let custom = client("my-proxy-model");
        let info = custom.known_model(ModelInfo::new(ProviderKind::Anthropic, &custom.settings));
        assert_eq!(info.context_window, None);
        assert!(info.details.is_empty());
    }
}
