//! OpenAI chat-completions client.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use super::http::{build_client, read_json, transport_error};
use super::secrets::ApiCredential;
use crate::config::OPENAI_BASE_URL;
use super::{
    AiClient, AiClientError, AiResponse, ChatMessage, ClientSettings, GenerateRequest, ModelInfo,
    ProviderKind, TokenUsage,
};

/// Environment variable name for the OpenAI API key.
pub const OPENAI_API_KEY_ENV: &str = "OPENAI_API_KEY";

/// OpenAI GPT client.
pub struct OpenAiClient {
    credential: ApiCredential,
    base_url: String,
    settings: ClientSettings,
    client: reqwest::Client,
}

impl std::fmt::Debug for OpenAiClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenAiClient")
            .field("credential", &self.credential)
            .field("base_url", &self.base_url)
            .field("model", &self.settings.model)
            .finish()
    }
}

impl OpenAiClient {
    pub fn new(credential: ApiCredential, settings: ClientSettings) -> Result<Self, AiClientError> {
        let client = build_client(settings.timeout)?;
        Ok(Self {
            credential: credential.with_name("OpenAI API key"),
            base_url: OPENAI_BASE_URL.to_string(),
            settings,
            client,
        })
    }

    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into().trim_end_matches('/').to_string();
        self
    }

    fn completion_body(&self, request: &GenerateRequest) -> ChatCompletionRequest {
        ChatCompletionRequest {
            model: self.settings.model.clone(),
            messages: request.messages(),
            temperature: request.temperature.unwrap_or(self.settings.temperature),
            max_tokens: request.max_tokens.unwrap_or(self.settings.max_tokens),
        }
    }

    async fn send(&self, body: &ChatCompletionRequest) -> Result<AiResponse, AiClientError> {
        let timeout = self.settings.timeout;
        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(self.credential.expose())
            .json(body)
            .send()
            .await
            .map_err(|e| transport_error(e, timeout))?;

        let (parsed, raw): (ChatCompletionResponse, JsonValue) =
            read_json(response, timeout).await?;

        let choice = parsed
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| AiClientError::Response("OpenAI response has no choices".to_string()))?;
        let content = choice.message.content.ok_or_else(|| {
            AiClientError::Response("OpenAI response content is null".to_string())
        })?;

        let usage = parsed
            .usage
            .map(|u| TokenUsage {
                input_tokens: u.prompt_tokens,
                output_tokens: u.completion_tokens,
                total_tokens: u
                    .total_tokens
                    .unwrap_or(u.prompt_tokens.saturating_add(u.completion_tokens)),
            })
            .unwrap_or_default();

        Ok(AiResponse {
            content,
            model: parsed.model.unwrap_or_else(|| self.settings.model.clone()),
            usage,
            finish_reason: choice.finish_reason,
            raw,
        })
    }

    /// Static facts by model name.
    fn known_model(&self, info: ModelInfo) -> ModelInfo {
        let model = self.settings.model.to_lowercase();
        if model.contains("gpt-4") {
            let context = if model.contains("turbo") { 128_000 } else { 8_192 };
            ModelInfo {
                context_window: Some(context),
                ..info
            }
            .with_detail("training_cutoff", "April 2023")
        } else if model.contains("gpt-3.5") {
            ModelInfo {
                context_window: Some(16_385),
                ..info
            }
            .with_detail("training_cutoff", "September 2021")
        } else {
            info
        }
    }

    async fn fetch_model_details(&self) -> Result<JsonValue, AiClientError> {
        let timeout = self.settings.timeout;
        let response = self
            .client
            .get(format!("{}/models/{}", self.base_url, self.settings.model))
            .bearer_auth(self.credential.expose())
            .send()
            .await
            .map_err(|e| transport_error(e, timeout))?;
        let (details, _raw): (JsonValue, JsonValue) = read_json(response, timeout).await?;
        Ok(details)
    }
}

#[derive(Debug, Serialize)]
struct ChatCompletionRequest {
    model: String,
    messages: Vec<ChatMessage>,
    temperature: f32,
    max_tokens: u32,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    #[serde(default)]
    choices: Vec<Choice>,
    model: Option<String>,
    usage: Option<Usage>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ChoiceMessage,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Usage {
    #[serde(default)]
    prompt_tokens: u32,
    #[serde(default)]
    completion_tokens: u32,
    total_tokens: Option<u32>,
}

#[async_trait]
impl AiClient for OpenAiClient {
    async fn generate(&self, request: &GenerateRequest) -> Result<AiResponse, AiClientError> {
        let body = self.completion_body(request);
        let response = self.settings.retry.retry(|| self.send(&body)).await?;

        tracing::debug!(
            provider = "openai",
            model = %response.model,
            tokens = response.usage.total_tokens,
            "generation complete"
        );
        Ok(response)
    }

    async fn validate_connection(&self) -> bool {
        let probe = self.completion_body(&GenerateRequest::new("test").with_max_tokens(5));
        match self.send(&probe).await {
            Ok(_) => true,
            Err(e) => {
                tracing::warn!(provider = "openai", error = %e, "connection check failed");
                false
            }
        }
    }

    async fn model_info(&self) -> ModelInfo {
        let info = self.known_model(ModelInfo::new(ProviderKind::OpenAi, &self.settings));
        match self.fetch_model_details().await {
            Ok(details) => info.with_detail("api_details", details),
            Err(e) => {
                tracing::debug!(error = %e, "model details unavailable");
                info
            }
        }
    }

    fn provider(&self) -> ProviderKind {
        ProviderKind::OpenAi
    }

    fn model(&self) -> &str {
        &self.settings.model
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::CredentialSource;

    fn client(model: &str) -> OpenAiClient {
        OpenAiClient::new(
            ApiCredential::new("sk-openai-secret", CredentialSource::Programmatic, "k"),
            ClientSettings::new(model),
        )
        .unwrap()
    }

    #[test]
    fn test_system_prompt_leads_messages() {
        let client = client("gpt-4-turbo-preview");
        let body = client.completion_body(
            &GenerateRequest::new("assess")
                .with_system_prompt("auditor")
                .with_temperature(0.7),
        );
        let value = serde_json::to_value(&body).unwrap();
        assert_eq!(value["messages"][0]["role"], "system");
        assert_eq!(value["messages"][1]["content"], "assess");
        assert!((value["temperature"].as_f64().unwrap() - 0.7).abs() < 1e-6);
        assert_eq!(value["max_tokens"], 4096);
    }

    #[test]
    fn test_known_model_context_windows() {
        for (model, window, cutoff) in [
            ("gpt-4-turbo-preview", 128_000, "April 2023"),
            ("gpt-4", 8_192, "April 2023"),
            ("gpt-3.5-turbo", 16_385, "September 2021"),
        ] {
            let client = client(model);
            let info = client.known_model(ModelInfo::new(ProviderKind::OpenAi, &client.settings));
            assert_eq!(info.context_window, Some(window), "{model}");
            assert_eq!(info.details["training_cutoff"], cutoff);
        }
    }

    #[test]
    fn test_api_key_not_in_debug_output() {
        assert!(!format!("{:?}", client("gpt-4")).contains("sk-openai-secret"));
    }
}
