//! Local models served by Ollama.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value as JsonValue};

use super::http::{build_client, read_json, transport_error};
use super::{
    AiClient, AiClientError, AiResponse, ChatMessage, ClientSettings, GenerateRequest, ModelInfo,
    ProviderKind, TokenUsage,
};

/// A model installed on the Ollama server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocalModel {
    pub name: String,
    #[serde(default)]
    pub size: Option<u64>,
    #[serde(default)]
    pub modified_at: Option<String>,
}

/// Client for an Ollama server.
#[derive(Debug)]
pub struct OllamaClient {
    server_url: String,
    settings: ClientSettings,
    client: reqwest::Client,
}

impl OllamaClient {
    pub fn new(server_url: impl Into<String>, settings: ClientSettings) -> Result<Self, AiClientError> {
        let client = build_client(settings.timeout)?;
        Ok(Self {
            server_url: server_url.into().trim_end_matches('/').to_string(),
            settings,
            client,
        })
    }

    pub fn server_url(&self) -> &str {
        &self.server_url
    }

    fn chat_body(&self, request: &GenerateRequest) -> OllamaChatRequest {
        OllamaChatRequest {
            model: self.settings.model.clone(),
            messages: request.messages(),
            stream: false,
            options: OllamaOptions {
                temperature: request.temperature.unwrap_or(self.settings.temperature),
                num_predict: request.max_tokens.unwrap_or(self.settings.max_tokens),
            },
        }
    }

    async fn send(&self, body: &OllamaChatRequest) -> Result<AiResponse, AiClientError> {
        let timeout = self.settings.timeout;
        let response = self
            .client
            .post(format!("{}/api/chat", self.server_url))
            .json(body)
            .send()
            .await
            .map_err(|e| match transport_error(e, timeout) {
                AiClientError::Connection(message) => AiClientError::Connection(format!(
                    "Failed to connect to Ollama server at {}: {}",
                    self.server_url, message
                )),
                other => other,
            })?;

        let (parsed, raw): (OllamaChatResponse, JsonValue) = read_json(response, timeout).await?;

        let content = parsed
            .message
            .and_then(|m| m.content)
            .ok_or_else(|| AiClientError::Response("Ollama response content is None".to_string()))?;

        let input = parsed.prompt_eval_count.unwrap_or(0);
        let output = parsed.eval_count.unwrap_or(0);

        Ok(AiResponse {
            content,
            model: parsed.model.unwrap_or_else(|| self.settings.model.clone()),
            usage: TokenUsage::new(input, output),
            finish_reason: Some(parsed.done_reason.unwrap_or_else(|| "stop".to_string())),
            raw,
        })
    }

    /// Names of the models installed on the server.
    pub async fn list_models(&self) -> Result<Vec<LocalModel>, AiClientError> {
        let timeout = self.settings.timeout;
        let response = self
            .client
            .get(format!("{}/api/tags", self.server_url))
            .send()
            .await
            .map_err(|e| transport_error(e, timeout))?;
        let (tags, _raw): (OllamaTags, JsonValue) = read_json(response, timeout).await?;
        Ok(tags.models)
    }

    /// Ask the server to download `model`. Returns whether it succeeded.
    pub async fn pull_model(&self, model: &str) -> bool {
        let result = self
            .client
            .post(format!("{}/api/pull", self.server_url))
            .json(&json!({ "name": model, "stream": false }))
            .send()
            .await;

        match result {
            Ok(response) if response.status().is_success() => {
                tracing::info!(model, "model pulled");
                true
            }
            Ok(response) => {
                tracing::warn!(model, status = response.status().as_u16(), "model pull rejected");
                false
            }
            Err(e) => {
                tracing::warn!(model, error = %e, "model pull failed");
                false
            }
        }
    }

    async fn show_model(&self) -> Result<JsonValue, AiClientError> {
        let timeout = self.settings.timeout;
        let response = self
            .client
            .post(format!("{}/api/show", self.server_url))
            .json(&json!({ "name": self.settings.model }))
            .send()
            .await
            .map_err(|e| transport_error(e, timeout))?;
        let (details, _raw): (JsonValue, JsonValue) = read_json(response, timeout).await?;
        Ok(details)
    }

    async fn check_connection(&self) -> Result<(), AiClientError> {
        let models = self.list_models().await?;
        if !models.iter().any(|m| m.name.contains(&self.settings.model)) {
            return Err(AiClientError::NotConfigured(format!(
                "model '{}' is not installed on {}",
                self.settings.model, self.server_url
            )));
        }
        let probe = self.chat_body(&GenerateRequest::new("test").with_max_tokens(5));
        self.send(&probe).await.map(|_| ())
    }
}

#[derive(Debug, Serialize)]
struct OllamaChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
    stream: bool,
    options: OllamaOptions,
}

#[derive(Debug, Serialize)]
struct OllamaOptions {
    temperature: f32,
    num_predict: u32,
}

#[derive(Debug, Deserialize)]
struct OllamaChatResponse {
    model: Option<String>,
    message: Option<OllamaMessage>,
    done_reason: Option<String>,
    prompt_eval_count: Option<u32>,
    eval_count: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct OllamaMessage {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OllamaTags {
    #[serde(default)]
    models: Vec<LocalModel>,
}

#[async_trait]
impl AiClient for OllamaClient {
    async fn generate(&self, request: &GenerateRequest) -> Result<AiResponse, AiClientError> {
        let body = self.chat_body(request);
        let response = self.settings.retry.retry(|| self.send(&body)).await?;

        tracing::debug!(
            provider = "local_llm",
            model = %response.model,
            tokens = response.usage.total_tokens,
            "generation complete"
        );
        Ok(response)
    }

    async fn validate_connection(&self) -> bool {
        match self.check_connection().await {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(provider = "local_llm", error = %e, "connection check failed");
                false
            }
        }
    }

    async fn model_info(&self) -> ModelInfo {
        let info = ModelInfo::new(ProviderKind::LocalLlm, &self.settings)
            .with_detail("server_url", self.server_url.clone());

        match self.show_model().await {
            Ok(details) => info
                .with_detail(
                    "model_info",
                    details.get("model_info").cloned().unwrap_or_else(|| json!({})),
                )
                .with_detail(
                    "parameters",
                    details.get("parameters").cloned().unwrap_or_else(|| json!("")),
                )
                .with_detail(
                    "template",
                    details.get("template").cloned().unwrap_or_else(|| json!("")),
                ),
            Err(e) => {
                tracing::debug!(error = %e, "model details unavailable");
                info
            }
        }
    }

    fn provider(&self) -> ProviderKind {
        ProviderKind::LocalLlm
    }

    fn model(&self) -> &str {
        &self.settings.model
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chat_body_shape() {
        let client = OllamaClient::new("http://localhost:11434/", ClientSettings::new("llama3.1:latest"))
            .unwrap();
        assert_eq!(client.server_url(), "http://localhost:11434");

        let body = client.chat_body(&GenerateRequest::new("hi").with_max_tokens(5));
        let value = serde_json::to_value(&body).unwrap();
        assert_eq!(value["stream"], false);
        assert_eq!(value["options"]["num_predict"], 5);
        assert_eq!(value["messages"][0]["role"], "user");
    }
}
