//! In-process test doubles.

use std::collections::VecDeque;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value as JsonValue;

use crate::providers::{
    AiClient, AiClientError, AiResponse, ClientSettings, GenerateRequest, ModelInfo, ProviderKind,
    TokenUsage,
};

/// Replays a fixed script of answers and records every request.
pub(crate) struct ScriptedClient {
    script: Mutex<VecDeque<Result<String, AiClientError>>>,
    requests: Mutex<Vec<GenerateRequest>>,
}

impl ScriptedClient {
    pub(crate) fn new<I, S>(answers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::from_results(answers.into_iter().map(|a| Ok(a.into())).collect())
    }

    pub(crate) fn from_results(script: Vec<Result<String, AiClientError>>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn calls(&self) -> usize {
        self.requests.lock().len()
    }

    pub(crate) fn requests(&self) -> Vec<GenerateRequest> {
        self.requests.lock().clone()
    }
}

#[async_trait]
impl AiClient for ScriptedClient {
    async fn generate(&self, request: &GenerateRequest) -> Result<AiResponse, AiClientError> {
        self.requests.lock().push(request.clone());
        let next = self
            .script
            .lock()
            .pop_front()
            .unwrap_or_else(|| Err(AiClientError::Client("script exhausted".to_string())));

        next.map(|content| AiResponse {
            content,
            model: "scripted".to_string(),
            usage: TokenUsage::new(10, 20),
            finish_reason: Some("stop".to_string()),
            raw: JsonValue::Null,
        })
    }

    async fn validate_connection(&self) -> bool {
        true
    }

    async fn model_info(&self) -> ModelInfo {
        ModelInfo::new(ProviderKind::LocalLlm, &ClientSettings::new("scripted"))
    }

    fn provider(&self) -> ProviderKind {
        ProviderKind::LocalLlm
    }

    fn model(&self) -> &str {
        "scripted"
    }
}
