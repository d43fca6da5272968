//! Response caching in front of any backend.

use std::sync::Arc;

use async_trait::async_trait;

use super::{AiClient, AiClientError, AiResponse, GenerateRequest, ModelInfo, ProviderKind};
use crate::cache::ResponseCache;

/// Serves repeated requests from a [`ResponseCache`].
///
/// The fingerprint covers the prompt, system prompt and model; sampling
/// overrides are not part of it.
pub struct CachedClient {
    inner: Arc<dyn AiClient>,
    cache: Arc<ResponseCache>,
}

impl CachedClient {
    pub fn new(inner: Arc<dyn AiClient>, cache: Arc<ResponseCache>) -> Self {
        Self { inner, cache }
    }

    pub fn cache(&self) -> &ResponseCache {
        &self.cache
    }
}

#[async_trait]
impl AiClient for CachedClient {
    async fn generate(&self, request: &GenerateRequest) -> Result<AiResponse, AiClientError> {
        let system_prompt = request.system_prompt.as_deref();
        let model = self.inner.model();

        if let Some(hit) = self
            .cache
            .get::<AiResponse>(&request.prompt, system_prompt, model)
        {
            return Ok(hit);
        }

        let response = self.inner.generate(request).await?;
        if let Err(e) = self
            .cache
            .set(&request.prompt, system_prompt, model, &response)
        {
            tracing::warn!(error = %e, "failed to cache response");
        }
        Ok(response)
    }

    async fn validate_connection(&self) -> bool {
        self.inner.validate_connection().await
    }

    async fn model_info(&self) -> ModelInfo {
        self.inner.model_info().await
    }

    fn provider(&self) -> ProviderKind {
        self.inner.provider()
    }

    fn model(&self) -> &str {
        self.inner.model()
    }

    async fn discard(&self, request: &GenerateRequest) {
        let system_prompt = request.system_prompt.as_deref();
        match self.cache.remove(&request.prompt, system_prompt, self.inner.model()) {
            Ok(true) => tracing::debug!("evicted rejected response from cache"),
            Ok(false) => {}
            Err(e) => tracing::warn!(error = %e, "failed to evict rejected response"),
        }
        self.inner.discard(request).await;
    }
}
