//! Builds the configured backend.
//!
//! ```ignore
//! let settings = Settings::load(None)?;
//! let client = AiClientFactory::create(&settings)?;
//! ```

use std::sync::Arc;

use super::{AiClient, AiClientError, ProviderKind};
use crate::cache::ResponseCache;
use crate::config::Settings;

#[cfg(any(feature = "anthropic", feature = "openai"))]
use super::secrets::ApiCredential;

/// Selects and builds an [`AiClient`] from [`Settings`].
pub struct AiClientFactory;

impl AiClientFactory {
    /// The configured provider, behind the response cache when enabled.
    pub fn create(settings: &Settings) -> Result<Arc<dyn AiClient>, AiClientError> {
        let client = Self::create_for(settings.provider, settings)?;
        if !settings.cache.enabled {
            return Ok(client);
        }

        let cache = ResponseCache::new(&settings.cache.dir, settings.cache.ttl);
        tracing::debug!(dir = %settings.cache.dir.display(), "response cache enabled");
        Ok(Arc::new(super::CachedClient::new(client, Arc::new(cache))))
    }

    /// An uncached client for `provider`.
    pub fn create_for(
        provider: ProviderKind,
        settings: &Settings,
    ) -> Result<Arc<dyn AiClient>, AiClientError> {
        tracing::debug!(%provider, "creating AI client");
        match provider {
            ProviderKind::Anthropic => Self::anthropic(settings),
            ProviderKind::OpenAi => Self::openai(settings),
            ProviderKind::LocalLlm => Self::local(settings),
        }
    }

    /// Providers compiled into this build.
    pub fn available() -> Vec<ProviderKind> {
        ProviderKind::ALL
            .into_iter()
            .filter(|kind| match kind {
                ProviderKind::Anthropic => cfg!(feature = "anthropic"),
                ProviderKind::OpenAi => cfg!(feature = "openai"),
                ProviderKind::LocalLlm => cfg!(feature = "local"),
            })
            .collect()
    }

    #[cfg(feature = "anthropic")]
    fn anthropic(settings: &Settings) -> Result<Arc<dyn AiClient>, AiClientError> {
        let credential = ApiCredential::require(
            settings.anthropic.api_key.as_ref(),
            "anthropic.api_key",
            super::ANTHROPIC_API_KEY_ENV,
            "Anthropic API key",
        )?;
        let client = super::AnthropicClient::new(
            credential.clone(),
            settings.client_settings(ProviderKind::Anthropic),
        )?
        .with_base_url(&settings.anthropic.base_url);
        Ok(Arc::new(client))
    }

    #[cfg(not(feature = "anthropic"))]
    fn anthropic(_settings: &Settings) -> Result<Arc<dyn AiClient>, AiClientError> {
        Err(AiClientError::NotConfigured(
            "Anthropic provider requires the 'anthropic' feature".to_string(),
        ))
    }

    #[cfg(feature = "openai")]
    fn openai(settings: &Settings) -> Result<Arc<dyn AiClient>, AiClientError> {
        let credential = ApiCredential::require(
            settings.openai.api_key.as_ref(),
            "openai.api_key",
            super::OPENAI_API_KEY_ENV,
            "OpenAI API key",
        )?;
        let client = super::OpenAiClient::new(
            credential.clone(),
            settings.client_settings(ProviderKind::OpenAi),
        )?
        .with_base_url(&settings.openai.base_url);
        Ok(Arc::new(client))
    }

    #[cfg(not(feature = "openai"))]
    fn openai(_settings: &Settings) -> Result<Arc<dyn AiClient>, AiClientError> {
        Err(AiClientError::NotConfigured(
            "OpenAI provider requires the 'openai' feature".to_string(),
        ))
    }

    #[cfg(feature = "local")]
    fn local(settings: &Settings) -> Result<Arc<dyn AiClient>, AiClientError> {
        let client = super::OllamaClient::new(
            &settings.local.url,
            settings.client_settings(ProviderKind::LocalLlm),
        )?;
        Ok(Arc::new(client))
    }

    #[cfg(not(feature = "local"))]
    fn local(_settings: &Settings) -> Result<Arc<dyn AiClient>, AiClientError> {
        Err(AiClientError::NotConfigured(
            "Local provider requires the 'local' feature".to_string(),
        ))
    }
}

#[cfg(all(test, feature = "all-providers"))]
mod tests {
    use super::*;
    use crate::providers::CredentialSource;
    use crate::ErrorKind;

    fn settings(provider: ProviderKind) -> Settings {
        let mut settings = Settings::default();
        settings.provider = provider;
        settings.cache.enabled = false;
        settings
    }

    #[test]
    fn test_creates_each_provider() {
        let mut anthropic = settings(ProviderKind::Anthropic);
        anthropic.anthropic.api_key =
            Some(ApiCredential::new("sk-ant", CredentialSource::Config, "k"));
        let client = AiClientFactory::create(&anthropic).unwrap();
        assert_eq!(client.provider(), ProviderKind::Anthropic);
        assert_eq!(client.model(), "claude-3-5-sonnet-20241022");

        let mut openai = settings(ProviderKind::OpenAi);
        openai.openai.api_key = Some(ApiCredential::new("sk-oa", CredentialSource::Config, "k"));
        assert_eq!(
            AiClientFactory::create(&openai).unwrap().provider(),
            ProviderKind::OpenAi
        );

        let local = settings(ProviderKind::LocalLlm);
        let client = AiClientFactory::create(&local).unwrap();
        assert_eq!(client.provider(), ProviderKind::LocalLlm);
        assert_eq!(client.model(), "llama3.1:latest");
    }

    #[test]
    fn test_missing_key_is_configuration_error() {
        let err = match AiClientFactory::create(&settings(ProviderKind::OpenAi)) {
            Ok(_) => panic!("expected an error"),
            Err(e) => e,
        };
        assert_eq!(err.kind(), ErrorKind::Configuration);
        assert!(err.to_string().contains("OPENAI_API_KEY"));
    }

    #[test]
    fn test_cache_wraps_client() {
        let dir = tempfile::tempdir().unwrap();
        let mut local = settings(ProviderKind::LocalLlm);
        local.cache.enabled = true;
        local.cache.dir = dir.path().to_path_buf();

        let client = AiClientFactory::create(&local).unwrap();
        assert_eq!(client.provider(), ProviderKind::LocalLlm);
        assert_eq!(client.model(), "llama3.1:latest");
    }

    #[test]
    fn test_all_providers_available() {
        assert_eq!(AiClientFactory::available(), ProviderKind::ALL.to_vec());
    }
}
