use cce_core::{AssetInfo, Stage, StageValidator};

use super::{StageContext, StageError};
use crate::prompts::{self, Placeholder};

/// Stage 1: identify the device a configuration belongs to.
#[derive(Debug, Clone, Copy, Default)]
pub struct AssetIdentificationStage;

impl AssetIdentificationStage {
    const STAGE: Stage = Stage::AssetIdentification;

    pub async fn run(&self, ctx: &StageContext, configuration: &str) -> Result<AssetInfo, StageError> {
        let template = ctx.template(Self::STAGE)?;
        let prompt = prompts::render(&template, &[(Placeholder::Configuration, configuration)]);

        let asset = ctx
            .invoke(Self::STAGE, prompt, StageValidator::validate_asset_identification)
            .await?;

        tracing::info!(
            vendor = %asset.vendor,
            os_type = %asset.os_type,
            hostname = %asset.hostname,
            "asset identified"
        );
        Ok(asset)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use cce_core::{Confidence, ConfidenceLevel};

    use super::*;
    use crate::stages::fixtures;
    use crate::testing::ScriptedClient;
    use crate::ErrorKind;

    const ANSWER: &str = r#"```json
{"vendor": "Cisco", "os_type": "IOS", "os_version": "15.2(4)M", "hostname": "core-rtr-01",
 "device_type": "router", "device_role": "core", "confidence": "HIGH"}
```"#;

    #[tokio::test]
    async fn test_identifies_asset_from_fenced_answer() {
        let client = Arc::new(ScriptedClient::new([ANSWER]));
        let ctx = StageContext::new(client.clone(), Arc::new(fixtures::reference()));

        let asset = AssetIdentificationStage.run(&ctx, "hostname core-rtr-01").await.unwrap();
        assert_eq!(asset.hostname, "core-rtr-01");
        assert_eq!(asset.confidence, Confidence::Level(ConfidenceLevel::High));

        let requests = client.requests();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].prompt, "Identify:\nhostname core-rtr-01");
        assert_eq!(
            requests[0].system_prompt.as_deref(),
            Some(prompts::ASSET_IDENTIFICATION_SYSTEM_PROMPT)
        );
    }

    #[tokio::test]
    async fn test_incomplete_answer_is_not_retried() {
        let client = Arc::new(ScriptedClient::new([r#"{"vendor": "Cisco"}"#, ANSWER]));
        let ctx = StageContext::new(client.clone(), Arc::new(fixtures::reference()));

        let err = AssetIdentificationStage.run(&ctx, "hostname r1").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
        assert_eq!(err.stage(), Stage::AssetIdentification);
        assert_eq!(client.calls(), 1);
    }

    #[tokio::test]
    async fn test_rejected_answer_is_not_replayed_from_cache() {
        use std::time::Duration;

        use crate::cache::ResponseCache;
        use crate::providers::CachedClient;

        let dir = tempfile::tempdir().unwrap();
        let scripted = Arc::new(ScriptedClient::new(["Sorry, I cannot help with that.", ANSWER]));
        let cache = Arc::new(ResponseCache::new(dir.path(), Duration::from_secs(86_400)));
        let client = Arc::new(CachedClient::new(scripted.clone(), cache.clone()));
        let ctx = StageContext::new(client, Arc::new(fixtures::reference()));

        let err = AssetIdentificationStage.run(&ctx, "hostname core-rtr-01").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
        assert_eq!(cache.get_stats().unwrap().total_entries, 0);

        let asset = AssetIdentificationStage.run(&ctx, "hostname core-rtr-01").await.unwrap();
        assert_eq!(asset.hostname, "core-rtr-01");
        assert_eq!(scripted.calls(), 2);

        // The accepted answer stays cached.
        AssetIdentificationStage.run(&ctx, "hostname core-rtr-01").await.unwrap();
        assert_eq!(scripted.calls(), 2);
    }

    #[tokio::test]
    async fn test_missing_template_is_reference_error() {
        let client = Arc::new(ScriptedClient::new([ANSWER]));
        let ctx = StageContext::new(client.clone(), Arc::new(cce_core::InMemoryReferenceSource::new()));

        let err = AssetIdentificationStage.run(&ctx, "hostname r1").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Reference);
        assert_eq!(client.calls(), 0);
    }
}
