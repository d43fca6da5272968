use serde::Serialize;
use serde_json::{json, Value as JsonValue};

use cce_core::{AssetInfo, CriteriaMappingResult, Severity, Stage, StageValidator};

use super::{to_prompt_json, StageContext, StageError};
use crate::prompts::{self, Placeholder};

/// What the model sees of each baseline check when routing.
#[derive(Serialize)]
struct CheckSummary<'a> {
    check_id: &'a str,
    title: &'a str,
    severity: Severity,
    description: &'a str,
}

/// Stage 2: split the baseline into applicable and excluded checks.
#[derive(Debug, Clone, Copy, Default)]
pub struct CriteriaMappingStage {
    enforce_coverage: bool,
}

impl CriteriaMappingStage {
    const STAGE: Stage = Stage::CriteriaMapping;

    pub fn new() -> Self {
        Self::default()
    }

    /// Reject mappings that leave a baseline check unrouted or route it twice.
    pub fn enforce_coverage(mut self, enforce: bool) -> Self {
        self.enforce_coverage = enforce;
        self
    }

    pub async fn run(
        &self,
        ctx: &StageContext,
        asset: &AssetInfo,
    ) -> Result<CriteriaMappingResult, StageError> {
        let template = ctx.template(Self::STAGE)?;
        let baseline = ctx.baseline(Self::STAGE)?;
        let profiles = ctx.device_profiles(Self::STAGE)?;

        let profile = match profiles.find(asset) {
            Some((key, profile)) => {
                tracing::debug!(profile = key, "device profile matched");
                profile.clone()
            }
            None => {
                tracing::debug!(key = %asset.profile_key(), "no device profile for asset");
                json!({})
            }
        };

        let summary: Vec<CheckSummary<'_>> = baseline
            .checks()
            .iter()
            .map(|check| CheckSummary {
                check_id: &check.check_id,
                title: &check.title,
                severity: check.severity,
                description: check.description.as_deref().unwrap_or_default(),
            })
            .collect();

        let asset_json = to_prompt_json(Self::STAGE, asset)?;
        let baseline_json = to_prompt_json(Self::STAGE, &summary)?;
        let profile_json = to_prompt_json::<JsonValue>(Self::STAGE, &profile)?;
        let prompt = prompts::render(
            &template,
            &[
                (Placeholder::AssetInfo, &asset_json),
                (Placeholder::CceBaseline, &baseline_json),
                (Placeholder::DeviceProfile, &profile_json),
            ],
        );

        let enforce_coverage = self.enforce_coverage;
        let mapping = ctx
            .invoke(Self::STAGE, prompt, |text| {
                let mapping = StageValidator::validate_criteria_mapping(text)?;
                if enforce_coverage {
                    StageValidator::check_coverage(&mapping, baseline.check_ids())?;
                }
                Ok(mapping)
            })
            .await?;

        tracing::info!(
            applicable = mapping.applicable.len(),
            excluded = mapping.excluded.len(),
            baseline = baseline.len(),
            "criteria mapped"
        );
        Ok(mapping)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use serde_json::json;

    use super::*;
    use crate::stages::fixtures;
    use crate::testing::ScriptedClient;
    use crate::ErrorKind;

    fn answer(applicable: &[&str], excluded: &[&str]) -> String {
        let list = |ids: &[&str]| -> Vec<JsonValue> {
            ids.iter()
                .map(|id| json!({"check_id": id, "reason": "per profile"}))
                .collect()
        };
        json!({"applicable_checks": list(applicable), "excluded_checks": list(excluded)}).to_string()
    }

    #[tokio::test]
    async fn test_partitions_full_baseline() {
        let client = Arc::new(ScriptedClient::new([answer(
            &["NET-001", "NET-002", "NET-003"],
            &["NET-004", "NET-005"],
        )]));
        let ctx = StageContext::new(client.clone(), Arc::new(fixtures::reference()));

        let mapping = CriteriaMappingStage::new()
            .enforce_coverage(true)
            .run(&ctx, &fixtures::cisco())
            .await
            .unwrap();

        assert_eq!(mapping.applicable_ids(), vec!["NET-001", "NET-002", "NET-003"]);
        assert_eq!(mapping.excluded_ids(), vec!["NET-004", "NET-005"]);
        assert!(mapping
            .coverage(["NET-001", "NET-002", "NET-003", "NET-004", "NET-005"])
            .is_partition());

        let prompt = &client.requests()[0].prompt;
        assert!(prompt.contains("\"hierarchical\""), "profile matched by exact key");
        assert!(prompt.contains("\"check_id\": \"NET-005\""));
        assert!(prompt.contains("\"description\": \"\""), "missing description rendered empty");
        assert!(!prompt.contains("check_patterns"), "baseline summary only");
    }

    #[tokio::test]
    async fn test_unmatched_profile_renders_empty_object() {
        let client = Arc::new(ScriptedClient::new([answer(&["NET-001"], &[])]));
        let ctx = StageContext::new(client.clone(), Arc::new(fixtures::reference()));
        let mut asset = fixtures::cisco();
        asset.vendor = "Arista".into();
        asset.os_type = "EOS".into();

        CriteriaMappingStage::new().run(&ctx, &asset).await.unwrap();
        assert!(client.requests()[0].prompt.ends_with("Profile {}"));
    }

    #[tokio::test]
    async fn test_coverage_gap_rejected_when_enforced() {
        let client = Arc::new(ScriptedClient::new([
            answer(&["NET-001"], &["NET-002"]),
            answer(&["NET-001"], &["NET-002"]),
        ]));
        let ctx = StageContext::new(client.clone(), Arc::new(fixtures::reference()));

        let lenient = CriteriaMappingStage::new().run(&ctx, &fixtures::cisco()).await;
        assert!(lenient.is_ok());

        let err = CriteriaMappingStage::new()
            .enforce_coverage(true)
            .run(&ctx, &fixtures::cisco())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
        assert!(err.to_string().contains("NET-003"));
    }

    #[tokio::test]
    async fn test_item_without_reason_rejected() {
        let client = Arc::new(ScriptedClient::new([
            r#"{"applicable_checks": [{"check_id": "NET-001"}], "excluded_checks": []}"#,
        ]));
        let ctx = StageContext::new(client, Arc::new(fixtures::reference()));

        let err = CriteriaMappingStage::new().run(&ctx, &fixtures::cisco()).await.unwrap_err();
        assert_eq!(err.stage(), Stage::CriteriaMapping);
        assert_eq!(err.kind(), ErrorKind::Validation);
    }
}
