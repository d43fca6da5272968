use std::collections::BTreeSet;

use serde::Serialize;
use serde_json::{Map, Value as JsonValue};

use cce_core::{
    AssetInfo, ConfigParsingResult, Severity, Stage, StageValidator, VulnerabilityAssessmentResult,
};

use super::{to_prompt_json, StageContext, StageError};
use crate::prompts::{self, Placeholder};

#[derive(Serialize)]
struct CheckCriteria<'a> {
    check_id: &'a str,
    title: &'a str,
    severity: Severity,
    check_patterns: &'a Map<String, JsonValue>,
    evaluation_criteria: &'a JsonValue,
    vendor_commands: &'a Map<String, JsonValue>,
}

/// Stage 4: judge each parsed check against its evaluation criteria.
#[derive(Debug, Clone, Copy, Default)]
pub struct VulnerabilityAssessmentStage;

impl VulnerabilityAssessmentStage {
    const STAGE: Stage = Stage::VulnerabilityAssessment;

    pub async fn run(
        &self,
        ctx: &StageContext,
        asset: &AssetInfo,
        parsing: &ConfigParsingResult,
    ) -> Result<VulnerabilityAssessmentResult, StageError> {
        let template = ctx.template(Self::STAGE)?;
        let baseline = ctx.baseline(Self::STAGE)?;

        if parsing.is_empty() {
            tracing::info!("no parsed checks, skipping vulnerability assessment");
            return Ok(VulnerabilityAssessmentResult::default());
        }

        let criteria: Vec<CheckCriteria<'_>> = baseline
            .select(|id| parsing.get(id).is_some())
            .into_iter()
            .map(|check| CheckCriteria {
                check_id: &check.check_id,
                title: &check.title,
                severity: check.severity,
                check_patterns: &check.check_patterns,
                evaluation_criteria: &check.evaluation_criteria,
                vendor_commands: &check.vendor_commands,
            })
            .collect();

        let requested: BTreeSet<&str> = parsing.check_ids().collect();
        let asset_json = to_prompt_json(Self::STAGE, asset)?;
        let parsed_json = to_prompt_json(Self::STAGE, parsing)?;
        let criteria_json = to_prompt_json(Self::STAGE, &criteria)?;
        let prompt = prompts::render(
            &template,
            &[
                (Placeholder::AssetInfo, &asset_json),
                (Placeholder::ParsedConfig, &parsed_json),
                (Placeholder::CceCriteria, &criteria_json),
            ],
        );

        let mut assessment = ctx
            .invoke(Self::STAGE, prompt, StageValidator::validate_vulnerability_assessment)
            .await?;

        assessment.assessment_results.retain(|check_id, _| {
            let keep = requested.contains(check_id.as_str());
            if !keep {
                tracing::warn!(%check_id, "dropping assessment for a check that was not requested");
            }
            keep
        });

        let summary = assessment.summary();
        tracing::info!(
            total = summary.total_checks,
            passed = summary.passed,
            failed = summary.failed,
            manual_review = summary.manual_review,
            "vulnerabilities assessed"
        );
        Ok(assessment)
    }
}
