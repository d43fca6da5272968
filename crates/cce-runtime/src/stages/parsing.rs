use std::collections::BTreeSet;

use serde::Serialize;
use serde_json::{Map, Value as JsonValue};

use cce_core::{AssetInfo, ConfigParsingResult, CriteriaMappingResult, Stage, StageValidator};

use super::{to_prompt_json, StageContext, StageError};
use crate::prompts::{self, Placeholder};

#[derive(Serialize)]
struct ApplicableCheck<'a> {
    check_id: &'a str,
    title: &'a str,
    check_patterns: &'a Map<String, JsonValue>,
    vendor_commands: JsonValue,
}

/// Stage 3: extract the configuration evidence each applicable check needs.
#[derive(Debug, Clone, Copy, Default)]
pub struct ConfigParsingStage;

impl ConfigParsingStage {
    const STAGE: Stage = Stage::ConfigParsing;

    pub async fn run(
        &self,
        ctx: &StageContext,
        configuration: &str,
        asset: &AssetInfo,
        mapping: &CriteriaMappingResult,
    ) -> Result<ConfigParsingResult, StageError> {
        let template = ctx.template(Self::STAGE)?;
        let baseline = ctx.baseline(Self::STAGE)?;

        let checks: Vec<ApplicableCheck<'_>> = baseline
            .select(|id| mapping.is_applicable(id))
            .into_iter()
            .map(|check| ApplicableCheck {
                check_id: &check.check_id,
                title: &check.title,
                check_patterns: &check.check_patterns,
                vendor_commands: check.commands_for_vendor(&asset.vendor),
            })
            .collect();

        if checks.is_empty() {
            tracing::info!("no applicable checks, skipping configuration parsing");
            return Ok(ConfigParsingResult::default());
        }

        let requested: BTreeSet<&str> = checks.iter().map(|c| c.check_id).collect();
        let asset_json = to_prompt_json(Self::STAGE, asset)?;
        let checks_json = to_prompt_json(Self::STAGE, &checks)?;
        let prompt = prompts::render(
            &template,
            &[
                (Placeholder::Configuration, configuration),
                (Placeholder::AssetInfo, &asset_json),
                (Placeholder::ApplicableChecks, &checks_json),
            ],
        );

        let mut parsed = ctx
            .invoke(Self::STAGE, prompt, StageValidator::validate_config_parsing)
            .await?;

        parsed.parsed_config.retain(|check_id, _| {
            let keep = requested.contains(check_id.as_str());
            if !keep {
                tracing::warn!(%check_id, "dropping parsed config for a check that was not requested");
            }
            keep
        });

        tracing::info!(
            requested = requested.len(),
            parsed = parsed.len(),
            "configuration parsed"
        );
        Ok(parsed)
    }
}
