//! System prompts and template rendering for the four stages.
//!
//! Templates come from a [`cce_core::ReferenceSource`] and carry
//! `{{PLACEHOLDER}}` tokens. Rendering is verbatim substitution: no escaping
//! and no check that every token was filled.

use std::fmt;

use cce_core::Stage;

pub const ASSET_IDENTIFICATION_SYSTEM_PROMPT: &str =
    "You are a network security expert analyzing device configurations.";

pub const CRITERIA_MAPPING_SYSTEM_PROMPT: &str =
    "You are a network security expert mapping compliance criteria to devices.";

pub const CONFIG_PARSING_SYSTEM_PROMPT: &str = "You are a network configuration parsing expert.";

pub const VULNERABILITY_ASSESSMENT_SYSTEM_PROMPT: &str =
    "You are a network security auditor assessing compliance vulnerabilities.";

/// System prompt sent with every request of `stage`.
pub fn system_prompt(stage: Stage) -> &'static str {
    match stage {
        Stage::AssetIdentification => ASSET_IDENTIFICATION_SYSTEM_PROMPT,
        Stage::CriteriaMapping => CRITERIA_MAPPING_SYSTEM_PROMPT,
        Stage::ConfigParsing => CONFIG_PARSING_SYSTEM_PROMPT,
        Stage::VulnerabilityAssessment => VULNERABILITY_ASSESSMENT_SYSTEM_PROMPT,
    }
}

/// Named slots in a prompt template.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Placeholder {
    Configuration,
    AssetInfo,
    CceBaseline,
    DeviceProfile,
    ApplicableChecks,
    ParsedConfig,
    CceCriteria,
}

impl Placeholder {
    pub fn token(self) -> &'static str {
        match self {
            Placeholder::Configuration => "{{CONFIGURATION}}",
            Placeholder::AssetInfo => "{{ASSET_INFO}}",
            Placeholder::CceBaseline => "{{CCE_BASELINE}}",
            Placeholder::DeviceProfile => "{{DEVICE_PROFILE}}",
            Placeholder::ApplicableChecks => "{{APPLICABLE_CHECKS}}",
            Placeholder::ParsedConfig => "{{PARSED_CONFIG}}",
            Placeholder::CceCriteria => "{{CCE_CRITERIA}}",
        }
    }
}

impl fmt::Display for Placeholder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.token())
    }
}

/// Replace every occurrence of each placeholder with its value.
pub fn render(template: &str, values: &[(Placeholder, &str)]) -> String {
    values
        .iter()
        .fold(template.to_string(), |prompt, (placeholder, value)| {
            prompt.replace(placeholder.token(), value)
        })
}
