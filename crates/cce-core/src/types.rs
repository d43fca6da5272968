//! Typed artifacts produced by the four assessment stages.
//!
//! Every type here is plain data: built once by a stage, read-only afterward,
//! and serializable with the same field names the stage responses use.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};

/// One of the four fixed pipeline stages, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Stage {
    #[serde(rename = "stage1")]
    AssetIdentification,
    #[serde(rename = "stage2")]
    CriteriaMapping,
    #[serde(rename = "stage3")]
    ConfigParsing,
    #[serde(rename = "stage4")]
    VulnerabilityAssessment,
}

impl Stage {
    /// All stages in the only order they may run.
    pub const ALL: [Stage; 4] = [
        Stage::AssetIdentification,
        Stage::CriteriaMapping,
        Stage::ConfigParsing,
        Stage::VulnerabilityAssessment,
    ];

    pub fn number(self) -> u8 {
        match self {
            Stage::AssetIdentification => 1,
            Stage::CriteriaMapping => 2,
            Stage::ConfigParsing => 3,
            Stage::VulnerabilityAssessment => 4,
        }
    }

    /// Short identifier (`stage1` .. `stage4`).
    pub fn id(self) -> &'static str {
        match self {
            Stage::AssetIdentification => "stage1",
            Stage::CriteriaMapping => "stage2",
            Stage::ConfigParsing => "stage3",
            Stage::VulnerabilityAssessment => "stage4",
        }
    }

    /// Name of the prompt template this stage renders.
    pub fn template_name(self) -> &'static str {
        match self {
            Stage::AssetIdentification => "stage1_asset_identification",
            Stage::CriteriaMapping => "stage2_criteria_mapping",
            Stage::ConfigParsing => "stage3_config_parsing",
            Stage::VulnerabilityAssessment => "stage4_vulnerability_assessment",
        }
    }

    /// The stage that consumes this stage's output, if any.
    pub fn next(self) -> Option<Stage> {
        match self {
            Stage::AssetIdentification => Some(Stage::CriteriaMapping),
            Stage::CriteriaMapping => Some(Stage::ConfigParsing),
            Stage::ConfigParsing => Some(Stage::VulnerabilityAssessment),
            Stage::VulnerabilityAssessment => None,
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.id())
    }
}

/// Qualitative confidence levels accepted from asset identification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConfidenceLevel {
    High,
    Medium,
    Low,
}

impl ConfidenceLevel {
    /// Case-insensitive parse of `high`, `medium` or `low`.
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "high" => Some(ConfidenceLevel::High),
            "medium" => Some(ConfidenceLevel::Medium),
            "low" => Some(ConfidenceLevel::Low),
            _ => None,
        }
    }
}

/// Confidence is either a score in `[0, 1]` or a qualitative level.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Confidence {
    Score(f64),
    Level(ConfidenceLevel),
}

/// Device identity extracted from a configuration by stage 1.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssetInfo {
    pub vendor: String,
    pub os_type: String,
    pub os_version: String,
    pub hostname: String,
    pub device_type: String,
    pub device_role: String,
    pub confidence: Confidence,
}

impl AssetInfo {
    /// Key used to look up a device profile: `"{vendor}_{os_type}"`, lowercased.
    pub fn profile_key(&self) -> String {
        format!("{}_{}", self.vendor, self.os_type).to_lowercase()
    }
}

/// A check routed to one side of the criteria mapping, with the model's reason.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckMapping {
    pub check_id: String,
    pub reason: String,
}

/// Stage 2 output: which baseline checks apply to the device.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CriteriaMappingResult {
    #[serde(rename = "applicable_checks")]
    pub applicable: Vec<CheckMapping>,
    #[serde(rename = "excluded_checks")]
    pub excluded: Vec<CheckMapping>,
}

/// How a criteria mapping lines up with the baseline it was built from.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Coverage {
    /// Baseline checks that appear in neither list.
    pub missing: Vec<String>,
    /// Checks that appear in both lists.
    pub overlapping: Vec<String>,
    /// Checks the model named that are not in the baseline.
    pub unknown: Vec<String>,
}

impl Coverage {
    /// True when every baseline check sits in exactly one list.
    pub fn is_partition(&self) -> bool {
        self.missing.is_empty() && self.overlapping.is_empty()
    }
}

impl CriteriaMappingResult {
    pub fn applicable_ids(&self) -> Vec<&str> {
        self.applicable.iter().map(|m| m.check_id.as_str()).collect()
    }

    pub fn excluded_ids(&self) -> Vec<&str> {
        self.excluded.iter().map(|m| m.check_id.as_str()).collect()
    }

    pub fn is_applicable(&self, check_id: &str) -> bool {
        self.applicable.iter().any(|m| m.check_id == check_id)
    }

    /// Compare the mapping against the baseline's check ids.
    pub fn coverage<'a>(&self, baseline_ids: impl IntoIterator<Item = &'a str>) -> Coverage {
        let baseline: BTreeSet<&str> = baseline_ids.into_iter().collect();
        let applicable: BTreeSet<&str> = self.applicable_ids().into_iter().collect();
        let excluded: BTreeSet<&str> = self.excluded_ids().into_iter().collect();

        let missing = baseline
            .iter()
            .filter(|id| !applicable.contains(*id) && !excluded.contains(*id))
            .map(|id| id.to_string())
            .collect();
        let overlapping = applicable
            .intersection(&excluded)
            .map(|id| id.to_string())
            .collect();
        let unknown = applicable
            .union(&excluded)
            .filter(|id| !baseline.contains(*id))
            .map(|id| id.to_string())
            .collect();

        Coverage {
            missing,
            overlapping,
            unknown,
        }
    }
}

/// Configuration evidence stage 3 found for one check.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParsedCheckConfig {
    #[serde(skip_serializing, default)]
    pub check_id: String,
    pub found_config: Vec<String>,
    pub extracted_values: Map<String, JsonValue>,
    pub config_present: bool,
}

/// Stage 3 output, keyed by check id.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConfigParsingResult {
    pub parsed_config: BTreeMap<String, ParsedCheckConfig>,
}

impl ConfigParsingResult {
    pub fn check_ids(&self) -> impl Iterator<Item = &str> {
        self.parsed_config.keys().map(String::as_str)
    }

    pub fn get(&self, check_id: &str) -> Option<&ParsedCheckConfig> {
        self.parsed_config.get(check_id)
    }

    pub fn len(&self) -> usize {
        self.parsed_config.len()
    }

    pub fn is_empty(&self) -> bool {
        self.parsed_config.is_empty()
    }
}

/// Outcome of assessing one check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckStatus {
    Pass,
    Fail,
    ManualReview,
    NotConfigured,
}

impl CheckStatus {
    /// Case-insensitive parse of the four status strings.
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "pass" => Some(CheckStatus::Pass),
            "fail" => Some(CheckStatus::Fail),
            "manual_review" => Some(CheckStatus::ManualReview),
            "not_configured" => Some(CheckStatus::NotConfigured),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            CheckStatus::Pass => "pass",
            CheckStatus::Fail => "fail",
            CheckStatus::ManualReview => "manual_review",
            CheckStatus::NotConfigured => "not_configured",
        }
    }
}

impl fmt::Display for CheckStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Stage 4 verdict for one check.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssessmentResult {
    pub check_id: String,
    pub status: CheckStatus,
    /// Compliance score in `[0, 100]`.
    pub score: f64,
    pub findings: String,
    pub recommendation: String,
    pub remediation_commands: Vec<String>,
}

/// Stage 4 output, keyed by check id.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VulnerabilityAssessmentResult {
    pub assessment_results: BTreeMap<String, AssessmentResult>,
}

/// Aggregate counts and ratios over a set of assessment results.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AssessmentSummary {
    pub total_checks: usize,
    pub passed: usize,
    pub failed: usize,
    pub manual_review: usize,
    pub not_configured: usize,
    pub pass_percentage: f64,
    pub fail_percentage: f64,
    pub average_score: f64,
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

impl VulnerabilityAssessmentResult {
    pub fn get(&self, check_id: &str) -> Option<&AssessmentResult> {
        self.assessment_results.get(check_id)
    }

    pub fn len(&self) -> usize {
        self.assessment_results.len()
    }

    pub fn is_empty(&self) -> bool {
        self.assessment_results.is_empty()
    }

    /// Counts per status, pass/fail percentages and the mean score.
    ///
    /// Percentages and the average are rounded to two decimals; an empty
    /// result set yields all zeros.
    pub fn summary(&self) -> AssessmentSummary {
        let total = self.assessment_results.len();
        if total == 0 {
            return AssessmentSummary::default();
        }

        let count = |status: CheckStatus| {
            self.assessment_results
                .values()
                .filter(|r| r.status == status)
                .count()
        };
        let passed = count(CheckStatus::Pass);
        let failed = count(CheckStatus::Fail);
        let score_sum: f64 = self.assessment_results.values().map(|r| r.score).sum();

        AssessmentSummary {
            total_checks: total,
            passed,
            failed,
            manual_review: count(CheckStatus::ManualReview),
            not_configured: count(CheckStatus::NotConfigured),
            pass_percentage: round2(passed as f64 / total as f64 * 100.0),
            fail_percentage: round2(failed as f64 / total as f64 * 100.0),
            average_score: round2(score_sum / total as f64),
        }
    }

    /// Failed checks, lowest score first.
    pub fn critical_findings(&self) -> Vec<&AssessmentResult> {
        let mut failed: Vec<&AssessmentResult> = self
            .assessment_results
            .values()
            .filter(|r| r.status == CheckStatus::Fail)
            .collect();
        failed.sort_by(|a, b| a.score.total_cmp(&b.score));
        failed
    }
}
