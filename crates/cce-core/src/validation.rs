//! Schema checks and normalization for stage responses.
//!
//! Each stage response is decoded with the recovery parser (strict mode,
//! after stripping a surrounding code fence), checked for every required
//! field, checked for types and ranges, and converted into its typed result.
//! The first violation rejects the whole response.

use std::collections::BTreeMap;

use serde::Deserialize;
use serde_json::{Map, Value as JsonValue};
use thiserror::Error;

use crate::recovery::{self, ParseMode};
use crate::types::{
    AssessmentResult, AssetInfo, CheckMapping, CheckStatus, Confidence, ConfidenceLevel,
    ConfigParsingResult, CriteriaMappingResult, ParsedCheckConfig, Stage,
    VulnerabilityAssessmentResult,
};

/// Field name used when the violation concerns the whole document.
pub const ROOT_FIELD: &str = "$";

const ASSET_FIELDS: [&str; 7] = [
    "vendor",
    "os_type",
    "os_version",
    "hostname",
    "device_type",
    "device_role",
    "confidence",
];

const ASSESSMENT_FIELDS: [&str; 5] = [
    "status",
    "score",
    "findings",
    "recommendation",
    "remediation_commands",
];

/// A stage response that does not satisfy its schema.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ValidationError {
    #[error("{stage}: response is not valid JSON: {message} (response starts with {snippet:?})")]
    InvalidJson {
        stage: Stage,
        message: String,
        snippet: String,
    },

    #[error("{stage}: missing required field '{field}'")]
    MissingField { stage: Stage, field: String },

    #[error("{stage}: invalid field '{field}': {reason}")]
    InvalidField {
        stage: Stage,
        field: String,
        reason: String,
    },

    #[error("{stage}: checks must appear in exactly one list (missing: {missing:?}, in both: {overlapping:?})")]
    Coverage {
        stage: Stage,
        missing: Vec<String>,
        overlapping: Vec<String>,
    },
}

impl ValidationError {
    pub fn stage(&self) -> Stage {
        match self {
            ValidationError::InvalidJson { stage, .. }
            | ValidationError::MissingField { stage, .. }
            | ValidationError::InvalidField { stage, .. }
            | ValidationError::Coverage { stage, .. } => *stage,
        }
    }

    /// Path of the offending field, e.g. `assessment_results.C1.score`.
    pub fn field(&self) -> Option<&str> {
        match self {
            ValidationError::MissingField { field, .. }
            | ValidationError::InvalidField { field, .. } => Some(field),
            _ => None,
        }
    }
}

/// Typed view over one JSON object, remembering where it sits in the response.
struct Fields<'a> {
    stage: Stage,
    path: String,
    object: &'a Map<String, JsonValue>,
}

impl<'a> Fields<'a> {
    fn at(stage: Stage, path: String, value: &'a JsonValue) -> Result<Self, ValidationError> {
        match value.as_object() {
            Some(object) => Ok(Self {
                stage,
                path,
                object,
            }),
            None => Err(ValidationError::InvalidField {
                stage,
                field: if path.is_empty() {
                    ROOT_FIELD.to_string()
                } else {
                    path
                },
                reason: "expected a JSON object".to_string(),
            }),
        }
    }

    fn root(stage: Stage, value: &'a JsonValue) -> Result<Self, ValidationError> {
        Self::at(stage, String::new(), value)
    }

    fn path_of(&self, key: &str) -> String {
        if self.path.is_empty() {
            key.to_string()
        } else {
            format!("{}.{}", self.path, key)
        }
    }

    fn invalid(&self, key: &str, reason: impl Into<String>) -> ValidationError {
        ValidationError::InvalidField {
            stage: self.stage,
            field: self.path_of(key),
            reason: reason.into(),
        }
    }

    /// Fail on the first absent key, in declaration order.
    fn require_all(&self, keys: &[&str]) -> Result<(), ValidationError> {
        match keys.iter().find(|key| !self.object.contains_key(**key)) {
            Some(key) => Err(ValidationError::MissingField {
                stage: self.stage,
                field: self.path_of(key),
            }),
            None => Ok(()),
        }
    }

    fn value(&self, key: &str) -> Result<&'a JsonValue, ValidationError> {
        self.object
            .get(key)
            .ok_or_else(|| ValidationError::MissingField {
                stage: self.stage,
                field: self.path_of(key),
            })
    }

    fn string(&self, key: &str) -> Result<String, ValidationError> {
        self.value(key)?
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| self.invalid(key, "expected a string"))
    }

    fn non_empty_string(&self, key: &str) -> Result<String, ValidationError> {
        let value = self.string(key)?;
        if value.trim().is_empty() {
            return Err(self.invalid(key, "must not be empty"));
        }
        Ok(value)
    }

    fn boolean(&self, key: &str) -> Result<bool, ValidationError> {
        self.value(key)?
            .as_bool()
            .ok_or_else(|| self.invalid(key, "expected a boolean"))
    }

    fn object(&self, key: &str) -> Result<&'a Map<String, JsonValue>, ValidationError> {
        self.value(key)?
            .as_object()
            .ok_or_else(|| self.invalid(key, "expected an object"))
    }

    fn array(&self, key: &str) -> Result<&'a Vec<JsonValue>, ValidationError> {
        self.value(key)?
            .as_array()
            .ok_or_else(|| self.invalid(key, "expected an array"))
    }

    fn string_array(&self, key: &str) -> Result<Vec<String>, ValidationError> {
        self.array(key)?
            .iter()
            .enumerate()
            .map(|(i, item)| {
                item.as_str()
                    .map(str::to_string)
                    .ok_or_else(|| self.invalid(&format!("{key}[{i}]"), "expected a string"))
            })
            .collect()
    }

    fn number_in(&self, key: &str, min: f64, max: f64) -> Result<f64, ValidationError> {
        let number = self
            .value(key)?
            .as_f64()
            .ok_or_else(|| self.invalid(key, "expected a number"))?;
        if !(min..=max).contains(&number) {
            return Err(self.invalid(key, format!("must be between {min} and {max}, got {number}")));
        }
        Ok(number)
    }
}

/// Stage 4 results arrive either keyed by check id or as a list of records.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum AssessmentPayload {
    Keyed(Map<String, JsonValue>),
    Listed(Vec<JsonValue>),
}

impl AssessmentPayload {
    fn into_canonical(self) -> Result<BTreeMap<String, JsonValue>, ValidationError> {
        let stage = Stage::VulnerabilityAssessment;
        match self {
            AssessmentPayload::Keyed(map) => Ok(map.into_iter().collect()),
            AssessmentPayload::Listed(items) => {
                let mut canonical = BTreeMap::new();
                for (i, item) in items.into_iter().enumerate() {
                    let path = format!("assessment_results[{i}]");
                    let check_id = Fields::at(stage, path, &item)?.non_empty_string("check_id")?;
                    // Later records for the same check replace earlier ones.
                    canonical.insert(check_id, item);
                }
                Ok(canonical)
            }
        }
    }
}

/// Convert the map-or-array `assessment_results` value into the canonical
/// map keyed by check id.
pub fn normalize_assessment_results(
    value: &JsonValue,
) -> Result<BTreeMap<String, JsonValue>, ValidationError> {
    AssessmentPayload::deserialize(value)
        .map_err(|_| ValidationError::InvalidField {
            stage: Stage::VulnerabilityAssessment,
            field: "assessment_results".to_string(),
            reason: "expected an object keyed by check_id or an array of objects".to_string(),
        })?
        .into_canonical()
}

/// Remove one surrounding ```` ```json ```` / ```` ``` ```` fence, if present.
fn strip_code_fence(text: &str) -> &str {
    let text = text.trim();
    let text = text
        .strip_prefix("```json")
        .or_else(|| text.strip_prefix("```"))
        .unwrap_or(text);
    text.strip_suffix("```").unwrap_or(text).trim()
}

/// Validates stage responses and builds the typed stage results.
pub struct StageValidator;

impl StageValidator {
    /// Decode a raw response for `stage` into JSON.
    pub fn decode(stage: Stage, text: &str) -> Result<JsonValue, ValidationError> {
        recovery::parse(strip_code_fence(text), ParseMode::Strict).map_err(|e| {
            ValidationError::InvalidJson {
                stage,
                message: e.message,
                snippet: recovery::snippet(text),
            }
        })
    }

    /// Stage 1: device identity.
    pub fn validate_asset_identification(text: &str) -> Result<AssetInfo, ValidationError> {
        let stage = Stage::AssetIdentification;
        let value = Self::decode(stage, text)?;
        let fields = Fields::root(stage, &value)?;
        fields.require_all(&ASSET_FIELDS)?;

        let asset = AssetInfo {
            vendor: fields.non_empty_string("vendor")?,
            os_type: fields.non_empty_string("os_type")?,
            os_version: fields.non_empty_string("os_version")?,
            hostname: fields.non_empty_string("hostname")?,
            device_type: fields.non_empty_string("device_type")?,
            device_role: fields.non_empty_string("device_role")?,
            confidence: confidence(&fields)?,
        };

        tracing::debug!(
            vendor = %asset.vendor,
            os_type = %asset.os_type,
            hostname = %asset.hostname,
            "asset identification response accepted"
        );
        Ok(asset)
    }

    /// Stage 2: applicable and excluded checks.
    pub fn validate_criteria_mapping(text: &str) -> Result<CriteriaMappingResult, ValidationError> {
        let stage = Stage::CriteriaMapping;
        let value = Self::decode(stage, text)?;
        let fields = Fields::root(stage, &value)?;
        fields.require_all(&["applicable_checks", "excluded_checks"])?;

        Ok(CriteriaMappingResult {
            applicable: check_mappings(&fields, "applicable_checks")?,
            excluded: check_mappings(&fields, "excluded_checks")?,
        })
    }

    /// Reject a mapping unless every baseline check lands in exactly one list.
    pub fn check_coverage<'a>(
        mapping: &CriteriaMappingResult,
        baseline_ids: impl IntoIterator<Item = &'a str>,
    ) -> Result<(), ValidationError> {
        let coverage = mapping.coverage(baseline_ids);
        if !coverage.unknown.is_empty() {
            tracing::warn!(unknown = ?coverage.unknown, "criteria mapping names checks outside the baseline");
        }
        if coverage.is_partition() {
            return Ok(());
        }
        Err(ValidationError::Coverage {
            stage: Stage::CriteriaMapping,
            missing: coverage.missing,
            overlapping: coverage.overlapping,
        })
    }

    /// Stage 3: configuration evidence per check.
    pub fn validate_config_parsing(text: &str) -> Result<ConfigParsingResult, ValidationError> {
        let stage = Stage::ConfigParsing;
        let value = Self::decode(stage, text)?;
        let fields = Fields::root(stage, &value)?;
        fields.require_all(&["parsed_config"])?;

        let mut parsed_config = BTreeMap::new();
        for (check_id, entry) in fields.object("parsed_config")? {
            let entry = Fields::at(stage, format!("parsed_config.{check_id}"), entry)?;
            entry.require_all(&["found_config", "extracted_values", "config_present"])?;

            parsed_config.insert(
                check_id.clone(),
                ParsedCheckConfig {
                    check_id: check_id.clone(),
                    found_config: entry.string_array("found_config")?,
                    extracted_values: entry.object("extracted_values")?.clone(),
                    config_present: entry.boolean("config_present")?,
                },
            );
        }

        Ok(ConfigParsingResult { parsed_config })
    }

    /// Stage 4: per-check verdicts, accepting either the keyed or listed shape.
    pub fn validate_vulnerability_assessment(
        text: &str,
    ) -> Result<VulnerabilityAssessmentResult, ValidationError> {
        let stage = Stage::VulnerabilityAssessment;
        let value = Self::decode(stage, text)?;
        let fields = Fields::root(stage, &value)?;
        fields.require_all(&["assessment_results"])?;

        let canonical = normalize_assessment_results(fields.value("assessment_results")?)?;

        let mut assessment_results = BTreeMap::new();
        for (check_id, entry) in canonical {
            let result = assessment_result(stage, &check_id, &entry)?;
            assessment_results.insert(check_id, result);
        }

        Ok(VulnerabilityAssessmentResult { assessment_results })
    }
}

fn confidence(fields: &Fields<'_>) -> Result<Confidence, ValidationError> {
    let value = fields.value("confidence")?;
    if let Some(level) = value.as_str() {
        return ConfidenceLevel::parse(level)
            .map(Confidence::Level)
            .ok_or_else(|| fields.invalid("confidence", "must be one of high, medium, low"));
    }
    if value.is_number() {
        return fields.number_in("confidence", 0.0, 1.0).map(Confidence::Score);
    }
    Err(fields.invalid(
        "confidence",
        "expected a number in [0, 1] or one of high, medium, low",
    ))
}

fn check_mappings(fields: &Fields<'_>, key: &str) -> Result<Vec<CheckMapping>, ValidationError> {
    fields
        .array(key)?
        .iter()
        .enumerate()
        .map(|(i, item)| {
            let item = Fields::at(fields.stage, format!("{key}[{i}]"), item)?;
            item.require_all(&["check_id", "reason"])?;
            Ok(CheckMapping {
                check_id: item.non_empty_string("check_id")?,
                reason: item.string("reason")?,
            })
        })
        .collect()
}

fn assessment_result(
    stage: Stage,
    check_id: &str,
    entry: &JsonValue,
) -> Result<AssessmentResult, ValidationError> {
    let fields = Fields::at(stage, format!("assessment_results.{check_id}"), entry)?;
    fields.require_all(&ASSESSMENT_FIELDS)?;

    let status = fields.string("status")?;
    let status = CheckStatus::parse(&status).ok_or_else(|| {
        fields.invalid(
            "status",
            format!("'{status}' is not one of pass, fail, manual_review, not_configured"),
        )
    })?;

    Ok(AssessmentResult {
        check_id: check_id.to_string(),
        status,
        score: fields.number_in("score", 0.0, 100.0)?,
        findings: fields.string("findings")?,
        recommendation: fields.string("recommendation")?,
        remediation_commands: fields.string_array("remediation_commands")?,
    })
}
