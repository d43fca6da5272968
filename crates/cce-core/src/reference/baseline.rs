//! Check-definition baselines and device profiles.

use std::collections::HashSet;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value as JsonValue};

use super::schema::validate_baseline_schema;
use super::ReferenceError;
use crate::types::AssetInfo;

/// Severity of a compliance check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Critical,
    High,
    Medium,
    Low,
    Info,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Severity::Critical => "critical",
            Severity::High => "high",
            Severity::Medium => "medium",
            Severity::Low => "low",
            Severity::Info => "info",
        };
        f.write_str(name)
    }
}

/// One compliance check from the baseline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckDefinition {
    /// Unique identifier (e.g., "CCE-NET-001")
    pub check_id: String,

    pub title: String,

    pub severity: Severity,

    #[serde(default)]
    pub description: Option<String>,

    /// What the configuration must or must not contain
    pub check_patterns: Map<String, JsonValue>,

    /// How a verdict and score are derived
    #[serde(default)]
    pub evaluation_criteria: JsonValue,

    /// Remediation and inspection commands keyed by lowercase vendor
    #[serde(default)]
    pub vendor_commands: Map<String, JsonValue>,
}

impl CheckDefinition {
    /// Vendor-specific commands for `vendor`, or an empty object.
    pub fn commands_for_vendor(&self, vendor: &str) -> JsonValue {
        self.vendor_commands
            .get(&vendor.to_lowercase())
            .cloned()
            .unwrap_or_else(|| json!({}))
    }
}

/// Ordered catalog of checks for one asset category.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Baseline {
    checks: Vec<CheckDefinition>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum BaselineDocument {
    Bare(Vec<CheckDefinition>),
    Wrapped { checks: Vec<CheckDefinition> },
}

impl Baseline {
    /// Build a baseline, rejecting duplicate check ids.
    pub fn new(checks: Vec<CheckDefinition>) -> Result<Self, ReferenceError> {
        let mut seen = HashSet::new();
        for check in &checks {
            if !seen.insert(check.check_id.as_str()) {
                return Err(ReferenceError::Invalid {
                    what: "baseline".to_string(),
                    message: format!("Duplicate check ID: {}", check.check_id),
                });
            }
        }
        Ok(Self { checks })
    }

    /// Parse a baseline document (`{"checks": [...]}` or a bare array).
    pub fn from_json(json: &str) -> Result<Self, ReferenceError> {
        let document: JsonValue =
            serde_json::from_str(json).map_err(|source| ReferenceError::Json {
                what: "baseline".to_string(),
                source,
            })?;
        Self::from_value(document)
    }

    pub fn from_value(document: JsonValue) -> Result<Self, ReferenceError> {
        validate_baseline_schema(&document).map_err(|errors| ReferenceError::Invalid {
            what: "baseline".to_string(),
            message: errors.join("; "),
        })?;

        let checks = match serde_json::from_value(document).map_err(|source| {
            ReferenceError::Json {
                what: "baseline".to_string(),
                source,
            }
        })? {
            BaselineDocument::Bare(checks) | BaselineDocument::Wrapped { checks } => checks,
        };
        Self::new(checks)
    }

    pub fn checks(&self) -> &[CheckDefinition] {
        &self.checks
    }

    pub fn check_ids(&self) -> impl Iterator<Item = &str> {
        self.checks.iter().map(|c| c.check_id.as_str())
    }

    pub fn get(&self, check_id: &str) -> Option<&CheckDefinition> {
        self.checks.iter().find(|c| c.check_id == check_id)
    }

    /// Checks whose id satisfies `keep`, in baseline order.
    pub fn select<F>(&self, mut keep: F) -> Vec<&CheckDefinition>
    where
        F: FnMut(&str) -> bool,
    {
        self.checks
            .iter()
            .filter(|c| keep(c.check_id.as_str()))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.checks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.checks.is_empty()
    }
}

/// Device profiles keyed by `"{vendor}_{os_type}"`, in file order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeviceProfiles(Map<String, JsonValue>);

impl DeviceProfiles {
    pub fn new(profiles: Map<String, JsonValue>) -> Self {
        Self(profiles)
    }

    pub fn from_json(json: &str) -> Result<Self, ReferenceError> {
        serde_json::from_str(json).map_err(|source| ReferenceError::Json {
            what: "device profiles".to_string(),
            source,
        })
    }

    /// Profile for `asset`: exact `vendor_os_type` key first, then the first
    /// key in file order starting with the vendor name.
    pub fn find(&self, asset: &AssetInfo) -> Option<(&str, &JsonValue)> {
        let key = asset.profile_key();
        if let Some((key, profile)) = self.0.iter().find(|(k, _)| k.to_lowercase() == key) {
            return Some((key.as_str(), profile));
        }

        let vendor = asset.vendor.to_lowercase();
        let (fallback, profile) = self
            .0
            .iter()
            .find(|(k, _)| k.to_lowercase().starts_with(&vendor))?;
        tracing::warn!(%key, profile = %fallback, "no exact device profile, using vendor fallback");
        Some((fallback.as_str(), profile))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}
