//! The aggregated outcome of one pipeline run.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};

use crate::types::{
    AssessmentSummary, AssetInfo, ConfigParsingResult, CriteriaMappingResult,
    VulnerabilityAssessmentResult,
};

/// Everything one assessment produced, ready for persistence or reporting.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineResult {
    pub timestamp: DateTime<Utc>,
    pub execution_time_seconds: f64,
    pub asset_info: AssetInfo,
    pub criteria_mapping: CriteriaMappingResult,
    pub config_parsing: ConfigParsingResult,
    pub vulnerability_assessment: VulnerabilityAssessmentResult,
    /// Derived from `vulnerability_assessment` at construction.
    pub summary: AssessmentSummary,
    /// Provider, model, per-stage timings and caller-supplied entries.
    pub metadata: Map<String, JsonValue>,
}

impl PipelineResult {
    pub fn new(
        timestamp: DateTime<Utc>,
        execution_time: Duration,
        asset_info: AssetInfo,
        criteria_mapping: CriteriaMappingResult,
        config_parsing: ConfigParsingResult,
        vulnerability_assessment: VulnerabilityAssessmentResult,
        metadata: Map<String, JsonValue>,
    ) -> Self {
        let summary = vulnerability_assessment.summary();
        Self {
            timestamp,
            execution_time_seconds: execution_time.as_secs_f64(),
            asset_info,
            criteria_mapping,
            config_parsing,
            vulnerability_assessment,
            summary,
            metadata,
        }
    }

    /// `cce_assessment_{hostname}_{YYYYmmdd_HHMMSS}.json`, keeping only
    /// `[A-Za-z0-9_-]` from the hostname.
    pub fn suggested_file_name(&self) -> String {
        let hostname: String = self
            .asset_info
            .hostname
            .chars()
            .filter(|c| c.is_ascii_alphanumeric() || *c == '-' || *c == '_')
            .collect();
        let hostname = if hostname.is_empty() {
            "unknown".to_string()
        } else {
            hostname
        };
        format!(
            "cce_assessment_{}_{}.json",
            hostname,
            self.timestamp.format("%Y%m%d_%H%M%S")
        )
    }

    /// Write the result as indented JSON into `dir`, creating it if needed.
    pub fn save_json(&self, dir: impl AsRef<Path>) -> io::Result<PathBuf> {
        let dir = dir.as_ref();
        fs::create_dir_all(dir)?;

        let path = dir.join(self.suggested_file_name());
        let contents = serde_json::to_string_pretty(self)?;
        fs::write(&path, contents)?;

        tracing::info!(path = %path.display(), "saved assessment result");
        Ok(path)
    }
}
