//! The four pipeline stages.
//!
//! Each stage loads its reference data, renders its prompt from upstream
//! artifacts, calls the backend once (the client retries internally), and
//! validates the answer into a typed result. Stages never retry on a
//! validation failure.

use std::sync::Arc;
use std::time::Instant;

use serde::Serialize;
use thiserror::Error;

use cce_core::{Baseline, DeviceProfiles, ReferenceError, ReferenceSource, Stage, ValidationError};

use crate::prompts;
use crate::providers::{AiClient, AiClientError, GenerateRequest};
use crate::ErrorKind;

mod assessment;
mod asset;
mod criteria;
mod parsing;

pub use assessment::VulnerabilityAssessmentStage;
pub use asset::AssetIdentificationStage;
pub use criteria::CriteriaMappingStage;
pub use parsing::ConfigParsingStage;

/// Errors from a single stage.
#[derive(Error, Debug)]
pub enum StageError {
    #[error("{stage} backend call failed: {source}")]
    Client {
        stage: Stage,
        #[source]
        source: AiClientError,
    },

    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("{stage} reference data unavailable: {source}")]
    Reference {
        stage: Stage,
        #[source]
        source: ReferenceError,
    },

    #[error("{stage} could not serialize prompt input: {source}")]
    Serialization {
        stage: Stage,
        #[source]
        source: serde_json::Error,
    },
}

impl StageError {
    pub fn stage(&self) -> Stage {
        match self {
            StageError::Client { stage, .. }
            | StageError::Reference { stage, .. }
            | StageError::Serialization { stage, .. } => *stage,
            StageError::Validation(e) => e.stage(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            StageError::Client { source, .. } => source.kind(),
            StageError::Validation(_) => ErrorKind::Validation,
            StageError::Reference { .. } => ErrorKind::Reference,
            StageError::Serialization { .. } => ErrorKind::Client,
        }
    }
}

/// What every stage needs: a backend and its reference data.
#[derive(Clone)]
pub struct StageContext {
    client: Arc<dyn AiClient>,
    reference: Arc<dyn ReferenceSource>,
}

impl StageContext {
    pub fn new(client: Arc<dyn AiClient>, reference: Arc<dyn ReferenceSource>) -> Self {
        Self { client, reference }
    }

    pub fn client(&self) -> &dyn AiClient {
        self.client.as_ref()
    }

    fn reference_error(stage: Stage) -> impl FnOnce(ReferenceError) -> StageError {
        move |source| StageError::Reference { stage, source }
    }

    pub(crate) fn template(&self, stage: Stage) -> Result<String, StageError> {
        self.reference
            .prompt_template(stage)
            .map_err(Self::reference_error(stage))
    }

    pub(crate) fn baseline(&self, stage: Stage) -> Result<Baseline, StageError> {
        self.reference.baseline().map_err(Self::reference_error(stage))
    }

    pub(crate) fn device_profiles(&self, stage: Stage) -> Result<DeviceProfiles, StageError> {
        self.reference
            .device_profiles()
            .map_err(Self::reference_error(stage))
    }

    /// Send `prompt` with the stage's system prompt and validate the answer
    /// with `accept`.
    ///
    /// A rejected answer is discarded from the client so a cached copy is
    /// not replayed on the next run.
    pub(crate) async fn invoke<T, F>(&self, stage: Stage, prompt: String, accept: F) -> Result<T, StageError>
    where
        F: FnOnce(&str) -> Result<T, ValidationError>,
    {
        let request = GenerateRequest::new(prompt).with_system_prompt(prompts::system_prompt(stage));
        let started = Instant::now();

        let response = self
            .client
            .generate(&request)
            .await
            .map_err(|source| StageError::Client { stage, source })?;

        tracing::debug!(
            %stage,
            model = %response.model,
            tokens = response.usage.total_tokens,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "stage response received"
        );

        match accept(&response.content) {
            Ok(value) => Ok(value),
            Err(error) => {
                self.client.discard(&request).await;
                Err(rejected(error))
            }
        }
    }
}

/// Pretty JSON for a prompt slot.
pub(crate) fn to_prompt_json<T: Serialize + ?Sized>(stage: Stage, value: &T) -> Result<String, StageError> {
    serde_json::to_string_pretty(value).map_err(|source| StageError::Serialization { stage, source })
}

/// Log and propagate a validation failure.
fn rejected(error: ValidationError) -> StageError {
    tracing::warn!(
        stage = %error.stage(),
        field = error.field().unwrap_or("-"),
        error = %error,
        "stage response rejected"
    );
    StageError::Validation(error)
}

#[cfg(test)]
pub(crate) mod fixtures {
    use cce_core::{
        AssetInfo, Baseline, Confidence, ConfidenceLevel, DeviceProfiles, InMemoryReferenceSource,
        Stage,
    };

    pub(crate) const BASELINE: &str = r#"{"checks": [
        {"check_id": "NET-001", "title": "SSH version 2", "severity": "high",
         "description": "Management access must use SSHv2",
         "check_patterns": {"required": ["ip ssh version 2"]},
         "evaluation_criteria": {"pass": "ssh v2 only"},
         "vendor_commands": {"cisco": {"remediation": ["ip ssh version 2"]}}},
        {"check_id": "NET-002", "title": "Disable telnet", "severity": "critical",
         "check_patterns": {"forbidden": ["transport input telnet"]}},
        {"check_id": "NET-003", "title": "Login banner", "severity": "low",
         "check_patterns": {"required": ["banner login"]}},
        {"check_id": "NET-004", "title": "NTP authentication", "severity": "medium",
         "check_patterns": {"required": ["ntp authenticate"]}},
        {"check_id": "NET-005", "title": "Wireless WPA3", "severity": "high",
         "check_patterns": {"required": ["wpa3"]}}
    ]}"#;

    pub(crate) const PROFILES: &str =
        r#"{"cisco_ios": {"family": "ios", "config_style": "hierarchical"}, "juniper_junos": {}}"#;

    pub(crate) fn reference() -> InMemoryReferenceSource {
        InMemoryReferenceSource::new()
            .with_template(Stage::AssetIdentification, "Identify:\n{{CONFIGURATION}}")
            .with_template(
                Stage::CriteriaMapping,
                "Asset {{ASSET_INFO}}\nBaseline {{CCE_BASELINE}}\nProfile {{DEVICE_PROFILE}}",
            )
            .with_template(
                Stage::ConfigParsing,
                "Config {{CONFIGURATION}}\nAsset {{ASSET_INFO}}\nChecks {{APPLICABLE_CHECKS}}",
            )
            .with_template(
                Stage::VulnerabilityAssessment,
                "Asset {{ASSET_INFO}}\nParsed {{PARSED_CONFIG}}\nCriteria {{CCE_CRITERIA}}",
            )
            .with_baseline(Baseline::from_json(BASELINE).unwrap())
            .with_profiles(DeviceProfiles::from_json(PROFILES).unwrap())
    }

    pub(crate) fn cisco() -> AssetInfo {
        AssetInfo {
            vendor: "Cisco".into(),
            os_type: "IOS".into(),
            os_version: "15.2(4)M".into(),
            hostname: "core-rtr-01".into(),
            device_type: "router".into(),
            device_role: "core".into(),
            confidence: Confidence::Level(ConfidenceLevel::High),
        }
    }
}
