//! Sequential four-stage assessment pipeline.
//!
//! The pipeline runs asset identification, criteria mapping, configuration
//! parsing and vulnerability assessment strictly in order, each stage
//! consuming the typed output of the ones before it. Any failure aborts the
//! run: nothing is retried here and no partial result is returned.

use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use serde_json::{json, Map, Value as JsonValue};
use thiserror::Error;

use cce_core::{FsReferenceSource, PipelineResult, ReferenceSource, Stage};

use crate::config::Settings;
use crate::providers::{AiClient, AiClientError, AiClientFactory};
use crate::stages::{
    AssetIdentificationStage, ConfigParsingStage, CriteriaMappingStage, StageContext, StageError,
    VulnerabilityAssessmentStage,
};
use crate::ErrorKind;

/// Errors from a pipeline run.
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("pipeline not configured: {0}")]
    NotConfigured(String),

    #[error(transparent)]
    Client(#[from] AiClientError),

    #[error(transparent)]
    Stage(#[from] StageError),

    #[error("failed to read configuration {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl PipelineError {
    /// The stage that failed, if the run got that far.
    pub fn stage(&self) -> Option<Stage> {
        match self {
            PipelineError::Stage(e) => Some(e.stage()),
            _ => None,
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            PipelineError::NotConfigured(_) | PipelineError::Io { .. } => ErrorKind::Configuration,
            PipelineError::Client(e) => e.kind(),
            PipelineError::Stage(e) => e.kind(),
        }
    }
}

/// Runs the four stages against one backend and one set of reference data.
pub struct AssessmentPipeline {
    context: StageContext,
    criteria: CriteriaMappingStage,
}

impl AssessmentPipeline {
    pub fn builder() -> AssessmentPipelineBuilder {
        AssessmentPipelineBuilder::new()
    }

    /// Client from the configured provider, reference data from
    /// `pipeline.reference_dir`.
    pub fn from_settings(settings: &Settings) -> Result<Self, PipelineError> {
        let client = AiClientFactory::create(settings)?;
        Self::builder()
            .client(client)
            .reference(Arc::new(FsReferenceSource::new(&settings.pipeline.reference_dir)))
            .enforce_criteria_coverage(settings.pipeline.enforce_criteria_coverage)
            .build()
    }

    pub fn client(&self) -> &dyn AiClient {
        self.context.client()
    }

    /// Assess one configuration.
    ///
    /// `metadata` is copied into the result; the pipeline adds
    /// `ai_provider`, `model` and `stage_timings` on top.
    pub async fn run(
        &self,
        configuration: &str,
        metadata: Map<String, JsonValue>,
    ) -> Result<PipelineResult, PipelineError> {
        let timestamp = Utc::now();
        let started = Instant::now();
        let mut timings = StageTimings::default();
        let ctx = &self.context;

        tracing::info!(
            provider = %ctx.client().provider(),
            model = ctx.client().model(),
            config_bytes = configuration.len(),
            "starting assessment"
        );

        let asset = timings
            .time(Stage::AssetIdentification, AssetIdentificationStage.run(ctx, configuration))
            .await?;
        let mapping = timings
            .time(Stage::CriteriaMapping, self.criteria.run(ctx, &asset))
            .await?;
        let parsing = timings
            .time(
                Stage::ConfigParsing,
                ConfigParsingStage.run(ctx, configuration, &asset, &mapping),
            )
            .await?;
        let assessment = timings
            .time(
                Stage::VulnerabilityAssessment,
                VulnerabilityAssessmentStage.run(ctx, &asset, &parsing),
            )
            .await?;

        let mut metadata = metadata;
        metadata.insert("ai_provider".into(), json!(ctx.client().provider().as_str()));
        metadata.insert("model".into(), json!(ctx.client().model()));
        metadata.insert("stage_timings".into(), timings.to_json());

        let result = PipelineResult::new(
            timestamp,
            started.elapsed(),
            asset,
            mapping,
            parsing,
            assessment,
            metadata,
        );

        tracing::info!(
            hostname = %result.asset_info.hostname,
            checks = result.summary.total_checks,
            failed = result.summary.failed,
            elapsed_s = result.execution_time_seconds,
            "assessment complete"
        );
        Ok(result)
    }

    /// Read a configuration file and assess it, recording its path and size.
    pub async fn run_from_file(&self, path: impl AsRef<Path>) -> Result<PipelineResult, PipelineError> {
        let path = path.as_ref();
        let io_error = |source: io::Error| PipelineError::Io {
            path: path.to_path_buf(),
            source,
        };

        let configuration = tokio::fs::read_to_string(path).await.map_err(io_error)?;
        let size = tokio::fs::metadata(path).await.map_err(io_error)?.len();

        let mut metadata = Map::new();
        metadata.insert("source_file".into(), json!(path.display().to_string()));
        metadata.insert("file_size_bytes".into(), json!(size));

        self.run(&configuration, metadata).await
    }
}

#[derive(Debug, Default)]
struct StageTimings(Vec<(Stage, Duration)>);

impl StageTimings {
    async fn time<T, F>(&mut self, stage: Stage, fut: F) -> Result<T, PipelineError>
    where
        F: std::future::Future<Output = Result<T, StageError>>,
    {
        let started = Instant::now();
        let outcome = fut.await;
        let elapsed = started.elapsed();
        self.0.push((stage, elapsed));

        match outcome {
            Ok(value) => {
                tracing::debug!(%stage, elapsed_ms = elapsed.as_millis() as u64, "stage complete");
                Ok(value)
            }
            Err(e) => {
                tracing::error!(%stage, kind = %e.kind(), error = %e, "assessment aborted");
                Err(e.into())
            }
        }
    }

    fn to_json(&self) -> JsonValue {
        let timings: Map<String, JsonValue> = self
            .0
            .iter()
            .map(|(stage, elapsed)| {
                (
                    format!("stage{}_seconds", stage.number()),
                    json!(elapsed.as_secs_f64()),
                )
            })
            .collect();
        JsonValue::Object(timings)
    }
}

/// Builder for [`AssessmentPipeline`].
pub struct AssessmentPipelineBuilder {
    client: Option<Arc<dyn AiClient>>,
    reference: Option<Arc<dyn ReferenceSource>>,
    enforce_criteria_coverage: bool,
}

impl AssessmentPipelineBuilder {
    pub fn new() -> Self {
        Self {
            client: None,
            reference: None,
            enforce_criteria_coverage: true,
        }
    }

    pub fn client(mut self, client: Arc<dyn AiClient>) -> Self {
        self.client = Some(client);
        self
    }

    pub fn reference(mut self, reference: Arc<dyn ReferenceSource>) -> Self {
        self.reference = Some(reference);
        self
    }

    pub fn enforce_criteria_coverage(mut self, enforce: bool) -> Self {
        self.enforce_criteria_coverage = enforce;
        self
    }

    pub fn build(self) -> Result<AssessmentPipeline, PipelineError> {
        let client = self
            .client
            .ok_or_else(|| PipelineError::NotConfigured("no AI client set".to_string()))?;
        let reference = self
            .reference
            .ok_or_else(|| PipelineError::NotConfigured("no reference source set".to_string()))?;

        Ok(AssessmentPipeline {
            context: StageContext::new(client, reference),
            criteria: CriteriaMappingStage::new().enforce_coverage(self.enforce_criteria_coverage),
        })
    }
}

impl Default for AssessmentPipelineBuilder {
    fn default() -> Self {
        Self::new()
    }
}
