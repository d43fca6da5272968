//! # cce-core
//!
//! Deterministic building blocks of the CCE Inspector assessment pipeline.
//!
//! This crate never talks to a model. It owns:
//! - the typed artifacts each stage produces ([`AssetInfo`],
//!   [`CriteriaMappingResult`], [`ConfigParsingResult`],
//!   [`VulnerabilityAssessmentResult`], [`PipelineResult`])
//! - recovery of JSON from free-form model output ([`recovery`])
//! - per-stage schema validation and normalization ([`StageValidator`])
//! - the static reference data the stages read ([`reference`])
//!
//! ## Key Guarantees
//!
//! 1. **All or nothing**: a stage response either satisfies its schema in
//!    full or is rejected with the stage, field and a response snippet
//! 2. **Bounded recovery**: JSON repair is a fixed rule set and never
//!    invents missing structure
//! 3. **Canonical shapes**: stage 4 results are keyed by check id whatever
//!    shape the model used
//!
//! ## Example
//!
//! ```rust,ignore
//! use cce_core::{StageValidator, Stage};
//!
//! let asset = StageValidator::validate_asset_identification(&model_output)?;
//! println!("{} running {} {}", asset.hostname, asset.vendor, asset.os_version);
//! ```

pub mod recovery;
pub mod reference;
pub mod result;
pub mod types;
pub mod validation;

// Re-export main types at crate root
pub use recovery::{JsonParseError, ParseMode};
pub use reference::{
    Baseline, CheckDefinition, DeviceProfiles, FsReferenceSource, InMemoryReferenceSource,
    ReferenceError, ReferenceSource, Severity,
};
pub use result::PipelineResult;
pub use types::{
    AssessmentResult, AssessmentSummary, AssetInfo, CheckMapping, CheckStatus, Confidence,
    ConfidenceLevel, ConfigParsingResult, Coverage, CriteriaMappingResult, ParsedCheckConfig,
    Stage, VulnerabilityAssessmentResult,
};
pub use validation::{StageValidator, ValidationError};
