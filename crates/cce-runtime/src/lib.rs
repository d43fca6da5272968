//! # cce-runtime
//!
//! Model-backed execution of the CCE Inspector assessment pipeline.
//!
//! `cce-core` owns the typed artifacts and the validation rules; this crate
//! supplies everything that talks to a model:
//! - [`AiClient`] backends for Anthropic, OpenAI-compatible APIs and Ollama,
//!   each retrying transient failures with exponential backoff
//! - a disk [`ResponseCache`] keyed by prompt, system prompt and model
//! - the four stages and the [`AssessmentPipeline`] that sequences them
//! - [`Settings`] loaded from YAML and the environment
//!
//! ## Example
//!
//! ```rust,ignore
//! use cce_runtime::{AssessmentPipeline, Settings};
//!
//! let settings = Settings::load(None)?;
//! let pipeline = AssessmentPipeline::from_settings(&settings)?;
//! let result = pipeline.run_from_file("router.cfg").await?;
//! result.save_json(&settings.output.dir)?;
//! ```

use std::fmt;

use serde::Serialize;

pub mod cache;
pub mod config;
pub mod orchestrator;
pub mod prompts;
pub mod providers;
pub mod resilience;
pub mod stages;

#[cfg(test)]
mod testing;

pub use cache::{CacheError, CacheStats, ResponseCache};
pub use config::{ConfigError, Settings};
pub use orchestrator::{AssessmentPipeline, AssessmentPipelineBuilder, PipelineError};
pub use providers::{
    AiClient, AiClientError, AiClientFactory, AiResponse, ClientSettings, GenerateRequest,
    ModelInfo, ProviderKind, TokenUsage,
};
pub use resilience::RetryPolicy;
pub use stages::{StageContext, StageError};

/// Coarse classification of every failure the pipeline can surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Backend unreachable
    Connection,
    Timeout,
    /// Backend rejected the call for rate (HTTP 429)
    RateLimit,
    /// Backend answered with an unusable body
    Response,
    /// Any other backend or client failure
    Client,
    /// A stage answer did not satisfy its schema
    Validation,
    /// Prompt templates, baseline or profiles unavailable
    Reference,
    Configuration,
}

impl ErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::Connection => "connection",
            ErrorKind::Timeout => "timeout",
            ErrorKind::RateLimit => "rate_limit",
            ErrorKind::Response => "response",
            ErrorKind::Client => "client",
            ErrorKind::Validation => "validation",
            ErrorKind::Reference => "reference",
            ErrorKind::Configuration => "configuration",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_kind_names_match_serde() {
        for kind in [ErrorKind::RateLimit, ErrorKind::Validation, ErrorKind::Configuration] {
            assert_eq!(
                serde_json::to_value(kind).unwrap(),
                serde_json::json!(kind.as_str())
            );
        }
    }
}
