//! Static reference data: prompt templates, check baselines, device profiles.
//!
//! The stages only read this data. Anything missing or malformed is an
//! error; nothing here falls back to defaults.

mod baseline;
mod schema;
mod source;

pub use baseline::{Baseline, CheckDefinition, DeviceProfiles, Severity};
pub use schema::validate_baseline_schema;
pub use source::{FsReferenceSource, InMemoryReferenceSource, ReferenceSource};

use std::path::PathBuf;
use thiserror::Error;

/// Errors loading reference data.
#[derive(Error, Debug)]
pub enum ReferenceError {
    #[error("{what} not found ({location})")]
    Missing { what: String, location: String },

    #[error("Failed to read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse {what}: {source}")]
    Json {
        what: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("Invalid {what}: {message}")]
    Invalid { what: String, message: String },
}
