//! Where prompt templates, baselines and device profiles come from.

use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use super::{Baseline, DeviceProfiles, ReferenceError};
use crate::types::Stage;

/// Read-only supplier of the static data each stage needs.
pub trait ReferenceSource: Send + Sync {
    /// Prompt template for `stage`, with `{{PLACEHOLDER}}` tokens.
    fn prompt_template(&self, stage: Stage) -> Result<String, ReferenceError>;

    fn baseline(&self) -> Result<Baseline, ReferenceError>;

    fn device_profiles(&self) -> Result<DeviceProfiles, ReferenceError>;
}

/// Reference data laid out on disk:
///
/// ```text
/// <root>/templates/prompts/stage1_asset_identification.txt
/// <root>/templates/prompts/...
/// <root>/config/cce_baseline.json
/// <root>/config/device_profiles.json
/// ```
#[derive(Debug, Clone)]
pub struct FsReferenceSource {
    root: PathBuf,
}

impl FsReferenceSource {
    pub const BASELINE_FILE: &'static str = "config/cce_baseline.json";
    pub const PROFILES_FILE: &'static str = "config/device_profiles.json";
    pub const TEMPLATE_DIR: &'static str = "templates/prompts";

    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn template_path(&self, stage: Stage) -> PathBuf {
        self.root
            .join(Self::TEMPLATE_DIR)
            .join(format!("{}.txt", stage.template_name()))
    }

    fn read(&self, what: String, path: PathBuf) -> Result<String, ReferenceError> {
        fs::read_to_string(&path).map_err(|source| match source.kind() {
            io::ErrorKind::NotFound => ReferenceError::Missing {
                what,
                location: path.display().to_string(),
            },
            _ => ReferenceError::Io { path, source },
        })
    }
}

impl ReferenceSource for FsReferenceSource {
    fn prompt_template(&self, stage: Stage) -> Result<String, ReferenceError> {
        self.read(
            format!("prompt template {}", stage.template_name()),
            self.template_path(stage),
        )
    }

    fn baseline(&self) -> Result<Baseline, ReferenceError> {
        let text = self.read("baseline".to_string(), self.root.join(Self::BASELINE_FILE))?;
        Baseline::from_json(&text)
    }

    fn device_profiles(&self) -> Result<DeviceProfiles, ReferenceError> {
        let text = self.read(
            "device profiles".to_string(),
            self.root.join(Self::PROFILES_FILE),
        )?;
        DeviceProfiles::from_json(&text)
    }
}

/// Reference data held in memory, for embedding and tests.
#[derive(Debug, Clone, Default)]
pub struct InMemoryReferenceSource {
    templates: BTreeMap<Stage, String>,
    baseline: Option<Baseline>,
    profiles: Option<DeviceProfiles>,
}

impl InMemoryReferenceSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_template(mut self, stage: Stage, template: impl Into<String>) -> Self {
        self.templates.insert(stage, template.into());
        self
    }

    pub fn with_baseline(mut self, baseline: Baseline) -> Self {
        self.baseline = Some(baseline);
        self
    }

    pub fn with_profiles(mut self, profiles: DeviceProfiles) -> Self {
        self.profiles = Some(profiles);
        self
    }

    fn missing(what: impl Into<String>) -> ReferenceError {
        ReferenceError::Missing {
            what: what.into(),
            location: "memory".to_string(),
        }
    }
}

impl ReferenceSource for InMemoryReferenceSource {
    fn prompt_template(&self, stage: Stage) -> Result<String, ReferenceError> {
        self.templates
            .get(&stage)
            .cloned()
            .ok_or_else(|| Self::missing(format!("prompt template {}", stage.template_name())))
    }

    fn baseline(&self) -> Result<Baseline, ReferenceError> {
        self.baseline.clone().ok_or_else(|| Self::missing("baseline"))
    }

    fn device_profiles(&self) -> Result<DeviceProfiles, ReferenceError> {
        self.profiles
            .clone()
            .ok_or_else(|| Self::missing("device profiles"))
    }
}
