//! `formwork.toml` settings
//!
//! ```toml
//! output_dir = "formwork.out"
//! path_metadata = true
//! description_prefix = "(formwork)"
//! ```
//!
//! Every key is optional. Command-line flags override file values.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::debug;

use formwork_synth::SynthConfig;

pub const SETTINGS_FILE: &str = "formwork.toml";
pub const DEFAULT_OUTPUT_DIR: &str = "formwork.out";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Settings {
    /// Directory the assembly is written to, relative to the settings file
    pub output_dir: PathBuf,
    /// Record construct paths in resource metadata
    pub path_metadata: bool,
    /// Prepended to every unit description
    pub description_prefix: Option<String>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from(DEFAULT_OUTPUT_DIR),
            path_metadata: false,
            description_prefix: None,
        }
    }
}

impl Settings {
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read settings file: {}", path.display()))?;

        let mut settings: Settings = toml::from_str(&content)
            .with_context(|| format!("Failed to parse settings file: {}", path.display()))?;
        if settings.output_dir.is_relative() {
            if let Some(base) = path.parent() {
                settings.output_dir = base.join(&settings.output_dir);
            }
        }
        Ok(settings)
    }

    /// Settings for an application definition
    ///
    /// An explicit settings path must exist. Otherwise `formwork.toml` next to
    /// the definition is used when present, and defaults when not.
    pub fn resolve(explicit: Option<&Path>, app_file: &Path) -> Result<Self> {
        if let Some(path) = explicit {
            return Self::from_file(path);
        }
        let candidate = app_file
            .parent()
            .map(|dir| dir.join(SETTINGS_FILE))
            .filter(|path| path.is_file());
        match candidate {
            Some(path) => {
                debug!("Using settings from {}", path.display());
                Self::from_file(&path)
            }
            None => Ok(Self::default()),
        }
    }

    pub fn synth_config(&self) -> SynthConfig {
        SynthConfig {
            path_metadata: self.path_metadata,
            description_prefix: self.description_prefix.clone(),
        }
    }
}
