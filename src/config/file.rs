//! Configuration file management
//!
//! Handles finding, loading, and validating configuration files.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Configuration file locations (in order of precedence)
const CONFIG_LOCATIONS: &[&str] = &[
    "./nodecheck.yaml",
    "./nodecheck.yml",
    "~/.config/nodecheck/config.yaml",
    "/etc/nodecheck/config.yaml",
];

/// Harness defaults read from disk; every field is optional
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ConfigFile {
    /// Version of config file format
    #[serde(default = "default_version")]
    pub version: String,

    /// Directory holding the test executables
    #[serde(default)]
    pub test_dir: Option<PathBuf>,

    /// Default concurrency
    #[serde(default)]
    pub jobs: Option<usize>,

    /// Test file extension, without the dot
    #[serde(default)]
    pub extension: Option<String>,

    /// Colored output when attached to a terminal
    #[serde(default)]
    pub color: Option<bool>,

    /// Run the sanity subset by default
    #[serde(default)]
    pub sanity: Option<bool>,

    #[serde(default)]
    pub log_level: Option<String>,
}

fn default_version() -> String {
    "1.0".to_string()
}

impl Default for ConfigFile {
    fn default() -> Self {
        Self {
            version: default_version(),
            test_dir: None,
            jobs: None,
            extension: None,
            color: None,
            sanity: None,
            log_level: None,
        }
    }
}

impl ConfigFile {
    /// Find configuration file in standard locations
    pub fn find() -> Option<PathBuf> {
        CONFIG_LOCATIONS
            .iter()
            .map(|location| expand_path(location))
            .find(|path| path.exists())
    }

    /// Load from an explicit path, or the first standard location found,
    /// or fall back to defaults
    pub fn load_or_default(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::load(path),
            None => match Self::find() {
                Some(path) => Self::load(&path),
                None => Ok(Self::default()),
            },
        }
    }

    /// Load configuration from file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Self = if is_yaml_file(path) {
            serde_yaml::from_str(&content)
                .with_context(|| format!("Failed to parse YAML config: {}", path.display()))?
        } else {
            serde_json::from_str(&content)
                .with_context(|| format!("Failed to parse JSON config: {}", path.display()))?
        };

        config.validate()?;
        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if !["1.0"].contains(&self.version.as_str()) {
            anyhow::bail!("Unsupported config version: {}", self.version);
        }

        if self.jobs == Some(0) {
            anyhow::bail!("jobs must be at least 1");
        }

        if let Some(ext) = &self.extension {
            if ext.is_empty() || ext.contains('/') {
                anyhow::bail!("Invalid test extension: {ext:?}");
            }
        }

        Ok(())
    }
}

/// Expand ~ to home directory
fn expand_path(path: &str) -> PathBuf {
    if let Some(stripped) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(stripped);
        }
    }
    PathBuf::from(path)
}

/// Check if file is YAML based on extension
fn is_yaml_file(path: &Path) -> bool {
    path.extension()
        .map(|e| e == "yaml" || e == "yml")
        .unwrap_or(false)
}
