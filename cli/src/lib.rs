use droplet::{io::DEFAULT_EXTENSIONS, AngleError, BatchOptions, EngineConfig};

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CliError {
    #[error(transparent)]
    SerdeError(#[from] serde_json::Error),
    #[error(transparent)]
    TomlDeError(#[from] toml::de::Error),
    #[error(transparent)]
    TomlSerError(#[from] toml::ser::Error),
    #[error(transparent)]
    IoError(#[from] std::io::Error),
    #[error(transparent)]
    Engine(#[from] AngleError),
    #[error("Unsupported file format. Please use .toml or .json files")]
    UnsupportedFileFormat,
}

/// Settings for a batch run: the engine itself plus how images are picked,
/// scheduled and logged.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq)]
#[serde(default)]
pub struct BatchConfig {
    pub accepted_extensions: Vec<String>,
    /// Concurrent measurements; defaults to the number of CPUs
    pub jobs: Option<usize>,
    /// Per-image time limit in seconds
    pub timeout_secs: Option<f64>,
    /// Log file name, `.log` is appended when missing
    pub log_file: String,
    pub engine: EngineConfig,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            accepted_extensions: DEFAULT_EXTENSIONS.iter().map(|ext| ext.to_string()).collect(),
            jobs: None,
            timeout_secs: None,
            log_file: "results.log".to_string(),
            engine: EngineConfig::default(),
        }
    }
}

impl BatchConfig {
    /// Load BatchConfig from a TOML file
    pub fn from_toml_file<P: AsRef<Path>>(path: P) -> Result<Self, CliError> {
        let content = fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    /// Load BatchConfig from a TOML string
    pub fn from_toml(content: &str) -> Result<Self, CliError> {
        let config: BatchConfig = toml::from_str(content)?;
        config.engine.validate()?;
        Ok(config)
    }

    /// Load BatchConfig from a JSON file
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self, CliError> {
        let content = fs::read_to_string(path)?;
        Self::from_json(&content)
    }

    /// Load BatchConfig from a JSON string
    pub fn from_json(content: &str) -> Result<Self, CliError> {
        let config: BatchConfig = serde_json::from_str(content)?;
        config.engine.validate()?;
        Ok(config)
    }

    /// Auto-detect file format and load configuration
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, CliError> {
        let path_ref = path.as_ref();
        match path_ref.extension().and_then(|ext| ext.to_str()) {
            Some("toml") => Self::from_toml_file(path),
            Some("json") => Self::from_json_file(path),
            _ => Err(CliError::UnsupportedFileFormat),
        }
    }

    /// Convert BatchConfig to a TOML string
    pub fn to_toml(&self) -> Result<String, CliError> {
        Ok(toml::to_string_pretty(&self)?)
    }

    pub fn to_json(&self) -> Result<String, CliError> {
        Ok(serde_json::to_string_pretty(&self)?)
    }

    pub fn batch_options(&self) -> BatchOptions {
        let defaults = BatchOptions::default();
        BatchOptions {
            jobs: self.jobs.unwrap_or(defaults.jobs).max(1),
            timeout: self
                .timeout_secs
                .filter(|secs| *secs > 0.0)
                .map(Duration::from_secs_f64),
        }
    }
}

/// Where the log of a run goes: `name` inside `dir`, with `.log` appended
/// when the name does not already end in it
pub fn log_path(dir: &Path, name: &str) -> PathBuf {
    if name.to_ascii_lowercase().ends_with(".log") {
        dir.join(name)
    } else {
        dir.join(format!("{name}.log"))
    }
}
