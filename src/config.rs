use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// How to launch the potential backend process.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackendConfig {
    /// Executable name or path.
    pub command: String,
    /// Extra arguments placed before the checkpoint path.
    pub args: Vec<String>,
    /// Argument used for the availability probe.
    pub probe_arg: String,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            command: "apax-calculator".to_string(),
            args: vec![],
            probe_arg: "--help".to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DriverConfig {
    pub backend: BackendConfig,
}

impl DriverConfig {
    /// Loads a JSON config file. Missing fields take their defaults.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        serde_json::from_str(&text)
            .with_context(|| format!("Failed to parse config file {}", path.display()))
    }
}
