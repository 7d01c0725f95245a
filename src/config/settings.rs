//! TOML-based configuration.
//!
//! Supports a config file (vizflow.toml) with environment variable
//! expansion.
//!
//! Example configuration:
//! ```toml
//! [computation]
//! kind = "service"
//!
//! [computation.service]
//! path = "${VIZFLOW_SERVICE_BIN}"
//! args = ["--threads", "4"]
//!
//! [query]
//! timeout_secs = 30
//! page_size = 100
//! ```

use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

/// Error type for settings.
#[derive(Debug, thiserror::Error)]
pub enum SettingsError {
    #[error("Config file not found: {0}")]
    FileNotFound(PathBuf),

    #[error("Failed to read config file: {0}")]
    ReadError(#[from] std::io::Error),

    #[error("Failed to parse config file: {0}")]
    ParseError(#[from] toml::de::Error),

    #[error("Missing environment variable: {0}")]
    MissingEnvVar(String),
}

/// Which backend executes query payloads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ComputationKind {
    /// In-memory evaluation in this process.
    #[default]
    Local,
    /// A spawned computation service process.
    Service,
}

/// Root configuration structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub computation: ComputationSettings,

    #[serde(default)]
    pub query: QuerySettings,
}

/// Computation backend selection.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ComputationSettings {
    #[serde(default)]
    pub kind: ComputationKind,

    #[serde(default)]
    pub service: ServiceSettings,
}

/// Settings for the computation service process.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServiceSettings {
    /// Path to the service binary.
    #[serde(default)]
    pub path: Option<PathBuf>,

    /// Extra arguments passed to the service.
    #[serde(default)]
    pub args: Vec<String>,
}

/// Query dispatch defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuerySettings {
    /// Wall-clock budget per query, in seconds.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// Default page size for raw reads.
    #[serde(default = "default_page_size")]
    pub page_size: usize,
}

fn default_timeout_secs() -> u64 {
    30
}

fn default_page_size() -> usize {
    100
}

impl Default for QuerySettings {
    fn default() -> Self {
        Self {
            timeout_secs: default_timeout_secs(),
            page_size: default_page_size(),
        }
    }
}

impl Settings {
    /// Load settings from a specific path.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, SettingsError> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(SettingsError::FileNotFound(path.to_path_buf()));
        }
        let raw = fs::read_to_string(path)?;
        let expanded = expand_env_vars(&raw)?;
        Ok(toml::from_str(&expanded)?)
    }

    /// Load settings from the default search path: `./vizflow.toml`, then
    /// the user config directory. Missing files yield the defaults.
    pub fn load_default() -> Result<Self, SettingsError> {
        let local = PathBuf::from("vizflow.toml");
        if local.exists() {
            return Self::load(local);
        }
        if let Some(dir) = dirs::config_dir() {
            let user = dir.join("vizflow").join("vizflow.toml");
            if user.exists() {
                return Self::load(user);
            }
        }
        Ok(Self::default())
    }
}

/// Expand `${VAR}` references against the process environment.
fn expand_env_vars(raw: &str) -> Result<String, SettingsError> {
    let mut out = String::with_capacity(raw.len());
    let mut rest = raw;
    while let Some(start) = rest.find("${") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        let Some(end) = after.find('}') else {
            out.push_str(&rest[start..]);
            return Ok(out);
        };
        let name = &after[..end];
        let value =
            env::var(name).map_err(|_| SettingsError::MissingEnvVar(name.to_string()))?;
        out.push_str(&value);
        rest = &after[end + 1..];
    }
    out.push_str(rest);
    Ok(out)
}
