//! Layered CLI configuration.

use std::path::{Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;

/// Target value selecting the in-process emulated target instead of a stub.
pub const EMULATED_TARGET: &str = "emulated";

/// Config error.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Invalid config {path}: {source}")]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },
}

/// CLI configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CliConfig {
    /// GDB stub address, or [`EMULATED_TARGET`].
    pub target: String,
    /// Default log filter when `RUST_LOG` is unset.
    pub log: String,
    /// Extension of snapshot files written by `save`.
    pub extension: String,
    /// RSP retransmission limit.
    pub max_retries: usize,
}

impl Default for CliConfig {
    fn default() -> Self {
        Self {
            target: "127.0.0.1:9999".to_string(),
            log: "info".to_string(),
            extension: "qsp".to_string(),
            max_retries: 3,
        }
    }
}

impl CliConfig {
    /// `<config_dir>/qsnap/config.json`
    #[must_use]
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("qsnap").join("config.json"))
    }

    /// Load from an explicit file, or from the default location if present.
    ///
    /// # Errors
    /// Returns error if an explicit file cannot be read, or any file found
    /// cannot be parsed.
    pub fn load(explicit: Option<&Path>) -> Result<Self, ConfigError> {
        match explicit {
            Some(path) => Self::from_file(path),
            None => match Self::default_path() {
                Some(path) if path.is_file() => Self::from_file(&path),
                _ => Ok(Self::default()),
            },
        }
    }

    /// Parse a JSON config file.
    ///
    /// # Errors
    /// Returns error if the file cannot be read or parsed.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config = serde_json::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        tracing::debug!(path = %path.display(), "Loaded config");
        Ok(config)
    }

    /// Apply `QSNAP_TARGET` and `QSNAP_LOG` overrides.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(target) = lookup("QSNAP_TARGET") {
            self.target = target;
        }
        if let Some(log) = lookup("QSNAP_LOG") {
            self.log = log;
        }
    }
}
