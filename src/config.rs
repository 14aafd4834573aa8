//! Configuration for progression-gate

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::activation::ActivationPolicy;
use crate::context::OperatorRole;
use crate::error::{GateError, Result};

/// Default storage directory
pub fn default_storage_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("progression-gate")
}

/// Operator override code, stored as a SHA-256 hex digest
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperatorCodeConfig {
    pub digest: String,
    pub role: OperatorRole,
}

/// Configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Directory holding the SQLite database
    #[serde(default = "default_storage_dir")]
    pub storage_dir: PathBuf,

    /// Cohort registry file (codes and rosters)
    #[serde(default = "default_registry_path")]
    pub registry_path: PathBuf,

    /// Lesson catalog file
    #[serde(default = "default_catalog_path")]
    pub catalog_path: PathBuf,

    /// How cohort-level and identifier-level activation combine
    #[serde(default)]
    pub activation_policy: ActivationPolicy,

    /// Operator override codes (digests only)
    #[serde(default)]
    pub operators: Vec<OperatorCodeConfig>,

    /// Fallback IANA timezone when a learner has none
    #[serde(default = "default_timezone")]
    pub default_timezone: String,

    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_registry_path() -> PathBuf {
    PathBuf::from("cohorts.toml")
}

fn default_catalog_path() -> PathBuf {
    PathBuf::from("lessons.toml")
}

fn default_timezone() -> String {
    "UTC".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            storage_dir: default_storage_dir(),
            registry_path: default_registry_path(),
            catalog_path: default_catalog_path(),
            activation_policy: ActivationPolicy::default(),
            operators: Vec::new(),
            default_timezone: default_timezone(),
            log_level: default_log_level(),
        }
    }
}

impl Config {
    /// Load config from file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Save config to file
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| GateError::Config(format!("Failed to serialize config: {}", e)))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Reject digests that can never match a SHA-256 hex string
    pub fn validate(&self) -> Result<()> {
        for op in &self.operators {
            let ok = op.digest.len() == 64 && op.digest.chars().all(|c| c.is_ascii_hexdigit());
            if !ok {
                return Err(GateError::Config(format!(
                    "operator digest for role {} is not a SHA-256 hex string",
                    op.role
                )));
            }
        }
        if self.default_timezone.parse::<chrono_tz::Tz>().is_err() {
            return Err(GateError::Config(format!(
                "unknown default_timezone '{}'",
                self.default_timezone
            )));
        }
        Ok(())
    }

    /// Get SQLite database path
    pub fn database_path(&self) -> PathBuf {
        self.storage_dir.join("progression.db")
    }
}
