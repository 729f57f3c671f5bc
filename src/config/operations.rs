//! Config loading, validation, and derived values.

use super::model::Config;
use crate::error::{LockError, Result};
use crate::remote::KeyNames;
use crate::wait::WaitSettings;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Environment variable naming a config file when `--config` is not given.
pub const CONFIG_ENV: &str = "MIRRORLOCK_CONFIG";

impl Config {
    /// Load config from a YAML file.
    ///
    /// Unknown fields in the YAML are silently ignored for forward compatibility.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        let content = std::fs::read_to_string(path).map_err(|e| {
            LockError::UserError(format!(
                "failed to read config file '{}': {}",
                path.display(),
                e
            ))
        })?;

        Self::from_yaml(&content)
    }

    /// Resolve the effective config: explicit path, then `MIRRORLOCK_CONFIG`,
    /// then built-in defaults.
    pub fn resolve(explicit: Option<&Path>) -> Result<Self> {
        if let Some(path) = explicit {
            return Self::load(path);
        }
        match std::env::var_os(CONFIG_ENV) {
            Some(path) if !path.is_empty() => Self::load(PathBuf::from(path)),
            _ => Ok(Self::default()),
        }
    }

    /// Parse config from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: Config = serde_yaml::from_str(yaml)
            .map_err(|e| LockError::UserError(format!("failed to parse config YAML: {}", e)))?;

        config.validate()?;
        Ok(config)
    }

    /// Serialize config to YAML string.
    pub fn to_yaml(&self) -> Result<String> {
        serde_yaml::to_string(self).map_err(|e| {
            LockError::UserError(format!("failed to serialize config to YAML: {}", e))
        })
    }

    /// Validate config values and return error on invalid values.
    pub fn validate(&self) -> Result<()> {
        if self.retry_period_ms == 0 {
            return Err(LockError::UserError(
                "config validation failed: retry_period_ms must be greater than 0".to_string(),
            ));
        }

        if self.long_wait_report_secs == 0 {
            return Err(LockError::UserError(
                "config validation failed: long_wait_report_secs must be greater than 0"
                    .to_string(),
            ));
        }

        if self.key_prefix.is_empty() || self.key_prefix.contains(char::is_whitespace) {
            return Err(LockError::UserError(format!(
                "config validation failed: key_prefix must be a non-empty word (found '{}')",
                self.key_prefix
            )));
        }

        if self.lock_root.as_os_str().is_empty() {
            return Err(LockError::UserError(
                "config validation failed: lock_root must not be empty".to_string(),
            ));
        }

        Ok(())
    }

    /// Directory holding the file key/value store.
    pub fn store_dir(&self) -> PathBuf {
        self.store_dir
            .clone()
            .unwrap_or_else(|| self.lock_root.join("store"))
    }

    /// Server identity written into remote owner documents.
    pub fn server_id(&self) -> String {
        self.server_id.clone().unwrap_or_else(|| {
            hostname::get()
                .map(|h| h.to_string_lossy().to_string())
                .unwrap_or_else(|_| "unknown".to_string())
        })
    }

    /// Key naming scheme for remote locks.
    pub fn key_names(&self) -> KeyNames {
        KeyNames::new(&self.key_prefix)
    }

    /// Polling settings for acquisition loops.
    pub fn wait_settings(&self) -> WaitSettings {
        WaitSettings {
            retry_period: Duration::from_millis(self.retry_period_ms),
            report_every: Duration::from_secs(self.long_wait_report_secs),
        }
    }
}
