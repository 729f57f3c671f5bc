//! Config struct definition and default implementation.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Configuration for mirrorlock.
///
/// Unknown fields in the YAML are ignored for forward compatibility.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    // =========================================================================
    // Local lock settings
    // =========================================================================
    /// Root under which `locks/{repo}/` marker directories are created.
    #[serde(default = "default_lock_root")]
    pub lock_root: PathBuf,

    // =========================================================================
    // Remote lock settings
    // =========================================================================
    /// Directory backing the file key/value store (default: `{lock_root}/store`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub store_dir: Option<PathBuf>,

    /// Identity of this server in owner documents (default: host name).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server_id: Option<String>,

    /// Prefix for every remote key name.
    #[serde(default = "default_key_prefix")]
    pub key_prefix: String,

    // =========================================================================
    // Polling settings
    // =========================================================================
    /// Delay between acquisition attempts, in milliseconds.
    #[serde(default = "default_retry_period_ms")]
    pub retry_period_ms: u64,

    /// How often a long wait is reported in the log, in seconds.
    #[serde(default = "default_long_wait_report_secs")]
    pub long_wait_report_secs: u64,

    // =========================================================================
    // Logging
    // =========================================================================
    /// Fallback log filter when `MIRRORLOCK_LOG` is not set.
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            lock_root: default_lock_root(),
            store_dir: None,
            server_id: None,
            key_prefix: default_key_prefix(),
            retry_period_ms: default_retry_period_ms(),
            long_wait_report_secs: default_long_wait_report_secs(),
            log_level: default_log_level(),
        }
    }
}

pub(crate) fn default_lock_root() -> PathBuf {
    match std::env::var_os("HOME") {
        Some(home) => PathBuf::from(home).join(".mirrorlock"),
        None => PathBuf::from(".mirrorlock"),
    }
}

fn default_key_prefix() -> String {
    "mirror".to_string()
}

fn default_retry_period_ms() -> u64 {
    500
}

fn default_long_wait_report_secs() -> u64 {
    60
}

fn default_log_level() -> String {
    "info".to_string()
}
