//! Configuration model for mirrorlock.
//!
//! This module defines the Config struct read from a YAML file named by
//! `--config` or `MIRRORLOCK_CONFIG`. It supports forward-compatible YAML
//! parsing (unknown fields are ignored), sensible defaults for optional
//! fields, and validation of config values.

mod model;
mod operations;


// Re-export public API
pub use model::Config;
pub use operations::CONFIG_ENV;
