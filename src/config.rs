//! Export run configuration.
//!
//! Handles loading and validating the optional `export.toml` next to the
//! project. Config files are sparse — override just the values you want:
//!
//! ```toml
//! # All options are optional - defaults shown below
//!
//! [export]
//! trailing_slash = false   # write route/index.html instead of route.html
//! variant_tag = "amp"      # filename tag for the alternate markup variant
//!
//! [workers]
//! pool_size = 0            # render workers (0 = number of CPU cores)
//! timeout_ms = 60000       # per-task deadline (0 disables timeout/restart)
//! max_restarts = 3         # restarts per task before the run fails
//! ```
//!
//! Unknown keys are rejected to catch typos early. CLI flags override file
//! values; the resolved values are snapshotted into the render settings
//! before dispatch, so no task ever observes a config change mid-run.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Config parse error: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("Config validation error: {0}")]
    Validation(String),
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(deny_unknown_fields, default)]
pub struct ExportConfig {
    pub export: ExportSection,
    pub workers: WorkersSection,
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            export: ExportSection::default(),
            workers: WorkersSection::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(deny_unknown_fields, default)]
pub struct ExportSection {
    /// Write `route/index.html` instead of `route.html`.
    pub trailing_slash: bool,
    /// Filename tag for the alternate markup variant (`route.<tag>.html`).
    pub variant_tag: String,
}

impl Default for ExportSection {
    fn default() -> Self {
        Self {
            trailing_slash: false,
            variant_tag: "amp".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(deny_unknown_fields, default)]
pub struct WorkersSection {
    /// Render worker count. 0 means one per available CPU core.
    pub pool_size: usize,
    /// Per-task deadline in milliseconds. 0 disables the timeout and the
    /// restart mechanism with it.
    pub timeout_ms: u64,
    /// Restarts per task before the whole run fails.
    pub max_restarts: u32,
}

impl Default for WorkersSection {
    fn default() -> Self {
        Self {
            pool_size: 0,
            timeout_ms: 60_000,
            max_restarts: 3,
        }
    }
}

impl ExportConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        let tag = &self.export.variant_tag;
        if tag.is_empty() {
            return Err(ConfigError::Validation(
                "export.variant_tag must not be empty".to_string(),
            ));
        }
        if tag.contains('/') || tag.contains('.') {
            return Err(ConfigError::Validation(format!(
                "export.variant_tag must not contain '/' or '.': {tag:?}"
            )));
        }
        Ok(())
    }
}

/// Load config from `path`. A missing file yields the defaults; a present
/// file must parse and validate.
pub fn load_config(path: &Path) -> Result<ExportConfig, ConfigError> {
    if !path.exists() {
        return Ok(ExportConfig::default());
    }
    let content = fs::read_to_string(path)?;
    let config: ExportConfig = toml::from_str(&content)?;
    config.validate()?;
    Ok(config)
}

/// Resolve the worker pool size, capping at the number of available CPU
/// cores — users can constrain down, not up.
pub fn effective_pool_size(workers: &WorkersSection) -> usize {
    let cores = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1);
    match workers.pool_size {
        0 => cores,
        n => n.min(cores),
    }
}

/// A documented stock `export.toml`, printed by `static-export gen-config`.
pub fn stock_config_toml() -> String {
    let defaults = WorkersSection::default();
    format!(
        r#"# static-export configuration
# All options are optional - defaults shown below.

[export]
# Placement rule for primary markup: false writes route.html,
# true writes route/index.html. Data payloads are unaffected.
trailing_slash = false

# Filename tag for the alternate markup variant, e.g. about.amp.html.
variant_tag = "amp"

[workers]
# Number of parallel render workers. 0 = number of CPU cores.
pool_size = 0

# Per-task deadline in milliseconds. A hung render is abandoned and
# retried on a fresh worker. 0 disables the timeout entirely.
timeout_ms = {timeout}

# How many times one task may be restarted before the run fails.
max_restarts = {restarts}
"#,
        timeout = defaults.timeout_ms,
        restarts = defaults.max_restarts,
    )
}
