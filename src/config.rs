//! Probe configuration
//!
//! Everything has a default, so a config file is optional and may set only
//! the keys it cares about.
//!
//! # Example TOML
//! ```toml
//! [capture]
//! max_topic_len = 128
//! sentinel = "<bad topic>"
//!
//! [report]
//! pretty = false
//! include_overhead = true
//! ```

use std::fs;
use std::path::Path;

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};

/// How topic-name arguments are read out of the target
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    /// Longest topic name read, in bytes, not counting the terminator;
    /// longer names are truncated
    pub max_topic_len: usize,
    /// Recorded in place of a topic name that could not be read
    pub sentinel: String,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            max_topic_len: 256,
            sentinel: "<unreadable>".to_string(),
        }
    }
}

/// How the final report is rendered
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReportConfig {
    pub pretty: bool,
    /// Add the probe's own timing summary to the report
    pub include_overhead: bool,
}

impl Default for ReportConfig {
    fn default() -> Self {
        Self {
            pretty: true,
            include_overhead: false,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProbeConfig {
    pub capture: CaptureConfig,
    pub report: ReportConfig,
}

impl ProbeConfig {
    /// Load a config file
    ///
    /// # Errors
    /// Returns error if the file cannot be read, is not valid TOML, or holds
    /// out-of-range values.
    pub fn from_toml<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path.as_ref())
            .with_context(|| format!("Failed to read config file: {}", path.as_ref().display()))?;
        Self::from_toml_str(&content)
            .with_context(|| format!("Invalid config file: {}", path.as_ref().display()))
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content).context("Failed to parse TOML config")?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.capture.max_topic_len == 0 {
            bail!("capture.max_topic_len must be greater than 0");
        }
        Ok(())
    }
}
