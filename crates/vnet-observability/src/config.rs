//! Logging configuration
//!
//! Read from the `logging` section of the controller's YAML file. A base
//! level applies everywhere; `targets` raises or lowers it per module path,
//! e.g. `vnet_controller::allocator: trace` while chasing an allocation bug.

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::{ObservabilityError, Result};

/// Console output format; file output is always JSON
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
    Compact,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    #[default]
    Info,
    Warn,
    Error,
    Off,
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            LogLevel::Trace => "trace",
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
            LogLevel::Off => "off",
        })
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default)]
    pub level: LogLevel,

    #[serde(default)]
    pub format: LogFormat,

    /// Level overrides keyed by module path
    #[serde(default)]
    pub targets: BTreeMap<String, LogLevel>,

    /// Source file and line on every event
    #[serde(default)]
    pub source_locations: bool,

    #[serde(default)]
    pub file: Option<FileLoggingConfig>,
}

impl LoggingConfig {
    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        serde_yaml::from_str(yaml).map_err(|e| ObservabilityError::Config(e.to_string()))
    }

    /// `EnvFilter` directives: the base level, then each target override
    pub fn directives(&self) -> String {
        let mut out = self.level.to_string();
        for (target, level) in &self.targets {
            out.push_str(&format!(",{target}={level}"));
        }
        out
    }
}

/// Rotated JSON log files written next to the console output
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileLoggingConfig {
    pub directory: PathBuf,

    #[serde(default = "FileLoggingConfig::default_prefix")]
    pub prefix: String,

    #[serde(default)]
    pub rotation: RotationStrategy,
}

impl FileLoggingConfig {
    fn default_prefix() -> String {
        "vnet-controller".to_string()
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum RotationStrategy {
    #[default]
    Daily,
    Hourly,
    Never,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = LoggingConfig::default();
        assert_eq!(config.level, LogLevel::Info);
        assert_eq!(config.format, LogFormat::Pretty);
        assert!(config.file.is_none());
        assert_eq!(config.directives(), "info");
    }

    #[test]
    fn test_yaml_with_target_overrides() {
        let config = LoggingConfig::from_yaml_str(
            r#"
level: warn
format: json
targets:
  vnet_controller::allocator: trace
  redb: error
file:
  directory: /var/log/vnet
"#,
        )
        .unwrap();
        assert_eq!(config.format, LogFormat::Json);
        assert_eq!(
            config.directives(),
            "warn,redb=error,vnet_controller::allocator=trace"
        );
        let file = config.file.unwrap();
        assert_eq!(file.prefix, "vnet-controller");
        assert_eq!(file.rotation, RotationStrategy::Daily);
    }

    #[test]
    fn test_unknown_level_rejected() {
        let err = LoggingConfig::from_yaml_str("level: loud").unwrap_err();
        assert!(matches!(err, ObservabilityError::Config(_)));
    }
}
