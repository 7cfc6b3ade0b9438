//! Controller configuration
//!
//! Every policy constant the controller applies lives here so deployments
//! can tune them from a YAML file. Defaults match the long-standing values
//! member nodes expect.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{ControllerError, Result};

/// Top-level controller configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ControllerConfig {
    /// Minimum spacing between two config requests from the same member
    #[serde(default = "ControllerConfig::default_min_request_interval_ms")]
    pub min_request_interval_ms: u64,

    /// Number of recent requests remembered per member
    #[serde(default = "ControllerConfig::default_history_cap")]
    pub history_cap: usize,

    /// Candidates tried per pool before giving up on an automatic address
    #[serde(default = "ControllerConfig::default_ip_trial_budget")]
    pub ip_trial_budget: u32,

    /// Random suffixes tried when creating a network without an explicit ID
    #[serde(default = "ControllerConfig::default_network_id_trials")]
    pub network_id_trials: u32,

    #[serde(default)]
    pub rate_limiter: RateLimiterConfig,

    #[serde(default)]
    pub limits: ConfigLimits,

    #[serde(default)]
    pub credentials: CredentialConfig,

    #[serde(default)]
    pub mtu: MtuConfig,
}

impl ControllerConfig {
    fn default_min_request_interval_ms() -> u64 {
        1000
    }

    fn default_history_cap() -> usize {
        8
    }

    fn default_ip_trial_budget() -> u32 {
        1000
    }

    fn default_network_id_trials() -> u32 {
        100_000
    }

    pub fn min_request_interval(&self) -> Duration {
        Duration::from_millis(self.min_request_interval_ms)
    }

    /// Parse a YAML document; missing keys take their defaults
    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        let config: Self = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Load a YAML configuration file
    pub async fn load(path: &Path) -> Result<Self> {
        let contents = tokio::fs::read_to_string(path).await?;
        Self::from_yaml_str(&contents)
    }

    /// Reject settings that would make the controller misbehave
    pub fn validate(&self) -> Result<()> {
        if self.history_cap == 0 {
            return Err(ControllerError::Config(
                "history_cap must be at least 1".to_string(),
            ));
        }
        if self.network_id_trials == 0 {
            return Err(ControllerError::Config(
                "network_id_trials must be at least 1".to_string(),
            ));
        }
        if self.credentials.min_window_ms > self.credentials.max_window_ms {
            return Err(ControllerError::Config(format!(
                "credential window bounds inverted: {} > {}",
                self.credentials.min_window_ms, self.credentials.max_window_ms
            )));
        }
        if self.mtu.min > self.mtu.max {
            return Err(ControllerError::Config(format!(
                "mtu bounds inverted: {} > {}",
                self.mtu.min, self.mtu.max
            )));
        }
        Ok(())
    }
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            min_request_interval_ms: Self::default_min_request_interval_ms(),
            history_cap: Self::default_history_cap(),
            ip_trial_budget: Self::default_ip_trial_budget(),
            network_id_trials: Self::default_network_id_trials(),
            rate_limiter: RateLimiterConfig::default(),
            limits: ConfigLimits::default(),
            credentials: CredentialConfig::default(),
            mtu: MtuConfig::default(),
        }
    }
}

/// Bounds on the request rate limiter's memory
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RateLimiterConfig {
    /// Tracked keys above which stale entries are swept
    #[serde(default = "RateLimiterConfig::default_max_entries")]
    pub max_entries: usize,

    /// Entries idle for longer than this are dropped by a sweep
    #[serde(default = "RateLimiterConfig::default_idle_eviction_ms")]
    pub idle_eviction_ms: u64,
}

impl RateLimiterConfig {
    fn default_max_entries() -> usize {
        65_536
    }

    fn default_idle_eviction_ms() -> u64 {
        60_000
    }
}

impl Default for RateLimiterConfig {
    fn default() -> Self {
        Self {
            max_entries: Self::default_max_entries(),
            idle_eviction_ms: Self::default_idle_eviction_ms(),
        }
    }
}

/// Capacity limits of the compiled network configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfigLimits {
    #[serde(default = "ConfigLimits::default_max_rules")]
    pub max_rules: usize,

    #[serde(default = "ConfigLimits::default_max_routes")]
    pub max_routes: usize,

    /// Static addresses pushed to one member
    #[serde(default = "ConfigLimits::default_max_static_ips")]
    pub max_static_ips: usize,

    #[serde(default = "ConfigLimits::default_max_specialists")]
    pub max_specialists: usize,

    /// Capability credentials issued to one member
    #[serde(default = "ConfigLimits::default_max_capabilities")]
    pub max_capabilities: usize,

    #[serde(default = "ConfigLimits::default_max_capability_rules")]
    pub max_capability_rules: usize,

    /// Tag credentials issued to one member
    #[serde(default = "ConfigLimits::default_max_tags")]
    pub max_tags: usize,

    #[serde(default = "ConfigLimits::default_max_dns_servers")]
    pub max_dns_servers: usize,

    /// Routes, pools and rules accepted by one administrative write
    #[serde(default = "ConfigLimits::default_max_admin_entries")]
    pub max_admin_entries: usize,
}

impl ConfigLimits {
    fn default_max_rules() -> usize {
        1024
    }

    fn default_max_routes() -> usize {
        128
    }

    fn default_max_static_ips() -> usize {
        32
    }

    fn default_max_specialists() -> usize {
        256
    }

    fn default_max_capabilities() -> usize {
        128
    }

    fn default_max_capability_rules() -> usize {
        64
    }

    fn default_max_tags() -> usize {
        128
    }

    fn default_max_dns_servers() -> usize {
        4
    }

    fn default_max_admin_entries() -> usize {
        16_384
    }
}

impl Default for ConfigLimits {
    fn default() -> Self {
        Self {
            max_rules: Self::default_max_rules(),
            max_routes: Self::default_max_routes(),
            max_static_ips: Self::default_max_static_ips(),
            max_specialists: Self::default_max_specialists(),
            max_capabilities: Self::default_max_capabilities(),
            max_capability_rules: Self::default_max_capability_rules(),
            max_tags: Self::default_max_tags(),
            max_dns_servers: Self::default_max_dns_servers(),
            max_admin_entries: Self::default_max_admin_entries(),
        }
    }
}

/// Validity window of membership certificates
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CredentialConfig {
    #[serde(default = "CredentialConfig::default_window_ms")]
    pub default_window_ms: i64,

    #[serde(default = "CredentialConfig::default_min_window_ms")]
    pub min_window_ms: i64,

    #[serde(default = "CredentialConfig::default_max_window_ms")]
    pub max_window_ms: i64,
}

impl CredentialConfig {
    fn default_window_ms() -> i64 {
        15 * 60 * 1000
    }

    fn default_min_window_ms() -> i64 {
        5 * 60 * 1000
    }

    fn default_max_window_ms() -> i64 {
        2 * 60 * 60 * 1000
    }

    /// Clamp a network's requested window into the allowed range
    pub fn clamp(&self, requested: Option<i64>) -> i64 {
        requested
            .unwrap_or(self.default_window_ms)
            .clamp(self.min_window_ms, self.max_window_ms)
    }
}

impl Default for CredentialConfig {
    fn default() -> Self {
        Self {
            default_window_ms: Self::default_window_ms(),
            min_window_ms: Self::default_min_window_ms(),
            max_window_ms: Self::default_max_window_ms(),
        }
    }
}

/// Bounds applied to a network's MTU
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MtuConfig {
    #[serde(default = "MtuConfig::default_mtu")]
    pub default: u32,

    #[serde(default = "MtuConfig::default_min")]
    pub min: u32,

    #[serde(default = "MtuConfig::default_max")]
    pub max: u32,
}

impl MtuConfig {
    fn default_mtu() -> u32 {
        2800
    }

    fn default_min() -> u32 {
        1280
    }

    fn default_max() -> u32 {
        10_000
    }

    pub fn clamp(&self, requested: Option<u32>) -> u32 {
        requested.unwrap_or(self.default).clamp(self.min, self.max)
    }
}

impl Default for MtuConfig {
    fn default() -> Self {
        Self {
            default: Self::default_mtu(),
            min: Self::default_min(),
            max: Self::default_max(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ControllerConfig::default();
        assert_eq!(config.min_request_interval_ms, 1000);
        assert_eq!(config.history_cap, 8);
        assert_eq!(config.ip_trial_budget, 1000);
        assert_eq!(config.network_id_trials, 100_000);
        assert_eq!(config.limits.max_rules, 1024);
        assert_eq!(config.limits.max_static_ips, 32);
        assert_eq!(config.limits.max_capabilities, 128);
        assert_eq!(config.limits.max_capability_rules, 64);
        assert_eq!(config.limits.max_dns_servers, 4);
        assert_eq!(config.min_request_interval(), Duration::from_secs(1));
    }

    #[test]
    fn test_yaml_partial_override() {
        let yaml = r#"
history_cap: 4
limits:
  max_routes: 16
credentials:
  default_window_ms: 600000
"#;
        let config = ControllerConfig::from_yaml_str(yaml).unwrap();
        assert_eq!(config.history_cap, 4);
        assert_eq!(config.limits.max_routes, 16);
        assert_eq!(config.limits.max_rules, 1024);
        assert_eq!(config.credentials.default_window_ms, 600_000);
        assert_eq!(config.min_request_interval_ms, 1000);
    }

    #[test]
    fn test_empty_yaml_is_default() {
        let config = ControllerConfig::from_yaml_str("{}").unwrap();
        assert_eq!(config, ControllerConfig::default());
    }

    #[test]
    fn test_validate_rejects_zero_history() {
        let result = ControllerConfig::from_yaml_str("history_cap: 0");
        assert!(matches!(result, Err(ControllerError::Config(_))));
    }

    #[test]
    fn test_credential_clamp() {
        let creds = CredentialConfig::default();
        assert_eq!(creds.clamp(None), 900_000);
        assert_eq!(creds.clamp(Some(1_000)), 300_000);
        assert_eq!(creds.clamp(Some(i64::MAX)), 7_200_000);
    }

    #[test]
    fn test_mtu_clamp() {
        let mtu = MtuConfig::default();
        assert_eq!(mtu.clamp(None), 2800);
        assert_eq!(mtu.clamp(Some(100)), 1280);
        assert_eq!(mtu.clamp(Some(9000)), 9000);
        assert_eq!(mtu.clamp(Some(65_000)), 10_000);
    }

    #[tokio::test]
    async fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("controller.yaml");
        tokio::fs::write(&path, "ip_trial_budget: 50\n").await.unwrap();

        let config = ControllerConfig::load(&path).await.unwrap();
        assert_eq!(config.ip_trial_budget, 50);
    }
}
