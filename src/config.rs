//! Connector configuration.
//!
//! Timeouts, the detection poll interval and the accepted protocol range.
//! Values can come from defaults, environment variables or a YAML document.

use std::env;
use std::path::Path;
use std::time::Duration;

use semver::VersionReq;
use serde::{Deserialize, Serialize};
use thiserror::Error;

// ---------------------------------------------------------------------------
// Environment variable names
// ---------------------------------------------------------------------------

pub const ENV_DETECTION_TIMEOUT_MS: &str = "DEPLOY_DETECTION_TIMEOUT_MS";
pub const ENV_POLL_INTERVAL_MS: &str = "DEPLOY_POLL_INTERVAL_MS";
pub const ENV_STATUS_TIMEOUT_MS: &str = "DEPLOY_STATUS_TIMEOUT_MS";
pub const ENV_ACTIVATION_TIMEOUT_MS: &str = "DEPLOY_ACTIVATION_TIMEOUT_MS";
pub const ENV_ACCEPTED_VERSION: &str = "DEPLOY_ACCEPTED_VERSION";

// ---------------------------------------------------------------------------
// ConfigError
// ---------------------------------------------------------------------------

/// Invalid or unreadable configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

// ---------------------------------------------------------------------------
// ConnectorConfig
// ---------------------------------------------------------------------------

/// Settings for detecting, negotiating with and activating a provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectorConfig {
    /// How long to poll the host slot before giving up.
    #[serde(default = "default_detection_timeout_ms")]
    pub detection_timeout_ms: u64,
    /// Delay between two reads of the host slot.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// Bound on the enabled-status query.
    #[serde(default = "default_status_timeout_ms")]
    pub status_timeout_ms: u64,
    /// Bound on the activation request, which may wait on a human.
    #[serde(default = "default_activation_timeout_ms")]
    pub activation_timeout_ms: u64,
    /// Accepted provider protocol range, e.g. `"1.x"`.
    #[serde(default = "default_accepted_version")]
    pub accepted_version: String,
}

fn default_detection_timeout_ms() -> u64 { 10_000 }
fn default_poll_interval_ms() -> u64 { 100 }
fn default_status_timeout_ms() -> u64 { 5_000 }
fn default_activation_timeout_ms() -> u64 { 120_000 }
fn default_accepted_version() -> String { "1.x".to_string() }

impl Default for ConnectorConfig {
    fn default() -> Self {
        Self {
            detection_timeout_ms: default_detection_timeout_ms(),
            poll_interval_ms: default_poll_interval_ms(),
            status_timeout_ms: default_status_timeout_ms(),
            activation_timeout_ms: default_activation_timeout_ms(),
            accepted_version: default_accepted_version(),
        }
    }
}

impl ConnectorConfig {
    /// Defaults overlaid with any `DEPLOY_*` environment variables.
    ///
    /// Malformed numeric values are logged and ignored.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        overlay_ms(ENV_DETECTION_TIMEOUT_MS, &mut config.detection_timeout_ms);
        overlay_ms(ENV_POLL_INTERVAL_MS, &mut config.poll_interval_ms);
        overlay_ms(ENV_STATUS_TIMEOUT_MS, &mut config.status_timeout_ms);
        overlay_ms(ENV_ACTIVATION_TIMEOUT_MS, &mut config.activation_timeout_ms);
        if let Ok(range) = env::var(ENV_ACCEPTED_VERSION) {
            if !range.trim().is_empty() {
                config.accepted_version = range.trim().to_string();
            }
        }
        config
    }

    /// Parse a YAML document. Missing keys take their defaults.
    pub fn from_yaml_str(content: &str) -> Result<Self, ConfigError> {
        let config: ConnectorConfig = serde_yaml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Read and parse a YAML file.
    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml_str(&content)
    }

    /// Reject settings the connector cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.poll_interval_ms == 0 {
            return Err(ConfigError::Invalid(
                "poll_interval_ms must be greater than zero".to_string(),
            ));
        }
        self.accepted_range()?;
        Ok(())
    }

    /// The accepted protocol range as a parsed requirement.
    pub fn accepted_range(&self) -> Result<VersionReq, ConfigError> {
        VersionReq::parse(&self.accepted_version).map_err(|e| {
            ConfigError::Invalid(format!(
                "accepted_version '{}' is not a version range: {}",
                self.accepted_version, e
            ))
        })
    }

    pub fn detection_timeout(&self) -> Duration {
        Duration::from_millis(self.detection_timeout_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn status_timeout(&self) -> Duration {
        Duration::from_millis(self.status_timeout_ms)
    }

    pub fn activation_timeout(&self) -> Duration {
        Duration::from_millis(self.activation_timeout_ms)
    }

    // -----------------------------------------------------------------------
    // Builder methods
    // -----------------------------------------------------------------------

    pub fn with_detection_timeout_ms(mut self, ms: u64) -> Self {
        self.detection_timeout_ms = ms;
        self
    }

    pub fn with_poll_interval_ms(mut self, ms: u64) -> Self {
        self.poll_interval_ms = ms;
        self
    }

    pub fn with_status_timeout_ms(mut self, ms: u64) -> Self {
        self.status_timeout_ms = ms;
        self
    }

    pub fn with_activation_timeout_ms(mut self, ms: u64) -> Self {
        self.activation_timeout_ms = ms;
        self
    }

    pub fn with_accepted_version(mut self, range: impl Into<String>) -> Self {
        self.accepted_version = range.into();
        self
    }
}

fn overlay_ms(var: &str, target: &mut u64) {
    let Ok(raw) = env::var(var) else {
        return;
    };
    match raw.trim().parse::<u64>() {
        Ok(value) => *target = value,
        Err(e) => log::warn!("Ignoring {}='{}': {}", var, raw, e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = ConnectorConfig::default();
        assert_eq!(config.detection_timeout_ms, 10_000);
        assert_eq!(config.poll_interval_ms, 100);
        assert_eq!(config.status_timeout_ms, 5_000);
        assert_eq!(config.accepted_version, "1.x");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_yaml_partial_document_uses_defaults() {
        let config = ConnectorConfig::from_yaml_str(
            "detection_timeout_ms: 2500\naccepted_version: \"^1.2\"\n",
        )
        .unwrap();
        assert_eq!(config.detection_timeout_ms, 2500);
        assert_eq!(config.accepted_version, "^1.2");
        assert_eq!(config.poll_interval_ms, 100);
    }

    #[test]
    fn test_yaml_rejects_zero_poll_interval() {
        let err = ConnectorConfig::from_yaml_str("poll_interval_ms: 0\n").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn test_rejects_bad_range() {
        let config = ConnectorConfig::default().with_accepted_version("not a range");
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_from_yaml_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "status_timeout_ms: 750").unwrap();
        let config = ConnectorConfig::from_yaml_file(file.path()).unwrap();
        assert_eq!(config.status_timeout_ms, 750);
    }

    #[test]
    fn test_missing_file_is_io_error() {
        let err = ConnectorConfig::from_yaml_file("/nonexistent/connector.yaml").unwrap_err();
        assert!(matches!(err, ConfigError::Io(_)));
    }

    #[test]
    fn test_from_env_overlays() {
        env::set_var(ENV_STATUS_TIMEOUT_MS, "1234");
        env::set_var(ENV_ACTIVATION_TIMEOUT_MS, "not-a-number");
        let config = ConnectorConfig::from_env();
        env::remove_var(ENV_STATUS_TIMEOUT_MS);
        env::remove_var(ENV_ACTIVATION_TIMEOUT_MS);

        assert_eq!(config.status_timeout_ms, 1234);
        assert_eq!(config.activation_timeout_ms, 120_000);
    }
}
