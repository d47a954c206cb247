//! Protocol version negotiation.
//!
//! A pure range-membership check, run before activation so an incompatible
//! provider never prompts the user.

use std::sync::Arc;

use semver::{Version, VersionReq};

use super::CapabilityDescriptor;
use crate::config::ConfigError;
use crate::error::DeploymentError;

/// Checks advertised versions against an accepted range such as `"1.x"`.
#[derive(Debug, Clone)]
pub struct VersionNegotiator {
    range: String,
    requirement: VersionReq,
}

impl VersionNegotiator {
    pub fn new(range: &str) -> Result<Self, ConfigError> {
        let requirement = VersionReq::parse(range).map_err(|e| {
            ConfigError::Invalid(format!("'{}' is not a version range: {}", range, e))
        })?;
        Ok(Self {
            range: range.to_string(),
            requirement,
        })
    }

    pub fn range(&self) -> &str {
        &self.range
    }

    /// Whether `version` lies in the accepted range. Unparseable versions
    /// are never compatible. A leading `v` is tolerated.
    pub fn is_compatible(&self, version: &str) -> bool {
        let trimmed = version.trim();
        let trimmed = trimmed.strip_prefix('v').unwrap_or(trimmed);
        Version::parse(trimmed)
            .map(|v| self.requirement.matches(&v))
            .unwrap_or(false)
    }

    /// Pass the descriptor through if compatible.
    pub fn negotiate(
        &self,
        descriptor: Arc<dyn CapabilityDescriptor>,
    ) -> Result<Arc<dyn CapabilityDescriptor>, DeploymentError> {
        let actual = descriptor.protocol_version();
        if self.is_compatible(&actual) {
            log::info!("Compatible capability protocol {} found. Connecting.", actual);
            return Ok(descriptor);
        }
        log::error!(
            "Incompatible capability protocol: expected '{}', actual '{}'",
            self.range,
            actual
        );
        Err(DeploymentError::IncompatibleProtocol {
            required: self.range.clone(),
            actual,
        })
    }
}
