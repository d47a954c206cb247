//! # Deployments
//!
//! A deployment tracks one resource operation (create a new resource, or
//! attach to an existing one) from `InProgress` to a terminal state.
//!
//! - [`DeploymentStateMachine`]: one replaying three-state lifecycle
//! - [`DeploymentRegistry`]: ordered, deduplicating collection of machines
//! - [`ResourceOperations`]: the create/attach calls run once the capability
//!   chain is connected

pub mod machine;
pub mod operations;
pub mod registry;

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::DeploymentError;

pub use machine::DeploymentStateMachine;
pub use operations::{ResourceOperation, ResourceOperations, SubmittingOperations};
pub use registry::DeploymentRegistry;

// ---------------------------------------------------------------------------
// ResourceAddress
// ---------------------------------------------------------------------------

/// Address of a deployed resource. Also the identity used for dedupe.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ResourceAddress(String);

impl ResourceAddress {
    pub fn new(address: impl Into<String>) -> Self {
        Self(address.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ResourceAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ResourceAddress {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for ResourceAddress {
    fn from(s: String) -> Self {
        Self(s)
    }
}

// ---------------------------------------------------------------------------
// ResourceConfig
// ---------------------------------------------------------------------------

/// Caller-defined configuration for creating a resource. Opaque here.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ResourceConfig(Value);

impl ResourceConfig {
    pub fn new(value: Value) -> Self {
        Self(value)
    }

    /// Build from any serializable configuration struct.
    pub fn from_serializable<T: Serialize>(config: &T) -> Result<Self, serde_json::Error> {
        serde_json::to_value(config).map(Self)
    }

    pub fn as_value(&self) -> &Value {
        &self.0
    }
}

// ---------------------------------------------------------------------------
// ResourceHandle
// ---------------------------------------------------------------------------

/// Reference to a deployed or attached resource.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceHandle {
    pub address: ResourceAddress,
    /// Transaction that created or confirmed the resource, if any.
    pub transaction_id: Option<String>,
}

impl ResourceHandle {
    pub fn new(address: impl Into<ResourceAddress>) -> Self {
        Self {
            address: address.into(),
            transaction_id: None,
        }
    }
}

// ---------------------------------------------------------------------------
// DeploymentRequest
// ---------------------------------------------------------------------------

/// What a `resolve` call asked for.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DeploymentRequest {
    /// Attach to an existing resource.
    Attach {
        address: ResourceAddress,
        config: Option<ResourceConfig>,
    },
    /// Create a new resource.
    Create { config: ResourceConfig },
}

impl DeploymentRequest {
    /// An identity selects attach; otherwise a configuration is required.
    pub fn from_parts(
        identity: Option<ResourceAddress>,
        config: Option<ResourceConfig>,
    ) -> Result<Self, DeploymentError> {
        match (identity, config) {
            (Some(address), config) => Ok(DeploymentRequest::Attach { address, config }),
            (None, Some(config)) => Ok(DeploymentRequest::Create { config }),
            (None, None) => Err(DeploymentError::InvalidRequest {
                reason: "either a resource address or a configuration must be provided"
                    .to_string(),
            }),
        }
    }

    /// The explicit identity, for attach requests.
    pub fn identity(&self) -> Option<&ResourceAddress> {
        match self {
            DeploymentRequest::Attach { address, .. } => Some(address),
            DeploymentRequest::Create { .. } => None,
        }
    }

    pub fn config(&self) -> Option<&ResourceConfig> {
        match self {
            DeploymentRequest::Attach { config, .. } => config.as_ref(),
            DeploymentRequest::Create { config } => Some(config),
        }
    }
}

// ---------------------------------------------------------------------------
// Deployment
// ---------------------------------------------------------------------------

/// State of one deployment. `Deployed` and `Failed` are terminal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Deployment {
    InProgress,
    Deployed {
        handle: ResourceHandle,
        config: Option<ResourceConfig>,
    },
    Failed {
        error: DeploymentError,
    },
}

/// Payload-free discriminant of [`Deployment`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DeploymentStatus {
    InProgress,
    Deployed,
    Failed,
}

impl fmt::Display for DeploymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeploymentStatus::InProgress => write!(f, "in-progress"),
            DeploymentStatus::Deployed => write!(f, "deployed"),
            DeploymentStatus::Failed => write!(f, "failed"),
        }
    }
}

impl Deployment {
    pub fn status(&self) -> DeploymentStatus {
        match self {
            Deployment::InProgress => DeploymentStatus::InProgress,
            Deployment::Deployed { .. } => DeploymentStatus::Deployed,
            Deployment::Failed { .. } => DeploymentStatus::Failed,
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, Deployment::InProgress)
    }

    pub fn handle(&self) -> Option<&ResourceHandle> {
        match self {
            Deployment::Deployed { handle, .. } => Some(handle),
            _ => None,
        }
    }

    pub fn error(&self) -> Option<&DeploymentError> {
        match self {
            Deployment::Failed { error } => Some(error),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_request_from_parts() {
        let attach = DeploymentRequest::from_parts(Some("addr-1".into()), None).unwrap();
        assert_eq!(attach.identity(), Some(&ResourceAddress::from("addr-1")));

        let config = ResourceConfig::new(json!({"maxMembers": 10}));
        let create = DeploymentRequest::from_parts(None, Some(config.clone())).unwrap();
        assert_eq!(create.identity(), None);
        assert_eq!(create.config(), Some(&config));

        let err = DeploymentRequest::from_parts(None, None).unwrap_err();
        assert!(matches!(err, DeploymentError::InvalidRequest { .. }));
    }

    #[test]
    fn test_config_from_serializable() {
        #[derive(Serialize)]
        #[serde(rename_all = "camelCase")]
        struct CircleConfiguration {
            max_members: u32,
            contribution_amount: u64,
        }
        let config = ResourceConfig::from_serializable(&CircleConfiguration {
            max_members: 10,
            contribution_amount: 1000,
        })
        .unwrap();
        assert_eq!(config.as_value()["maxMembers"], 10);
        assert_eq!(config.as_value()["contributionAmount"], 1000);
    }

    #[test]
    fn test_deployment_accessors() {
        assert!(!Deployment::InProgress.is_terminal());
        let deployed = Deployment::Deployed {
            handle: ResourceHandle::new("addr-123"),
            config: None,
        };
        assert!(deployed.is_terminal());
        assert_eq!(deployed.status(), DeploymentStatus::Deployed);
        assert_eq!(deployed.handle().unwrap().address.as_str(), "addr-123");
        assert!(deployed.error().is_none());
    }

    #[test]
    fn test_deployment_wire_shape() {
        let failed = Deployment::Failed {
            error: DeploymentError::CapabilityNotFound { timeout_ms: 10_000 },
        };
        let json = serde_json::to_value(&failed).unwrap();
        assert_eq!(json["status"], "failed");
        assert_eq!(json["error"]["kind"], "capability_not_found");
        assert_eq!(DeploymentStatus::InProgress.to_string(), "in-progress");
    }
}
