//! Resource operations run after the capability chain connects.
//!
//! The business effect of create/attach is opaque here; only success (a
//! [`ResourceHandle`]) or failure matters. [`SubmittingOperations`] is the
//! default driver: it serializes a [`ResourceOperation`], has the activated
//! capability balance it, then submits it.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::{ResourceAddress, ResourceConfig, ResourceHandle};
use crate::connector::{ConnectedCapability, OperationResult};
use crate::error::DeploymentError;

// ---------------------------------------------------------------------------
// ResourceOperations
// ---------------------------------------------------------------------------

/// Domain-specific create and attach calls.
#[async_trait]
pub trait ResourceOperations: Send + Sync {
    async fn create(
        &self,
        connected: &ConnectedCapability,
        config: &ResourceConfig,
    ) -> Result<ResourceHandle, DeploymentError>;

    async fn attach(
        &self,
        connected: &ConnectedCapability,
        address: &ResourceAddress,
    ) -> Result<ResourceHandle, DeploymentError>;
}

// ---------------------------------------------------------------------------
// ResourceOperation
// ---------------------------------------------------------------------------

/// Payload submitted through the activated capability.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ResourceOperation {
    Create {
        config: ResourceConfig,
        coin_public_key: String,
    },
    Attach {
        address: ResourceAddress,
        coin_public_key: String,
    },
}

// ---------------------------------------------------------------------------
// SubmittingOperations
// ---------------------------------------------------------------------------

/// Balances then submits each operation through the activated capability.
#[derive(Debug, Clone, Copy, Default)]
pub struct SubmittingOperations;

impl SubmittingOperations {
    async fn submit(
        &self,
        connected: &ConnectedCapability,
        operation: &ResourceOperation,
    ) -> Result<OperationResult, DeploymentError> {
        let payload = serde_json::to_value(operation).map_err(DeploymentError::operation_failed)?;
        log::debug!("Balancing resource operation");
        let balanced = connected
            .capability
            .balance_operation(payload)
            .await
            .map_err(DeploymentError::operation_failed)?;
        log::info!("Submitting resource operation for approval");
        let result = connected
            .capability
            .submit_operation(balanced)
            .await
            .map_err(DeploymentError::operation_failed)?;
        log::info!("Resource operation submitted: {}", result.transaction_id);
        Ok(result)
    }
}

#[async_trait]
impl ResourceOperations for SubmittingOperations {
    async fn create(
        &self,
        connected: &ConnectedCapability,
        config: &ResourceConfig,
    ) -> Result<ResourceHandle, DeploymentError> {
        let operation = ResourceOperation::Create {
            config: config.clone(),
            coin_public_key: connected.account.coin_public_key.clone(),
        };
        let result = self.submit(connected, &operation).await?;
        let address = result.resource_address.ok_or_else(|| {
            DeploymentError::operation_failed("submission returned no resource address")
        })?;
        Ok(ResourceHandle {
            address: address.into(),
            transaction_id: Some(result.transaction_id),
        })
    }

    async fn attach(
        &self,
        connected: &ConnectedCapability,
        address: &ResourceAddress,
    ) -> Result<ResourceHandle, DeploymentError> {
        let operation = ResourceOperation::Attach {
            address: address.clone(),
            coin_public_key: connected.account.coin_public_key.clone(),
        };
        let result = self.submit(connected, &operation).await?;
        if let Some(reported) = result.resource_address.as_deref() {
            if reported != address.as_str() {
                return Err(DeploymentError::operation_failed(format!(
                    "attached to '{}' but provider reported '{}'",
                    address, reported
                )));
            }
        }
        Ok(ResourceHandle {
            address: address.clone(),
            transaction_id: Some(result.transaction_id),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConnectorConfig;
    use crate::connector::simulated::{InMemorySlot, SimulatedCapability, SimulatedProvider};
    use crate::connector::CapabilityChain;
    use std::sync::Arc;

    async fn connect(capability: Arc<SimulatedCapability>) -> Arc<ConnectedCapability> {
        let provider = SimulatedProvider::new("1.0.0").with_capability(capability);
        let slot = Arc::new(InMemorySlot::with_descriptor(Arc::new(provider)));
        CapabilityChain::new(slot, ConnectorConfig::default())
            .unwrap()
            .connect()
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_create_balances_then_submits() {
        let capability = Arc::new(SimulatedCapability::new().with_addresses(["addr-123"]));
        let connected = connect(capability.clone()).await;
        let config = ResourceConfig::new(serde_json::json!({"maxMembers": 10}));

        let handle = SubmittingOperations.create(&connected, &config).await.unwrap();

        assert_eq!(handle.address.as_str(), "addr-123");
        assert!(handle.transaction_id.is_some());
        assert_eq!(capability.balances(), 1);
        assert_eq!(capability.submissions(), 1);
        let payload = &capability.submitted()[0];
        assert_eq!(payload["kind"], "create");
        assert_eq!(payload["config"]["maxMembers"], 10);
        assert_eq!(payload["coin_public_key"], "coin-pk");
    }

    #[tokio::test]
    async fn test_attach_keeps_requested_address() {
        let capability = Arc::new(SimulatedCapability::new());
        let connected = connect(capability.clone()).await;
        let handle = SubmittingOperations
            .attach(&connected, &"addr-42".into())
            .await
            .unwrap();
        assert_eq!(handle.address.as_str(), "addr-42");
        assert_eq!(capability.submitted()[0]["kind"], "attach");
    }

    #[tokio::test]
    async fn test_rejected_submission_is_operation_failure() {
        let capability = Arc::new(SimulatedCapability::new());
        capability.set_failure(Some("user rejected transaction".into()));
        let connected = connect(capability).await;
        let err = SubmittingOperations
            .create(&connected, &ResourceConfig::new(serde_json::json!({})))
            .await
            .unwrap_err();
        assert_eq!(
            err,
            DeploymentError::OperationFailed {
                cause: "rejected: user rejected transaction".into()
            }
        );
        assert!(!err.invalidates_capability());
    }
}
