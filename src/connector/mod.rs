//! # Capability Connector
//!
//! Acquires a handle to an externally injected capability provider.
//!
//! ## Resolution Flow
//!
//! 1. [`CapabilityDetector`] polls the [`HostSlot`] until a descriptor appears
//! 2. [`VersionNegotiator`] checks the advertised protocol version
//! 3. [`CapabilityActivator`] runs the status query, then the activation request
//! 4. [`ServiceEndpointResolver`] probes the endpoint method and fetches endpoints
//! 5. [`CapabilityChain`] memoizes the result for every deployment in the process
//!
//! The provider itself is reached only through the traits in this module, so
//! tests and the demo binary can substitute [`simulated`] implementations.

pub mod activator;
pub mod chain;
pub mod detector;
pub mod endpoints;
pub mod negotiator;
pub mod simulated;

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ProviderError;

pub use activator::{Activation, CapabilityActivator};
pub use chain::{CapabilityChain, ConnectionStatus};
pub use detector::CapabilityDetector;
pub use endpoints::{EndpointMethod, ServiceEndpointResolver};
pub use negotiator::VersionNegotiator;

// ---------------------------------------------------------------------------
// HostSlot
// ---------------------------------------------------------------------------

/// The well-known place where a provider injects its descriptor.
///
/// Read-only from this crate's side. Injection may happen at any time.
pub trait HostSlot: Send + Sync {
    fn read(&self) -> Option<Arc<dyn CapabilityDescriptor>>;
}

// ---------------------------------------------------------------------------
// CapabilityDescriptor
// ---------------------------------------------------------------------------

/// Provider entry point observed in the host slot.
#[async_trait]
pub trait CapabilityDescriptor: Send + Sync {
    /// Advertised protocol version, e.g. `"1.2.0"`.
    fn protocol_version(&self) -> String;

    /// Enabled-status query. Informational only.
    async fn is_enabled(&self) -> Result<bool, ProviderError>;

    /// Request activation. May suspend until a human approves out-of-band.
    async fn activate(&self) -> Result<Arc<dyn ActivatedCapability>, ProviderError>;

    /// Whether this provider version exposes the given endpoint method.
    fn supports(&self, method: EndpointMethod) -> bool;

    /// Fetch the endpoint bundle through the given method.
    async fn fetch_endpoints(&self, method: EndpointMethod)
        -> Result<ServiceEndpoints, ProviderError>;
}

// ---------------------------------------------------------------------------
// ActivatedCapability
// ---------------------------------------------------------------------------

/// Handle returned by a successful activation. Shared by all deployments.
#[async_trait]
pub trait ActivatedCapability: Send + Sync {
    /// Public keys of the account behind the capability.
    async fn account(&self) -> Result<AccountState, ProviderError>;

    /// Balance a pending resource operation before submission.
    async fn balance_operation(&self, payload: Value) -> Result<Value, ProviderError>;

    /// Submit a balanced resource operation.
    async fn submit_operation(&self, payload: Value) -> Result<OperationResult, ProviderError>;
}

/// Account keys reported by an activated capability.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountState {
    pub coin_public_key: String,
    pub encryption_public_key: String,
}

/// Outcome of a submitted resource operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OperationResult {
    pub transaction_id: String,
    /// Address of the resource the operation created or touched.
    pub resource_address: Option<String>,
    #[serde(default)]
    pub data: Value,
}

// ---------------------------------------------------------------------------
// ServiceEndpoints
// ---------------------------------------------------------------------------

/// Endpoint URIs needed by resource operations. Immutable once resolved.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceEndpoints {
    /// Data indexer.
    pub indexer_uri: String,
    /// Proof service.
    pub prover_server_uri: String,
    /// Configuration fetch service.
    pub zk_config_uri: String,
}

impl ServiceEndpoints {
    /// Every URI must parse as an absolute URL.
    pub fn validate(&self) -> Result<(), String> {
        for (name, uri) in [
            ("indexer", &self.indexer_uri),
            ("prover server", &self.prover_server_uri),
            ("zk config", &self.zk_config_uri),
        ] {
            url::Url::parse(uri).map_err(|e| format!("{} URI '{}' is invalid: {}", name, uri, e))?;
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// ConnectedCapability
// ---------------------------------------------------------------------------

/// Result of one successful chain execution: activated, with endpoints.
pub struct ConnectedCapability {
    pub protocol_version: String,
    /// Status reported before activation was requested.
    pub was_enabled: bool,
    pub capability: Arc<dyn ActivatedCapability>,
    pub endpoints: ServiceEndpoints,
    pub account: AccountState,
    /// Resolver bound to the endpoint method probed at activation time.
    pub endpoint_resolver: ServiceEndpointResolver,
    pub connected_at: DateTime<Utc>,
}

impl fmt::Debug for ConnectedCapability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectedCapability")
            .field("protocol_version", &self.protocol_version)
            .field("was_enabled", &self.was_enabled)
            .field("endpoints", &self.endpoints)
            .field("account", &self.account)
            .field("endpoint_method", &self.endpoint_resolver.method())
            .field("connected_at", &self.connected_at)
            .finish()
    }
}
