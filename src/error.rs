//! Error taxonomy for capability resolution and deployments.
//!
//! Every failure a deployment can observe is a [`DeploymentError`]. Provider
//! implementations report their own failures as [`ProviderError`], which the
//! capability chain classifies into the taxonomy.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

// ---------------------------------------------------------------------------
// HandshakePhase
// ---------------------------------------------------------------------------

/// The two bounded phases of the activation handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HandshakePhase {
    /// Enabled-status query.
    Status,
    /// Activation request (may wait on human approval).
    Activation,
}

impl fmt::Display for HandshakePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HandshakePhase::Status => write!(f, "status"),
            HandshakePhase::Activation => write!(f, "activation"),
        }
    }
}

// ---------------------------------------------------------------------------
// DeploymentError
// ---------------------------------------------------------------------------

/// Classified failure of a deployment.
///
/// Errors are captured into `Deployment::Failed` and never escape the
/// registry. The type is `Clone` so one capability-chain outcome can be handed
/// to every deployment waiting on it.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DeploymentError {
    /// No capability descriptor appeared in the host slot before the timeout.
    #[error("capability provider not found after {timeout_ms}ms; is it installed?")]
    CapabilityNotFound { timeout_ms: u64 },

    /// The descriptor advertises a protocol version outside the accepted range.
    #[error("incompatible capability protocol: require '{required}', got '{actual}'")]
    IncompatibleProtocol { required: String, actual: String },

    /// One handshake phase did not answer in time.
    #[error("capability provider failed to respond during {phase} within {timeout_ms}ms")]
    ActivationTimeout { phase: HandshakePhase, timeout_ms: u64 },

    /// The provider rejected the handshake.
    #[error("capability activation denied: {cause}")]
    ActivationDenied { cause: String },

    /// Endpoint configuration could not be fetched after activation.
    #[error("failed to resolve service endpoints: {cause}")]
    EndpointResolutionFailed { cause: String },

    /// The provider failed after the handshake, or crashed inside a call.
    #[error("capability provider failed: {cause}")]
    ProviderFault { cause: String },

    /// `resolve` was called with neither an identity nor a configuration.
    #[error("invalid deployment request: {reason}")]
    InvalidRequest { reason: String },

    /// The create/attach operation itself failed.
    #[error("resource operation failed: {cause}")]
    OperationFailed { cause: String },

    /// Another deployment already settled at the same resource address.
    #[error("resource {address} is already deployed by deployment {existing}")]
    AlreadyDeployed { address: String, existing: Uuid },
}

impl DeploymentError {
    /// Whether this failure came from the shared capability chain and must
    /// drop the memoized capability.
    pub fn invalidates_capability(&self) -> bool {
        !matches!(
            self,
            DeploymentError::InvalidRequest { .. }
                | DeploymentError::OperationFailed { .. }
                | DeploymentError::AlreadyDeployed { .. }
        )
    }

    pub fn operation_failed(cause: impl fmt::Display) -> Self {
        DeploymentError::OperationFailed {
            cause: cause.to_string(),
        }
    }
}

// ---------------------------------------------------------------------------
// ProviderError
// ---------------------------------------------------------------------------

/// Failure reported by a capability provider implementation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProviderError {
    /// The user or the provider refused the request.
    #[error("rejected: {0}")]
    Rejected(String),

    /// The provider does not implement the named method.
    #[error("method '{method}' is not supported by this provider")]
    Unsupported { method: String },

    /// The provider could not serve the request.
    #[error("unavailable: {0}")]
    Unavailable(String),
}
