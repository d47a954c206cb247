//! Two-phase activation handshake.
//!
//! Phase one queries the enabled status, phase two requests activation. Each
//! phase has its own timeout; the activation phase is usually much longer
//! because the provider may wait for a human to approve.

use std::sync::Arc;
use std::time::Duration;

use tokio::time;

use super::{ActivatedCapability, CapabilityDescriptor};
use crate::error::{DeploymentError, HandshakePhase};

/// A successful handshake.
pub struct Activation {
    pub capability: Arc<dyn ActivatedCapability>,
    /// What the status query reported before activation.
    pub was_enabled: bool,
}

/// Runs the status-then-activate handshake.
#[derive(Debug, Clone, Copy)]
pub struct CapabilityActivator {
    status_timeout: Duration,
    activation_timeout: Duration,
}

impl CapabilityActivator {
    pub fn new(status_timeout: Duration, activation_timeout: Duration) -> Self {
        Self {
            status_timeout,
            activation_timeout,
        }
    }

    /// Run both phases.
    ///
    /// An "already enabled" status does not skip activation.
    pub async fn activate(
        &self,
        descriptor: &dyn CapabilityDescriptor,
    ) -> Result<Activation, DeploymentError> {
        let was_enabled = match time::timeout(self.status_timeout, descriptor.is_enabled()).await {
            Ok(Ok(enabled)) => enabled,
            Ok(Err(e)) => {
                log::error!("Capability status query failed: {}", e);
                return Err(DeploymentError::ActivationDenied {
                    cause: e.to_string(),
                });
            }
            Err(_) => {
                log::error!("Capability provider has failed to respond to status query");
                return Err(self.timed_out(HandshakePhase::Status));
            }
        };
        log::info!("Capability enabled status: {}", was_enabled);

        let capability = match time::timeout(self.activation_timeout, descriptor.activate()).await
        {
            Ok(Ok(capability)) => capability,
            Ok(Err(e)) => {
                log::error!("Capability activation rejected: {}", e);
                return Err(DeploymentError::ActivationDenied {
                    cause: e.to_string(),
                });
            }
            Err(_) => {
                log::error!("Capability activation was not approved in time");
                return Err(self.timed_out(HandshakePhase::Activation));
            }
        };
        log::info!("Capability activated");

        Ok(Activation {
            capability,
            was_enabled,
        })
    }

    fn timed_out(&self, phase: HandshakePhase) -> DeploymentError {
        let timeout = match phase {
            HandshakePhase::Status => self.status_timeout,
            HandshakePhase::Activation => self.activation_timeout,
        };
        DeploymentError::ActivationTimeout {
            phase,
            timeout_ms: timeout.as_millis() as u64,
        }
    }
}
