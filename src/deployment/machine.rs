//! Single-deployment state machine.
//!
//! `InProgress → Deployed | Failed`. The terminal transition can only be made
//! through a [`DeploymentSettler`], which is consumed by it, so a machine never
//! transitions twice. Every subscriber receives the current state first, then
//! each later transition once.

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use uuid::Uuid;

use super::{Deployment, DeploymentRequest, ResourceAddress, ResourceConfig, ResourceHandle};
use crate::error::DeploymentError;
use crate::observable::{BehaviorSubject, Subscription};

// ---------------------------------------------------------------------------
// DeploymentStateMachine
// ---------------------------------------------------------------------------

/// Observable lifecycle of one deployment.
pub struct DeploymentStateMachine {
    id: Uuid,
    request: Option<DeploymentRequest>,
    created_at: DateTime<Utc>,
    settled_at: Mutex<Option<DateTime<Utc>>>,
    state: BehaviorSubject<Deployment>,
}

impl DeploymentStateMachine {
    /// New `InProgress` machine plus the only handle able to settle it.
    ///
    /// `request` is `None` for requests rejected before resolution started.
    pub(crate) fn start(
        request: Option<DeploymentRequest>,
    ) -> (Arc<DeploymentStateMachine>, DeploymentSettler) {
        let machine = Arc::new(DeploymentStateMachine {
            id: Uuid::new_v4(),
            request,
            created_at: Utc::now(),
            settled_at: Mutex::new(None),
            state: BehaviorSubject::new(Deployment::InProgress),
        });
        let settler = DeploymentSettler {
            machine: Some(Arc::clone(&machine)),
        };
        (machine, settler)
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn request(&self) -> Option<&DeploymentRequest> {
        self.request.as_ref()
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn settled_at(&self) -> Option<DateTime<Utc>> {
        *self.settled_at.lock()
    }

    /// Current state snapshot.
    pub fn current(&self) -> Deployment {
        self.state.value()
    }

    pub fn is_terminal(&self) -> bool {
        self.state.is_completed()
    }

    /// Replaying stream of states. Ends after the terminal state.
    pub fn subscribe(&self) -> Subscription<Deployment> {
        self.state.subscribe()
    }

    /// Wait for the terminal state.
    pub async fn outcome(&self) -> Deployment {
        let mut states = self.subscribe();
        let mut last = Deployment::InProgress;
        while let Some(state) = states.next().await {
            last = state;
        }
        last
    }

    /// In flight for `identity`, or deployed at `identity`.
    pub(crate) fn serves_identity(&self, identity: &ResourceAddress) -> bool {
        match self.current() {
            Deployment::InProgress => {
                self.request.as_ref().and_then(DeploymentRequest::identity) == Some(identity)
            }
            Deployment::Deployed { handle, .. } => &handle.address == identity,
            Deployment::Failed { .. } => false,
        }
    }

    /// Still creating a resource from an equal configuration.
    pub(crate) fn is_pending_create(&self, config: &ResourceConfig) -> bool {
        matches!(
            (&self.request, self.current()),
            (Some(DeploymentRequest::Create { config: pending }), Deployment::InProgress)
                if pending == config
        )
    }

    /// Settled `Deployed` with a handle at `address`.
    pub(crate) fn is_deployed_at(&self, address: &ResourceAddress) -> bool {
        matches!(
            self.current(),
            Deployment::Deployed { handle, .. } if &handle.address == address
        )
    }

    fn finish(&self, outcome: Deployment) {
        *self.settled_at.lock() = Some(Utc::now());
        let settled = self.state.complete(outcome);
        debug_assert!(settled, "deployment {} settled twice", self.id);
    }
}

impl fmt::Debug for DeploymentStateMachine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeploymentStateMachine")
            .field("id", &self.id)
            .field("request", &self.request)
            .field("state", &self.current())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// DeploymentSettler
// ---------------------------------------------------------------------------

/// One-shot handle owned by the resolution task.
///
/// Dropping it unsettled fails the deployment, so observers never wait on a
/// task that died.
pub struct DeploymentSettler {
    machine: Option<Arc<DeploymentStateMachine>>,
}

impl DeploymentSettler {
    pub fn deployed(mut self, handle: ResourceHandle, config: Option<ResourceConfig>) {
        self.settle(Deployment::Deployed { handle, config });
    }

    pub fn failed(mut self, error: DeploymentError) {
        self.settle(Deployment::Failed { error });
    }

    fn settle(&mut self, outcome: Deployment) {
        if let Some(machine) = self.machine.take() {
            log::info!("Deployment {} settled as {}", machine.id, outcome.status());
            machine.finish(outcome);
        }
    }
}

impl Drop for DeploymentSettler {
    fn drop(&mut self) {
        if self.machine.is_some() {
            log::error!("Deployment resolution ended without settling");
            self.settle(Deployment::Failed {
                error: DeploymentError::operation_failed("resolution ended without settling"),
            });
        }
    }
}
