//! Ordered, deduplicating collection of deployments.
//!
//! `resolve` never blocks: it returns a machine immediately and drives it to a
//! terminal state on a spawned task. Requests that target the same resource
//! share one machine:
//!
//! - an attach joins a machine still in flight for that address, or one that
//!   already deployed a resource at that address
//! - a create joins a create still in flight with an equal configuration
//!
//! Failed machines are never reused, so a retry always starts a fresh attempt.
//!
//! At most one machine is ever `Deployed` at a given address. An in-flight
//! create has no address yet, so an attach can race it to the same resource;
//! whichever settles second fails with `AlreadyDeployed`, and resolving that
//! address again returns the winner.

use std::sync::Arc;

use uuid::Uuid;

use super::machine::DeploymentSettler;
use super::{
    DeploymentRequest, DeploymentStateMachine, ResourceAddress, ResourceConfig, ResourceHandle,
    ResourceOperations, SubmittingOperations,
};
use crate::connector::CapabilityChain;
use crate::error::DeploymentError;
use crate::observable::{BehaviorSubject, Subscription};

type Machines = Vec<Arc<DeploymentStateMachine>>;

pub struct DeploymentRegistry {
    chain: CapabilityChain,
    operations: Arc<dyn ResourceOperations>,
    deployments: Arc<BehaviorSubject<Machines>>,
}

impl DeploymentRegistry {
    pub fn new(chain: CapabilityChain, operations: Arc<dyn ResourceOperations>) -> Self {
        Self {
            chain,
            operations,
            deployments: Arc::new(BehaviorSubject::new(Vec::new())),
        }
    }

    /// Registry that balances and submits operations through the capability.
    pub fn with_submitting_operations(chain: CapabilityChain) -> Self {
        Self::new(chain, Arc::new(SubmittingOperations))
    }

    pub fn chain(&self) -> &CapabilityChain {
        &self.chain
    }

    // -----------------------------------------------------------------------
    // Resolution
    // -----------------------------------------------------------------------

    /// Obtain the deployment for `identity` (attach) or `config` (create).
    ///
    /// With neither, the returned machine is already `Failed` with
    /// `InvalidRequest`. Otherwise it may still be `InProgress`; subscribe to
    /// observe the outcome. Must be called from within a Tokio runtime.
    pub fn resolve(
        &self,
        identity: Option<ResourceAddress>,
        config: Option<ResourceConfig>,
    ) -> Arc<DeploymentStateMachine> {
        let request = match DeploymentRequest::from_parts(identity, config) {
            Ok(request) => request,
            Err(error) => {
                log::warn!("Rejecting deployment request: {}", error);
                let (machine, settler) = DeploymentStateMachine::start(None);
                self.append(&machine);
                settler.failed(error);
                return machine;
            }
        };

        let (machine, settler) = self.deployments.update(|current| {
            if let Some(existing) = current.iter().find(|m| reusable(m, &request)) {
                return (None, (Arc::clone(existing), None));
            }
            let (machine, settler) = DeploymentStateMachine::start(Some(request.clone()));
            let mut next = current.clone();
            next.push(Arc::clone(&machine));
            (Some(next), (machine, Some(settler)))
        });

        match settler {
            Some(settler) => {
                log::info!("Starting deployment {}", machine.id());
                let resolution = Resolution {
                    id: machine.id(),
                    chain: self.chain.clone(),
                    operations: Arc::clone(&self.operations),
                    deployments: Arc::clone(&self.deployments),
                };
                tokio::spawn(resolution.drive(request, settler));
            }
            None => log::debug!("Joining existing deployment {}", machine.id()),
        }
        machine
    }

    fn append(&self, machine: &Arc<DeploymentStateMachine>) {
        self.deployments.update(|current| {
            let mut next = current.clone();
            next.push(Arc::clone(machine));
            (Some(next), ())
        });
    }

    // -----------------------------------------------------------------------
    // Inspection
    // -----------------------------------------------------------------------

    /// Replaying stream of the whole collection, in creation order.
    pub fn all_deployments(&self) -> Subscription<Machines> {
        self.deployments.subscribe()
    }

    pub fn deployments(&self) -> Machines {
        self.deployments.value()
    }

    pub fn find(&self, id: Uuid) -> Option<Arc<DeploymentStateMachine>> {
        self.deployments
            .value()
            .into_iter()
            .find(|machine| machine.id() == id)
    }

    pub fn len(&self) -> usize {
        self.deployments.update(|current| (None, current.len()))
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn reusable(machine: &DeploymentStateMachine, request: &DeploymentRequest) -> bool {
    match request {
        DeploymentRequest::Attach { address, .. } => machine.serves_identity(address),
        DeploymentRequest::Create { config } => machine.is_pending_create(config),
    }
}

/// Background work behind one new machine.
struct Resolution {
    id: Uuid,
    chain: CapabilityChain,
    operations: Arc<dyn ResourceOperations>,
    deployments: Arc<BehaviorSubject<Machines>>,
}

impl Resolution {
    async fn drive(self, request: DeploymentRequest, settler: DeploymentSettler) {
        let connected = match self.chain.connect().await {
            Ok(connected) => connected,
            Err(error) => {
                settler.failed(error);
                return;
            }
        };

        let outcome = match &request {
            DeploymentRequest::Create { config } => self
                .operations
                .create(&connected, config)
                .await
                .map(|handle| (handle, Some(config.clone()))),
            DeploymentRequest::Attach { address, config } => self
                .operations
                .attach(&connected, address)
                .await
                .map(|handle| (handle, config.clone())),
        };

        match outcome {
            Ok((handle, config)) => self.settle_deployed(settler, handle, config),
            Err(error) => {
                if error.invalidates_capability() {
                    self.chain.invalidate(&connected);
                }
                settler.failed(error);
            }
        }
    }

    /// Settle under the collection lock so no two machines end up deployed
    /// at one address.
    fn settle_deployed(
        &self,
        settler: DeploymentSettler,
        handle: ResourceHandle,
        config: Option<ResourceConfig>,
    ) {
        self.deployments.update(|current| {
            let existing = current
                .iter()
                .find(|m| m.id() != self.id && m.is_deployed_at(&handle.address))
                .map(|m| m.id());
            match existing {
                Some(existing) => {
                    log::warn!(
                        "Resource {} already deployed by deployment {}",
                        handle.address,
                        existing
                    );
                    settler.failed(DeploymentError::AlreadyDeployed {
                        address: handle.address.to_string(),
                        existing,
                    });
                }
                None => {
                    log::info!("Resource available at {}", handle.address);
                    settler.deployed(handle, config);
                }
            }
            (None, ())
        });
    }
}
