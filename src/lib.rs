//! # Capability Deploy
//!
//! Resolves an externally injected capability provider and tracks resource
//! deployments made through it.
//!
//! A deployment either creates a new resource from a configuration or attaches
//! to an existing one by address. Before either can run, the provider must be
//! detected in its host slot, version-checked, activated by the user and asked
//! for its service endpoints. That chain runs once and is shared by every
//! deployment in the process.
//!
//! ```no_run
//! use std::sync::Arc;
//! use capability_deploy::connector::simulated::{InMemorySlot, SimulatedProvider};
//! use capability_deploy::{CapabilityChain, ConnectorConfig, DeploymentRegistry};
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let slot = Arc::new(InMemorySlot::with_descriptor(Arc::new(SimulatedProvider::new("1.0.0"))));
//! let chain = CapabilityChain::new(slot, ConnectorConfig::default())?;
//! let registry = DeploymentRegistry::with_submitting_operations(chain);
//!
//! let deployment = registry.resolve(Some("addr-123".into()), None);
//! let outcome = deployment.outcome().await;
//! println!("{}", outcome.status());
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod connector;
pub mod deployment;
pub mod error;
pub mod observable;

pub use config::{ConfigError, ConnectorConfig};
pub use connector::{CapabilityChain, ConnectedCapability, ConnectionStatus, HostSlot};
pub use deployment::{
    Deployment, DeploymentRegistry, DeploymentRequest, DeploymentStateMachine, DeploymentStatus,
    ResourceAddress, ResourceConfig, ResourceHandle,
};
pub use error::{DeploymentError, ProviderError};
pub use observable::{BehaviorSubject, Subscription};
