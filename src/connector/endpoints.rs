//! Service endpoint resolution.
//!
//! Provider versions expose the endpoint fetch under different names. The
//! method is probed once, right after activation, and the resolver keeps it;
//! call sites never branch on the provider version.

use std::fmt;
use std::sync::Arc;

use super::{CapabilityDescriptor, ServiceEndpoints};
use crate::error::DeploymentError;

// ---------------------------------------------------------------------------
// EndpointMethod
// ---------------------------------------------------------------------------

/// Known names of the endpoint-configuration fetch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EndpointMethod {
    /// Current providers.
    GetServiceEndpoints,
    /// Older providers.
    GetServiceUriConfig,
}

impl EndpointMethod {
    /// Probe order: newest convention first.
    pub const PROBE_ORDER: [EndpointMethod; 2] = [
        EndpointMethod::GetServiceEndpoints,
        EndpointMethod::GetServiceUriConfig,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            EndpointMethod::GetServiceEndpoints => "getServiceEndpoints",
            EndpointMethod::GetServiceUriConfig => "getServiceUriConfig",
        }
    }
}

impl fmt::Display for EndpointMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

// ---------------------------------------------------------------------------
// ServiceEndpointResolver
// ---------------------------------------------------------------------------

/// Fetches [`ServiceEndpoints`] through the method the provider supports.
#[derive(Clone)]
pub struct ServiceEndpointResolver {
    descriptor: Arc<dyn CapabilityDescriptor>,
    method: EndpointMethod,
}

impl ServiceEndpointResolver {
    /// Pick the first supported method in [`EndpointMethod::PROBE_ORDER`].
    pub fn probe(descriptor: Arc<dyn CapabilityDescriptor>) -> Result<Self, DeploymentError> {
        let method = EndpointMethod::PROBE_ORDER
            .into_iter()
            .find(|m| descriptor.supports(*m))
            .ok_or_else(|| DeploymentError::EndpointResolutionFailed {
                cause: "provider exposes no endpoint configuration method".to_string(),
            })?;
        log::debug!("Using endpoint method '{}'", method);
        Ok(Self { descriptor, method })
    }

    pub fn method(&self) -> EndpointMethod {
        self.method
    }

    /// Fetch and validate the endpoints. No timeout of its own.
    pub async fn resolve_endpoints(&self) -> Result<ServiceEndpoints, DeploymentError> {
        let endpoints = self
            .descriptor
            .fetch_endpoints(self.method)
            .await
            .map_err(|e| DeploymentError::EndpointResolutionFailed {
                cause: e.to_string(),
            })?;
        endpoints
            .validate()
            .map_err(|cause| DeploymentError::EndpointResolutionFailed { cause })?;
        log::info!("Retrieved service endpoint configuration");
        Ok(endpoints)
    }
}

impl fmt::Debug for ServiceEndpointResolver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceEndpointResolver")
            .field("method", &self.method)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connector::simulated::SimulatedProvider;

    #[tokio::test]
    async fn test_prefers_current_method() {
        let provider = Arc::new(SimulatedProvider::new("1.0.0"));
        let resolver = ServiceEndpointResolver::probe(provider.clone()).unwrap();
        assert_eq!(resolver.method(), EndpointMethod::GetServiceEndpoints);
        let endpoints = resolver.resolve_endpoints().await.unwrap();
        assert_eq!(endpoints, provider.endpoints());
        assert_eq!(provider.endpoint_fetches(), 1);
    }

    #[tokio::test]
    async fn test_falls_back_to_older_method() {
        let provider = Arc::new(
            SimulatedProvider::new("1.0.0")
                .with_endpoint_methods(vec![EndpointMethod::GetServiceUriConfig]),
        );
        let resolver = ServiceEndpointResolver::probe(provider.clone()).unwrap();
        assert_eq!(resolver.method(), EndpointMethod::GetServiceUriConfig);
        assert!(resolver.resolve_endpoints().await.is_ok());
    }

    #[test]
    fn test_no_supported_method() {
        let provider = Arc::new(SimulatedProvider::new("1.0.0").with_endpoint_methods(vec![]));
        let err = ServiceEndpointResolver::probe(provider).err().unwrap();
        assert!(matches!(err, DeploymentError::EndpointResolutionFailed { .. }));
    }

    #[tokio::test]
    async fn test_fetch_failure_propagates() {
        let provider = Arc::new(
            SimulatedProvider::new("1.0.0").with_endpoint_failure("config service down"),
        );
        let resolver = ServiceEndpointResolver::probe(provider).unwrap();
        let err = resolver.resolve_endpoints().await.unwrap_err();
        assert_eq!(
            err,
            DeploymentError::EndpointResolutionFailed {
                cause: "unavailable: config service down".into()
            }
        );
    }

    #[tokio::test]
    async fn test_malformed_uri_is_rejected() {
        let provider = Arc::new(SimulatedProvider::new("1.0.0").with_endpoints(ServiceEndpoints {
            indexer_uri: "::::".into(),
            prover_server_uri: "http://localhost:6300".into(),
            zk_config_uri: "http://localhost:6301".into(),
        }));
        let resolver = ServiceEndpointResolver::probe(provider).unwrap();
        assert!(resolver.resolve_endpoints().await.is_err());
    }
}
