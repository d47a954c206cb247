//! In-memory host slot and scripted provider.
//!
//! Used by the demo binary and by tests. Every provider entry point counts its
//! calls so callers can check how often detection, activation and submission
//! actually ran.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use tokio::task::JoinHandle;

use super::{
    AccountState, ActivatedCapability, CapabilityDescriptor, EndpointMethod, HostSlot,
    OperationResult, ServiceEndpoints,
};
use crate::error::ProviderError;

// ---------------------------------------------------------------------------
// InMemorySlot
// ---------------------------------------------------------------------------

/// Host slot backed by a lock. Counts reads.
#[derive(Default)]
pub struct InMemorySlot {
    descriptor: RwLock<Option<Arc<dyn CapabilityDescriptor>>>,
    reads: AtomicUsize,
}

impl InMemorySlot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_descriptor(descriptor: Arc<dyn CapabilityDescriptor>) -> Self {
        let slot = Self::new();
        slot.inject(descriptor);
        slot
    }

    pub fn inject(&self, descriptor: Arc<dyn CapabilityDescriptor>) {
        *self.descriptor.write() = Some(descriptor);
    }

    /// Inject from a background task once `delay` has elapsed.
    pub fn inject_after(
        self: &Arc<Self>,
        delay: Duration,
        descriptor: Arc<dyn CapabilityDescriptor>,
    ) -> JoinHandle<()> {
        let slot = Arc::clone(self);
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            log::debug!("Injecting simulated capability descriptor");
            slot.inject(descriptor);
        })
    }

    pub fn clear(&self) {
        *self.descriptor.write() = None;
    }

    /// How many times the slot has been read.
    pub fn reads(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }
}

impl HostSlot for InMemorySlot {
    fn read(&self) -> Option<Arc<dyn CapabilityDescriptor>> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        self.descriptor.read().clone()
    }
}

// ---------------------------------------------------------------------------
// SimulatedProvider
// ---------------------------------------------------------------------------

/// How the simulated provider answers an activation request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActivationScript {
    Approve,
    Reject(String),
    /// Never answer.
    Hang,
    /// Crash inside the call.
    Panic,
}

/// Scripted [`CapabilityDescriptor`].
pub struct SimulatedProvider {
    version: String,
    enabled: bool,
    status_delay: Duration,
    activation_delay: Duration,
    activation: Mutex<ActivationScript>,
    endpoint_methods: Vec<EndpointMethod>,
    endpoints: ServiceEndpoints,
    endpoint_failure: Option<String>,
    capability: Arc<SimulatedCapability>,
    status_queries: AtomicUsize,
    activations: AtomicUsize,
    endpoint_fetches: AtomicUsize,
}

impl SimulatedProvider {
    pub fn new(version: impl Into<String>) -> Self {
        Self {
            version: version.into(),
            enabled: false,
            status_delay: Duration::ZERO,
            activation_delay: Duration::ZERO,
            activation: Mutex::new(ActivationScript::Approve),
            endpoint_methods: EndpointMethod::PROBE_ORDER.to_vec(),
            endpoints: default_endpoints(),
            endpoint_failure: None,
            capability: Arc::new(SimulatedCapability::new()),
            status_queries: AtomicUsize::new(0),
            activations: AtomicUsize::new(0),
            endpoint_fetches: AtomicUsize::new(0),
        }
    }

    // -----------------------------------------------------------------------
    // Builder methods
    // -----------------------------------------------------------------------

    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    pub fn with_status_delay(mut self, delay: Duration) -> Self {
        self.status_delay = delay;
        self
    }

    /// Time the simulated user takes to approve.
    pub fn with_activation_delay(mut self, delay: Duration) -> Self {
        self.activation_delay = delay;
        self
    }

    pub fn with_activation(self, script: ActivationScript) -> Self {
        *self.activation.lock() = script;
        self
    }

    pub fn with_endpoint_methods(mut self, methods: Vec<EndpointMethod>) -> Self {
        self.endpoint_methods = methods;
        self
    }

    pub fn with_endpoints(mut self, endpoints: ServiceEndpoints) -> Self {
        self.endpoints = endpoints;
        self
    }

    pub fn with_endpoint_failure(mut self, message: impl Into<String>) -> Self {
        self.endpoint_failure = Some(message.into());
        self
    }

    pub fn with_capability(mut self, capability: Arc<SimulatedCapability>) -> Self {
        self.capability = capability;
        self
    }

    /// Change the activation answer after the provider was injected.
    pub fn set_activation(&self, script: ActivationScript) {
        *self.activation.lock() = script;
    }

    // -----------------------------------------------------------------------
    // Inspection
    // -----------------------------------------------------------------------

    pub fn capability(&self) -> Arc<SimulatedCapability> {
        Arc::clone(&self.capability)
    }

    pub fn endpoints(&self) -> ServiceEndpoints {
        self.endpoints.clone()
    }

    pub fn status_queries(&self) -> usize {
        self.status_queries.load(Ordering::SeqCst)
    }

    pub fn activations(&self) -> usize {
        self.activations.load(Ordering::SeqCst)
    }

    pub fn endpoint_fetches(&self) -> usize {
        self.endpoint_fetches.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CapabilityDescriptor for SimulatedProvider {
    fn protocol_version(&self) -> String {
        self.version.clone()
    }

    async fn is_enabled(&self) -> Result<bool, ProviderError> {
        self.status_queries.fetch_add(1, Ordering::SeqCst);
        if !self.status_delay.is_zero() {
            tokio::time::sleep(self.status_delay).await;
        }
        Ok(self.enabled)
    }

    async fn activate(&self) -> Result<Arc<dyn ActivatedCapability>, ProviderError> {
        self.activations.fetch_add(1, Ordering::SeqCst);
        if !self.activation_delay.is_zero() {
            tokio::time::sleep(self.activation_delay).await;
        }
        let script = self.activation.lock().clone();
        match script {
            ActivationScript::Approve => {
                let capability: Arc<dyn ActivatedCapability> = self.capability.clone();
                Ok(capability)
            }
            ActivationScript::Reject(reason) => Err(ProviderError::Rejected(reason)),
            ActivationScript::Hang => std::future::pending().await,
            ActivationScript::Panic => panic!("simulated provider crashed during activation"),
        }
    }

    fn supports(&self, method: EndpointMethod) -> bool {
        self.endpoint_methods.contains(&method)
    }

    async fn fetch_endpoints(
        &self,
        method: EndpointMethod,
    ) -> Result<ServiceEndpoints, ProviderError> {
        self.endpoint_fetches.fetch_add(1, Ordering::SeqCst);
        if !self.supports(method) {
            return Err(ProviderError::Unsupported {
                method: method.name().to_string(),
            });
        }
        match &self.endpoint_failure {
            Some(message) => Err(ProviderError::Unavailable(message.clone())),
            None => Ok(self.endpoints.clone()),
        }
    }
}

fn default_endpoints() -> ServiceEndpoints {
    ServiceEndpoints {
        indexer_uri: "http://127.0.0.1:8088/api/v1/graphql".to_string(),
        prover_server_uri: "http://127.0.0.1:6300".to_string(),
        zk_config_uri: "http://127.0.0.1:6301/zk".to_string(),
    }
}

// ---------------------------------------------------------------------------
// SimulatedCapability
// ---------------------------------------------------------------------------

/// Scripted [`ActivatedCapability`].
///
/// Submissions carrying an `address` field resolve to that address; others
/// take the next scripted address, or a generated `addr-N`.
pub struct SimulatedCapability {
    account: AccountState,
    addresses: Mutex<VecDeque<String>>,
    operation_delay: Duration,
    account_failure: Option<String>,
    failure: Mutex<Option<String>>,
    submitted: Mutex<Vec<Value>>,
    balances: AtomicUsize,
    submissions: AtomicUsize,
}

impl SimulatedCapability {
    pub fn new() -> Self {
        Self {
            account: AccountState {
                coin_public_key: "coin-pk".to_string(),
                encryption_public_key: "enc-pk".to_string(),
            },
            addresses: Mutex::new(VecDeque::new()),
            operation_delay: Duration::ZERO,
            account_failure: None,
            failure: Mutex::new(None),
            submitted: Mutex::new(Vec::new()),
            balances: AtomicUsize::new(0),
            submissions: AtomicUsize::new(0),
        }
    }

    /// Addresses handed out, in order, to operations without one.
    pub fn with_addresses<I, S>(self, addresses: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.addresses
            .lock()
            .extend(addresses.into_iter().map(Into::into));
        self
    }

    pub fn with_operation_delay(mut self, delay: Duration) -> Self {
        self.operation_delay = delay;
        self
    }

    /// Fail every account read with `message`.
    pub fn with_account_failure(mut self, message: impl Into<String>) -> Self {
        self.account_failure = Some(message.into());
        self
    }

    /// Make every later submission fail with `message`, or succeed again.
    pub fn set_failure(&self, message: Option<String>) {
        *self.failure.lock() = message;
    }

    pub fn balances(&self) -> usize {
        self.balances.load(Ordering::SeqCst)
    }

    pub fn submissions(&self) -> usize {
        self.submissions.load(Ordering::SeqCst)
    }

    /// Payloads received by `submit_operation`, in order.
    pub fn submitted(&self) -> Vec<Value> {
        self.submitted.lock().clone()
    }
}

impl Default for SimulatedCapability {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ActivatedCapability for SimulatedCapability {
    async fn account(&self) -> Result<AccountState, ProviderError> {
        match &self.account_failure {
            Some(message) => Err(ProviderError::Unavailable(message.clone())),
            None => Ok(self.account.clone()),
        }
    }

    async fn balance_operation(&self, payload: Value) -> Result<Value, ProviderError> {
        self.balances.fetch_add(1, Ordering::SeqCst);
        Ok(payload)
    }

    async fn submit_operation(&self, payload: Value) -> Result<OperationResult, ProviderError> {
        let n = self.submissions.fetch_add(1, Ordering::SeqCst) + 1;
        self.submitted.lock().push(payload.clone());
        if !self.operation_delay.is_zero() {
            tokio::time::sleep(self.operation_delay).await;
        }
        let failure = self.failure.lock().clone();
        if let Some(message) = failure {
            return Err(ProviderError::Rejected(message));
        }

        let address = match payload.get("address").and_then(Value::as_str) {
            Some(address) => address.to_string(),
            None => self
                .addresses
                .lock()
                .pop_front()
                .unwrap_or_else(|| format!("addr-{}", n)),
        };
        Ok(OperationResult {
            transaction_id: uuid::Uuid::new_v4().to_string(),
            resource_address: Some(address),
            data: Value::Null,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_slot_counts_reads() {
        let slot = InMemorySlot::new();
        assert!(slot.read().is_none());
        slot.inject(Arc::new(SimulatedProvider::new("1.0.0")));
        assert!(slot.read().is_some());
        slot.clear();
        assert!(slot.read().is_none());
        assert_eq!(slot.reads(), 3);
    }

    #[tokio::test]
    async fn test_capability_address_assignment() {
        let capability = SimulatedCapability::new().with_addresses(["addr-123"]);
        let created = capability
            .submit_operation(serde_json::json!({"kind": "create"}))
            .await
            .unwrap();
        assert_eq!(created.resource_address.as_deref(), Some("addr-123"));

        let attached = capability
            .submit_operation(serde_json::json!({"kind": "attach", "address": "addr-9"}))
            .await
            .unwrap();
        assert_eq!(attached.resource_address.as_deref(), Some("addr-9"));

        let generated = capability
            .submit_operation(serde_json::json!({"kind": "create"}))
            .await
            .unwrap();
        assert_eq!(generated.resource_address.as_deref(), Some("addr-3"));
        assert_eq!(capability.submitted().len(), 3);
    }

    #[tokio::test]
    async fn test_capability_failure_toggle() {
        let capability = SimulatedCapability::new();
        capability.set_failure(Some("insufficient funds".into()));
        let err = capability.submit_operation(Value::Null).await.unwrap_err();
        assert_eq!(err, ProviderError::Rejected("insufficient funds".into()));
        capability.set_failure(None);
        assert!(capability.submit_operation(Value::Null).await.is_ok());
    }
}
