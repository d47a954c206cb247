//! Memoized capability chain.
//!
//! Detection, negotiation, activation and endpoint resolution run at most
//! once per successful connection, shared by every deployment. Concurrent
//! callers await the same in-flight execution and all observe its single
//! outcome, so the user never sees two activation prompts. A failed execution,
//! including one where the provider panicked, drops the memo; the next caller
//! starts again from detection.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::Utc;
use futures::future::{BoxFuture, FutureExt, Shared};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use super::{
    CapabilityActivator, CapabilityDetector, ConnectedCapability, HostSlot,
    ServiceEndpointResolver, VersionNegotiator,
};
use crate::config::{ConfigError, ConnectorConfig};
use crate::error::DeploymentError;
use crate::observable::{BehaviorSubject, Subscription};

type ChainOutcome = Result<Arc<ConnectedCapability>, DeploymentError>;
type SharedConnect = Shared<BoxFuture<'static, ChainOutcome>>;

// ---------------------------------------------------------------------------
// ConnectionStatus
// ---------------------------------------------------------------------------

/// Observable state of the shared connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ConnectionStatus {
    Disconnected,
    Connecting,
    Connected { protocol_version: String },
    Failed { error: DeploymentError },
}

// ---------------------------------------------------------------------------
// CapabilityChain
// ---------------------------------------------------------------------------

struct MemoEntry {
    generation: u64,
    future: SharedConnect,
}

/// Everything one chain execution needs. Cloned into the memoized future,
/// which refers back to the chain only weakly.
#[derive(Clone)]
struct Connector {
    slot: Arc<dyn HostSlot>,
    config: ConnectorConfig,
    negotiator: VersionNegotiator,
}

struct ChainInner {
    connector: Connector,
    memo: Mutex<Option<MemoEntry>>,
    generation: AtomicU64,
    status: BehaviorSubject<ConnectionStatus>,
}

/// Shared, once-computed capability connection.
#[derive(Clone)]
pub struct CapabilityChain {
    inner: Arc<ChainInner>,
}

impl CapabilityChain {
    pub fn new(slot: Arc<dyn HostSlot>, config: ConnectorConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        let negotiator = VersionNegotiator::new(&config.accepted_version)?;
        Ok(Self {
            inner: Arc::new(ChainInner {
                connector: Connector {
                    slot,
                    config,
                    negotiator,
                },
                memo: Mutex::new(None),
                generation: AtomicU64::new(0),
                status: BehaviorSubject::new(ConnectionStatus::Disconnected),
            }),
        })
    }

    pub fn config(&self) -> &ConnectorConfig {
        &self.inner.connector.config
    }

    /// Connect, or join the connection already made or in flight.
    pub async fn connect(&self) -> ChainOutcome {
        self.memoized().await
    }

    /// The connected capability, if a chain execution already succeeded.
    pub fn connected(&self) -> Option<Arc<ConnectedCapability>> {
        let memo = self.inner.memo.lock();
        match memo.as_ref()?.future.peek()? {
            Ok(connected) => Some(Arc::clone(connected)),
            Err(_) => None,
        }
    }

    /// Drop the memoized connection. The next `connect` re-runs detection.
    ///
    /// Callers already awaiting an in-flight execution still receive its
    /// outcome.
    pub fn disconnect(&self) {
        let dropped = self.inner.memo.lock().take();
        if dropped.is_some() {
            log::info!("Disconnected from capability provider");
        }
        self.inner.status.next(ConnectionStatus::Disconnected);
    }

    /// Disconnect only if `used` is still the memoized connection.
    ///
    /// Returns `false` when a newer connection replaced it, which is then
    /// left untouched.
    pub fn invalidate(&self, used: &Arc<ConnectedCapability>) -> bool {
        let mut memo = self.inner.memo.lock();
        let current = matches!(
            memo.as_ref().and_then(|entry| entry.future.peek()),
            Some(Ok(connected)) if Arc::ptr_eq(connected, used)
        );
        if !current {
            log::debug!("Ignoring invalidation of a replaced capability connection");
            return false;
        }
        *memo = None;
        drop(memo);
        log::warn!("Capability connection invalidated");
        self.inner.status.next(ConnectionStatus::Disconnected);
        true
    }

    pub fn status(&self) -> ConnectionStatus {
        self.inner.status.value()
    }

    /// Replaying stream of connection status changes.
    pub fn watch_status(&self) -> Subscription<ConnectionStatus> {
        self.inner.status.subscribe()
    }

    fn memoized(&self) -> SharedConnect {
        let mut memo = self.inner.memo.lock();
        if let Some(entry) = memo.as_ref() {
            return entry.future.clone();
        }

        let generation = self.inner.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let connector = self.inner.connector.clone();
        let chain = Arc::downgrade(&self.inner);
        let future = async move {
            let outcome = match AssertUnwindSafe(connector.establish()).catch_unwind().await {
                Ok(outcome) => outcome,
                Err(panic) => Err(DeploymentError::ProviderFault {
                    cause: format!("provider panicked: {}", panic_message(panic.as_ref())),
                }),
            };
            match chain.upgrade() {
                Some(chain) => chain.record(generation, &outcome),
                None => log::debug!("Capability chain dropped before execution finished"),
            }
            outcome
        }
        .boxed()
        .shared();
        *memo = Some(MemoEntry {
            generation,
            future: future.clone(),
        });
        self.inner.status.next(ConnectionStatus::Connecting);
        future
    }
}

impl ChainInner {
    /// Publish an execution's outcome. A failure drops the memo, unless a
    /// newer execution already replaced it.
    fn record(&self, generation: u64, outcome: &ChainOutcome) {
        let mut memo = self.memo.lock();
        let current = memo.as_ref().map(|e| e.generation) == Some(generation);
        match outcome {
            Ok(connected) => {
                log::info!("Connected to capability provider and retrieved service configuration");
                if current {
                    self.status.next(ConnectionStatus::Connected {
                        protocol_version: connected.protocol_version.clone(),
                    });
                }
            }
            Err(error) => {
                log::error!("Capability chain failed: {}", error);
                if current {
                    *memo = None;
                    self.status.next(ConnectionStatus::Failed {
                        error: error.clone(),
                    });
                }
            }
        }
    }
}

impl Connector {
    async fn establish(&self) -> ChainOutcome {
        let detector = CapabilityDetector::new(Arc::clone(&self.slot), self.config.poll_interval());
        let descriptor = detector.detect(self.config.detection_timeout()).await?;
        let descriptor = self.negotiator.negotiate(descriptor)?;

        let activator = CapabilityActivator::new(
            self.config.status_timeout(),
            self.config.activation_timeout(),
        );
        let activation = activator.activate(descriptor.as_ref()).await?;

        let endpoint_resolver = ServiceEndpointResolver::probe(Arc::clone(&descriptor))?;
        let endpoints = endpoint_resolver.resolve_endpoints().await?;

        let account = activation.capability.account().await.map_err(|e| {
            DeploymentError::ProviderFault {
                cause: format!("account state unavailable: {}", e),
            }
        })?;

        Ok(Arc::new(ConnectedCapability {
            protocol_version: descriptor.protocol_version(),
            was_enabled: activation.was_enabled,
            capability: activation.capability,
            endpoints,
            account,
            endpoint_resolver,
            connected_at: Utc::now(),
        }))
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(message) = payload.downcast_ref::<&str>() {
        *message
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.as_str()
    } else {
        "unknown panic payload"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connector::simulated::{
        ActivationScript, InMemorySlot, SimulatedCapability, SimulatedProvider,
    };
    use std::time::Duration;

    fn chain_for(slot: Arc<InMemorySlot>) -> CapabilityChain {
        CapabilityChain::new(slot, ConnectorConfig::default()).unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_callers_share_one_execution() {
        let provider = Arc::new(
            SimulatedProvider::new("1.2.0").with_activation_delay(Duration::from_millis(200)),
        );
        let slot = Arc::new(InMemorySlot::new());
        slot.inject_after(Duration::from_millis(250), provider.clone());
        let chain = chain_for(slot);

        let (a, b, c) = tokio::join!(chain.connect(), chain.connect(), chain.connect());
        let (a, b, c) = (a.unwrap(), b.unwrap(), c.unwrap());

        assert!(Arc::ptr_eq(&a, &b) && Arc::ptr_eq(&b, &c));
        assert_eq!(provider.activations(), 1);
        assert_eq!(provider.status_queries(), 1);
        assert_eq!(a.account.coin_public_key, "coin-pk");
    }

    #[tokio::test(start_paused = true)]
    async fn test_success_is_memoized_without_polling() {
        let slot = Arc::new(InMemorySlot::with_descriptor(Arc::new(SimulatedProvider::new(
            "1.0.0",
        ))));
        let chain = chain_for(slot.clone());

        chain.connect().await.unwrap();
        let reads = slot.reads();
        chain.connect().await.unwrap();
        assert_eq!(slot.reads(), reads);
        assert!(chain.connected().is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_failure_invalidates_and_next_call_redetects() {
        let provider = Arc::new(
            SimulatedProvider::new("1.0.0")
                .with_activation(ActivationScript::Reject("user rejected".into())),
        );
        let slot = Arc::new(InMemorySlot::with_descriptor(provider.clone()));
        let chain = chain_for(slot.clone());

        let err = chain.connect().await.unwrap_err();
        assert!(matches!(err, DeploymentError::ActivationDenied { .. }));
        assert!(matches!(chain.status(), ConnectionStatus::Failed { .. }));
        assert!(chain.connected().is_none());

        provider.set_activation(ActivationScript::Approve);
        let reads = slot.reads();
        chain.connect().await.unwrap();
        assert!(slot.reads() > reads);
        assert_eq!(provider.activations(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_incompatible_version_never_activates() {
        let provider = Arc::new(SimulatedProvider::new("2.0.0"));
        let chain = chain_for(Arc::new(InMemorySlot::with_descriptor(provider.clone())));

        let err = chain.connect().await.unwrap_err();
        assert_eq!(
            err,
            DeploymentError::IncompatibleProtocol {
                required: "1.x".into(),
                actual: "2.0.0".into()
            }
        );
        assert_eq!(provider.status_queries(), 0);
        assert_eq!(provider.activations(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_status_transitions_replayed() {
        let slot = Arc::new(InMemorySlot::with_descriptor(Arc::new(SimulatedProvider::new(
            "1.1.0",
        ))));
        let chain = chain_for(slot);
        let mut status = chain.watch_status();
        assert_eq!(status.try_next(), Some(ConnectionStatus::Disconnected));

        chain.connect().await.unwrap();
        assert_eq!(status.try_next(), Some(ConnectionStatus::Connecting));
        assert_eq!(
            status.try_next(),
            Some(ConnectionStatus::Connected {
                protocol_version: "1.1.0".into()
            })
        );

        chain.disconnect();
        assert_eq!(status.try_next(), Some(ConnectionStatus::Disconnected));
        assert!(chain.connected().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_disconnect_forces_fresh_activation() {
        let provider = Arc::new(SimulatedProvider::new("1.0.0"));
        let chain = chain_for(Arc::new(InMemorySlot::with_descriptor(provider.clone())));
        chain.connect().await.unwrap();
        chain.disconnect();
        chain.connect().await.unwrap();
        assert_eq!(provider.activations(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_endpoint_failure_invalidates() {
        let provider =
            Arc::new(SimulatedProvider::new("1.0.0").with_endpoint_failure("no config"));
        let chain = chain_for(Arc::new(InMemorySlot::with_descriptor(provider.clone())));
        let err = chain.connect().await.unwrap_err();
        assert!(matches!(err, DeploymentError::EndpointResolutionFailed { .. }));
        chain.connect().await.unwrap_err();
        assert_eq!(provider.activations(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_provider_panic_invalidates_and_next_call_redetects() {
        let provider =
            Arc::new(SimulatedProvider::new("1.0.0").with_activation(ActivationScript::Panic));
        let slot = Arc::new(InMemorySlot::with_descriptor(provider.clone()));
        let chain = chain_for(slot.clone());

        let err = chain.connect().await.unwrap_err();
        assert!(matches!(err, DeploymentError::ProviderFault { .. }));
        assert!(err.to_string().contains("crashed during activation"));
        assert!(matches!(chain.status(), ConnectionStatus::Failed { .. }));

        provider.set_activation(ActivationScript::Approve);
        let reads = slot.reads();
        chain.connect().await.unwrap();
        assert!(slot.reads() > reads);
        assert_eq!(provider.activations(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_account_failure_is_provider_fault() {
        let capability = Arc::new(SimulatedCapability::new().with_account_failure("locked"));
        let provider = Arc::new(SimulatedProvider::new("1.0.0").with_capability(capability));
        let chain = chain_for(Arc::new(InMemorySlot::with_descriptor(provider)));

        let err = chain.connect().await.unwrap_err();
        assert_eq!(
            err,
            DeploymentError::ProviderFault {
                cause: "account state unavailable: unavailable: locked".into()
            }
        );
        assert!(chain.connected().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_invalidate_ignores_replaced_connection() {
        let provider = Arc::new(SimulatedProvider::new("1.0.0"));
        let chain = chain_for(Arc::new(InMemorySlot::with_descriptor(provider.clone())));

        let old = chain.connect().await.unwrap();
        chain.disconnect();
        let current = chain.connect().await.unwrap();

        assert!(!chain.invalidate(&old));
        assert!(chain.connected().is_some());

        assert!(chain.invalidate(&current));
        assert!(chain.connected().is_none());
        assert_eq!(chain.status(), ConnectionStatus::Disconnected);
    }

    #[tokio::test(start_paused = true)]
    async fn test_pending_execution_does_not_keep_chain_alive() {
        let provider =
            Arc::new(SimulatedProvider::new("1.0.0").with_activation(ActivationScript::Hang));
        let chain = chain_for(Arc::new(InMemorySlot::with_descriptor(provider)));

        let mut pending = tokio_test::task::spawn(chain.memoized());
        tokio_test::assert_pending!(pending.poll());

        let inner = Arc::downgrade(&chain.inner);
        drop(chain);
        assert!(inner.upgrade().is_none());
        drop(pending);
    }
}
