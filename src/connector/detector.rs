//! Polling detection of an injected capability descriptor.
//!
//! The host offers no notification when a provider injects itself, so the
//! detector reads the slot at a fixed interval until a descriptor shows up or
//! the timeout expires. Callers just await [`CapabilityDetector::detect`].

use std::sync::Arc;
use std::time::Duration;

use tokio::time::{self, MissedTickBehavior};

use super::{CapabilityDescriptor, HostSlot};
use crate::error::DeploymentError;

/// Polls a [`HostSlot`] for a descriptor.
pub struct CapabilityDetector {
    slot: Arc<dyn HostSlot>,
    poll_interval: Duration,
}

impl CapabilityDetector {
    pub fn new(slot: Arc<dyn HostSlot>, poll_interval: Duration) -> Self {
        Self {
            slot,
            poll_interval,
        }
    }

    /// Wait for the first non-empty slot value.
    ///
    /// The slot is read immediately and then once per poll interval. Polling
    /// stops at the first descriptor found; on timeout it is cancelled and
    /// `CapabilityNotFound` is returned.
    pub async fn detect(
        &self,
        timeout: Duration,
    ) -> Result<Arc<dyn CapabilityDescriptor>, DeploymentError> {
        let poll = async {
            let mut ticker = time::interval(self.poll_interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                match self.slot.read() {
                    Some(descriptor) => {
                        log::info!(
                            "Capability descriptor found (protocol version {})",
                            descriptor.protocol_version()
                        );
                        return descriptor;
                    }
                    None => log::debug!("Checking for capability descriptor: absent"),
                }
            }
        };

        time::timeout(timeout, poll).await.map_err(|_| {
            log::error!("Could not find capability descriptor after {:?}", timeout);
            DeploymentError::CapabilityNotFound {
                timeout_ms: timeout.as_millis() as u64,
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connector::simulated::{InMemorySlot, SimulatedProvider};
    use tokio::time::Instant;

    #[tokio::test(start_paused = true)]
    async fn test_detects_descriptor_injected_late() {
        let slot = Arc::new(InMemorySlot::new());
        slot.inject_after(Duration::from_millis(250), Arc::new(SimulatedProvider::new("1.2.0")));

        let detector = CapabilityDetector::new(slot.clone(), Duration::from_millis(100));
        let started = Instant::now();
        let descriptor = detector.detect(Duration::from_secs(10)).await.unwrap();

        assert_eq!(descriptor.protocol_version(), "1.2.0");
        assert_eq!(started.elapsed(), Duration::from_millis(300));
        // Reads at 0, 100, 200, 300ms; nothing after the hit.
        assert_eq!(slot.reads(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_times_out_when_nothing_injected() {
        let slot = Arc::new(InMemorySlot::new());
        let detector = CapabilityDetector::new(slot.clone(), Duration::from_millis(100));
        let started = Instant::now();

        let err = detector.detect(Duration::from_millis(10_000)).await.err().unwrap();

        assert_eq!(err, DeploymentError::CapabilityNotFound { timeout_ms: 10_000 });
        assert!(started.elapsed() >= Duration::from_millis(10_000));

        // Polling is cancelled with the timeout.
        let reads = slot.reads();
        time::sleep(Duration::from_secs(1)).await;
        assert_eq!(slot.reads(), reads);
    }

    #[tokio::test(start_paused = true)]
    async fn test_already_present_descriptor_is_immediate() {
        let slot = Arc::new(InMemorySlot::with_descriptor(Arc::new(SimulatedProvider::new(
            "1.0.0",
        ))));
        let detector = CapabilityDetector::new(slot.clone(), Duration::from_millis(100));
        let started = Instant::now();
        detector.detect(Duration::from_secs(1)).await.unwrap();
        assert_eq!(started.elapsed(), Duration::ZERO);
        assert_eq!(slot.reads(), 1);
    }
}
